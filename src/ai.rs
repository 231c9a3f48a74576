use std::env;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::PipelineError;
use crate::models::{Comparison, ComparisonContext, ExtractedProposal, Rfp, SynthesizedRfp};

type Result<T> = std::result::Result<T, PipelineError>;

// Deterministic-leaning for single-document extraction, more creative
// for comparative judgment.
const EXTRACTION_TEMPERATURE: f32 = 0.3;
const COMPARISON_TEMPERATURE: f32 = 0.5;

const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

// --- Model trait ---

/// One call to a generative text service: instruction plus context in,
/// raw text out. No retry at this layer; failures propagate to the caller.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String>;
}

// --- Gemini client ---

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Debug)]
pub struct GeminiClient {
    api_key: String,
    model_id: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("GEMINI_API_KEY").map_err(|_| {
            PipelineError::Service(
                "GEMINI_API_KEY environment variable not set. \
                 Set it with: export GEMINI_API_KEY=your-key-here"
                    .to_string(),
            )
        })?;
        let model_id = env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Ok(Self {
            api_key,
            model_id,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl TextModel for GeminiClient {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: GenerationConfig {
                temperature,
                response_mime_type: "application/json",
            },
        };

        let url = format!("{GEMINI_API_BASE}/{}:generateContent", self.model_id);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Service(format!("request to Gemini API failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Service(format!(
                "Gemini API request failed with status {status}: {error_text}"
            )));
        }

        let api_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Service(format!("cannot read Gemini API response: {e}")))?;

        let text: String = api_response
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect();

        if text.trim().is_empty() {
            return Err(PipelineError::Service(
                "Gemini API returned no retrievable text".to_string(),
            ));
        }

        Ok(text)
    }
}

// --- Structured response recovery ---

/// Recovers a JSON value from raw model output. Tolerates markdown fences
/// and surrounding prose; malformed JSON inside the detected boundaries is
/// a hard failure carrying a truncated snippet, never repaired.
pub fn recover_json(raw: &str) -> Result<Value> {
    let cleaned = strip_fences(raw.trim());
    let cleaned = cleaned.trim();
    let candidate = json_candidate(cleaned);
    serde_json::from_str(candidate).map_err(|e| PipelineError::format(e.to_string(), candidate))
}

/// Recovers and strictly decodes model output into a typed payload.
pub fn recover_typed<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let value = recover_json(raw)?;
    serde_json::from_value(value).map_err(|e| PipelineError::format(e.to_string(), raw.trim()))
}

// Drops all ``` fence markers and any `json` tag glued to them. Content
// between fences is kept; boundary extraction below deals with leftovers.
fn strip_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find("```") {
        out.push_str(&rest[..idx]);
        rest = &rest[idx + 3..];
        if let Some(tag) = rest.get(..4) {
            if tag.eq_ignore_ascii_case("json") {
                rest = &rest[4..];
            }
        }
    }
    out.push_str(rest);
    out
}

// First `{` to last `}` wins over first `[` to last `]`; with no usable
// pair the whole text is the candidate.
fn json_candidate(cleaned: &str) -> &str {
    if let (Some(first), Some(last)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if last > first {
            return &cleaned[first..=last];
        }
    }
    if let (Some(first), Some(last)) = (cleaned.find('['), cleaned.rfind(']')) {
        if last > first {
            return &cleaned[first..=last];
        }
    }
    cleaned
}

// --- Instruction variants ---

/// Converts a free-text procurement description into structured RFP fields.
pub async fn synthesize_rfp(model: &dyn TextModel, description: &str) -> Result<SynthesizedRfp> {
    let prompt = synthesis_prompt(description);
    let raw = model.generate(&prompt, EXTRACTION_TEMPERATURE).await?;
    recover_typed(&raw)
}

/// Extracts structured proposal data from a vendor response email, with the
/// RFP it answers as context.
pub async fn extract_proposal(
    model: &dyn TextModel,
    rfp: &Rfp,
    email_body: &str,
) -> Result<ExtractedProposal> {
    let prompt = extraction_prompt(rfp, email_body);
    let raw = model.generate(&prompt, EXTRACTION_TEMPERATURE).await?;
    recover_typed(&raw)
}

/// Scores a set of proposals for the same RFP against each other.
pub async fn compare_proposals(
    model: &dyn TextModel,
    entries: &[ComparisonContext],
) -> Result<Comparison> {
    let prompt = comparison_prompt(entries)?;
    let raw = model.generate(&prompt, COMPARISON_TEMPERATURE).await?;
    recover_typed(&raw)
}

const JSON_ONLY: &str = "Return ONLY valid JSON with the structure above, no markdown \
     formatting, no code blocks, no explanations, no text before or after the JSON. \
     The response must be valid JSON that can be parsed directly.";

fn synthesis_prompt(description: &str) -> String {
    format!(
        "You are an assistant that converts natural language procurement requests \
         into structured RFPs.\n\n\
         Given the following procurement description, extract and structure the \
         information into JSON with these fields:\n\
         - title: A concise title for the RFP\n\
         - description: The full description\n\
         - budget: Numeric budget amount (null if not specified)\n\
         - deadline: ISO date string for the delivery deadline (null if not specified)\n\
         - requirements: Array of objects, each with:\n\
           - item: Item name (e.g., \"laptops\", \"monitors\")\n\
           - quantity: Number\n\
           - specifications: Object with key-value spec pairs (e.g., {{\"RAM\": \"16GB\"}})\n\
         - paymentTerms: Payment terms if mentioned (e.g., \"net 30\")\n\
         - warranty: Warranty requirements if mentioned\n\n\
         Procurement Description:\n{description}\n\n\
         {JSON_ONLY}"
    )
}

fn extraction_prompt(rfp: &Rfp, email_body: &str) -> String {
    let requirements =
        serde_json::to_string_pretty(&rfp.requirements).unwrap_or_else(|_| "[]".to_string());
    let budget = rfp
        .budget
        .map(|b| b.to_string())
        .unwrap_or_else(|| "Not specified".to_string());
    format!(
        "You are an assistant that extracts structured proposal data from vendor \
         response emails.\n\n\
         Given an RFP and a vendor's email response, extract:\n\
         - pricing: Object with itemized pricing \
           (e.g., {{\"laptops\": {{\"quantity\": 20, \"unitPrice\": 1200, \"total\": 24000}}}})\n\
         - totalPrice: Total proposal price\n\
         - deliveryTime: Delivery timeline\n\
         - paymentTerms: Payment terms offered\n\
         - warranty: Warranty offered\n\
         - additionalTerms: Any other important terms or conditions\n\
         - completeness: Percentage (0-100) of how well the proposal addresses \
           the RFP requirements\n\n\
         RFP Details:\n\
         Title: {title}\n\
         Budget: {budget}\n\
         Requirements: {requirements}\n\n\
         Vendor Email Response:\n{email_body}\n\n\
         {JSON_ONLY}",
        title = rfp.title,
    )
}

fn comparison_prompt(entries: &[ComparisonContext]) -> Result<String> {
    let proposals = serde_json::to_string_pretty(entries)
        .map_err(|e| PipelineError::Other(format!("cannot encode comparison context: {e}")))?;
    Ok(format!(
        "You are an assistant that compares vendor proposals and provides \
         recommendations.\n\n\
         Given multiple vendor proposals for the same RFP, analyze them and provide:\n\
         - summary: A brief summary comparing all proposals\n\
         - scores: Object with vendor names as keys and scores (0-100) as values\n\
         - recommendation: The recommended vendor name and detailed reasoning \
           (2-3 sentences)\n\
         - strengths: Object with vendor names as keys and arrays of their strengths\n\
         - weaknesses: Object with vendor names as keys and arrays of their weaknesses\n\n\
         Proposals Data:\n{proposals}\n\n\
         {JSON_ONLY}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted(&'static str);

    #[async_trait]
    impl TextModel for Scripted {
        async fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn recovers_plain_object() {
        let value = recover_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn fenced_json_equals_unwrapped() {
        let bare = r#"{"pricing": {"laptops": {"total": 24000}}, "completeness": 90}"#;
        let fenced = format!("```json\n{bare}\n```");
        assert_eq!(recover_json(bare).unwrap(), recover_json(&fenced).unwrap());

        let fenced_upper = format!("```JSON\n{bare}\n```");
        assert_eq!(recover_json(bare).unwrap(), recover_json(&fenced_upper).unwrap());

        let fenced_untagged = format!("```\n{bare}\n```");
        assert_eq!(recover_json(bare).unwrap(), recover_json(&fenced_untagged).unwrap());
    }

    #[test]
    fn extracts_object_embedded_in_prose() {
        let raw = "Sure! Here is the extraction you asked for:\n\
                   {\"deliveryTime\": \"30 days\", \"completeness\": 80}\n\
                   Let me know if you need anything else.";
        let value = recover_json(raw).unwrap();
        assert_eq!(value["deliveryTime"], "30 days");
        assert_eq!(value["completeness"], 80);
    }

    #[test]
    fn prefers_object_over_array() {
        let raw = r#"[1, 2] and then {"a": [3, 4]}"#;
        let value = recover_json(raw).unwrap();
        assert_eq!(value["a"][1], 4);
    }

    #[test]
    fn recovers_bare_array() {
        let raw = "scores follow: [10, 20, 30] done";
        let value = recover_json(raw).unwrap();
        assert_eq!(value[2], 30);
    }

    #[test]
    fn plain_prose_is_a_format_error() {
        let err = recover_json("I could not find any pricing in this email.").unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }));
    }

    #[test]
    fn malformed_json_inside_boundaries_is_a_hard_failure() {
        // Trailing comma stays broken: no semantic repair.
        let err = recover_json(r#"{"a": 1,}"#).unwrap_err();
        match err {
            PipelineError::Format { snippet, .. } => assert!(snippet.contains("{\"a\": 1,}")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_response_is_a_format_error() {
        assert!(matches!(recover_json("   "), Err(PipelineError::Format { .. })));
    }

    #[test]
    fn typed_recovery_rejects_wrong_shapes() {
        let err = recover_typed::<ExtractedProposal>(r#"{"pricing": {"laptops": "cheap"}}"#)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }));
    }

    #[tokio::test]
    async fn extract_proposal_decodes_scripted_output() {
        let model = Scripted(
            r#"```json
            {"pricing": {"laptops": {"quantity": 20, "unitPrice": 1200, "total": 24000}},
             "deliveryTime": "30 days", "paymentTerms": "net 30",
             "warranty": "1 year", "completeness": 90}
            ```"#,
        );
        let rfp = test_rfp();
        let extracted = extract_proposal(&model, &rfp, "20 units at $1200 each").await.unwrap();
        assert_eq!(extracted.pricing["laptops"].total, Some(24000.0));
        assert_eq!(extracted.delivery_time.as_deref(), Some("30 days"));
    }

    #[tokio::test]
    async fn synthesize_rfp_decodes_scripted_output() {
        let model = Scripted(
            r#"{"title": "Laptops Q3", "description": "20 laptops",
                "budget": 30000, "requirements": [{"item": "laptops", "quantity": 20,
                "specifications": {"RAM": "16GB"}}]}"#,
        );
        let synthesized = synthesize_rfp(&model, "we need 20 laptops").await.unwrap();
        assert_eq!(synthesized.title, "Laptops Q3");
        assert_eq!(synthesized.requirements[0].quantity, Some(20.0));
    }

    #[tokio::test]
    async fn service_failure_propagates_unwrapped() {
        struct Failing;

        #[async_trait]
        impl TextModel for Failing {
            async fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String> {
                Err(PipelineError::Service("quota exceeded".to_string()))
            }
        }

        let err = synthesize_rfp(&Failing, "anything").await.unwrap_err();
        assert!(matches!(err, PipelineError::Service(_)));
    }

    #[test]
    fn extraction_prompt_carries_rfp_context() {
        let rfp = test_rfp();
        let prompt = extraction_prompt(&rfp, "our quote: $24,000 all in");
        assert!(prompt.contains("Title: Laptops Q3"));
        assert!(prompt.contains("Budget: 30000"));
        assert!(prompt.contains("our quote: $24,000 all in"));
        assert!(prompt.contains("completeness"));
    }

    #[test]
    fn gemini_client_requires_api_key() {
        let original = env::var("GEMINI_API_KEY").ok();
        unsafe {
            env::remove_var("GEMINI_API_KEY");
        }

        let result = GeminiClient::from_env();

        if let Some(val) = original {
            unsafe {
                env::set_var("GEMINI_API_KEY", val);
            }
        }

        let err = result.unwrap_err();
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    fn test_rfp() -> Rfp {
        Rfp {
            id: 1,
            title: "Laptops Q3".to_string(),
            description: "20 developer laptops".to_string(),
            budget: Some(30000.0),
            deadline: None,
            requirements: vec![],
            payment_terms: None,
            warranty: None,
            status: crate::models::RfpStatus::Sent,
            original_text: None,
            created_at: String::new(),
        }
    }
}
