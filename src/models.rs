use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vendor {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub contact_person: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RfpStatus {
    Draft,
    Sent,
    Closed,
}

impl RfpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RfpStatus::Draft => "draft",
            RfpStatus::Sent => "sent",
            RfpStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(RfpStatus::Draft),
            "sent" => Some(RfpStatus::Sent),
            "closed" => Some(RfpStatus::Closed),
            _ => None,
        }
    }
}

/// One line item requested in an RFP.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirement {
    pub item: String,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub specifications: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rfp {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub budget: Option<f64>,
    pub deadline: Option<String>,
    pub requirements: Vec<Requirement>,
    pub payment_terms: Option<String>,
    pub warranty: Option<String>,
    pub status: RfpStatus,
    pub original_text: Option<String>,
    pub created_at: String,
}

/// Structured RFP fields synthesized from a free-text procurement description.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizedRfp {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub payment_terms: Option<String>,
    #[serde(default)]
    pub warranty: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Received,
    Reviewed,
    Accepted,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Received => "received",
            ProposalStatus::Reviewed => "reviewed",
            ProposalStatus::Accepted => "accepted",
            ProposalStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "received" => Some(ProposalStatus::Received),
            "reviewed" => Some(ProposalStatus::Reviewed),
            "accepted" => Some(ProposalStatus::Accepted),
            "rejected" => Some(ProposalStatus::Rejected),
            _ => None,
        }
    }
}

/// Itemized pricing for one line item, as quoted by a vendor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPricing {
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub total: Option<f64>,
}

/// Terms quoted in a proposal. Missing fields stay absent, never defaulted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Terms {
    #[serde(default)]
    pub delivery_time: Option<String>,
    #[serde(default)]
    pub payment_terms: Option<String>,
    #[serde(default)]
    pub warranty: Option<String>,
    #[serde(default)]
    pub additional_terms: Option<String>,
}

/// Structured payload recovered from a vendor response email.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedProposal {
    #[serde(default)]
    pub pricing: BTreeMap<String, ItemPricing>,
    #[serde(default)]
    pub total_price: Option<f64>,
    #[serde(default)]
    pub delivery_time: Option<String>,
    #[serde(default)]
    pub payment_terms: Option<String>,
    #[serde(default)]
    pub warranty: Option<String>,
    #[serde(default)]
    pub additional_terms: Option<String>,
    #[serde(default)]
    pub completeness: Option<f64>,
}

impl ExtractedProposal {
    pub fn terms(&self) -> Terms {
        Terms {
            delivery_time: self.delivery_time.clone(),
            payment_terms: self.payment_terms.clone(),
            warranty: self.warranty.clone(),
            additional_terms: self.additional_terms.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: i64,
    pub rfp_id: i64,
    pub vendor_id: i64,
    pub vendor_name: Option<String>, // denormalized for convenience
    pub email_body: String,
    pub extracted_data: ExtractedProposal,
    pub pricing: BTreeMap<String, ItemPricing>,
    pub terms: Terms,
    pub ai_score: Option<f64>,
    pub ai_summary: Option<String>,
    pub ai_recommendation: Option<String>,
    pub status: ProposalStatus,
    pub created_at: String,
}

/// Per-proposal context handed to the comparative-scoring extraction.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonContext {
    pub vendor_name: String,
    pub pricing: BTreeMap<String, ItemPricing>,
    pub terms: Terms,
    pub extracted_data: ExtractedProposal,
    pub email_body: String,
}

/// Relative scoring of all proposals submitted for one RFP.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub recommendation: String,
    #[serde(default)]
    pub strengths: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub weaknesses: BTreeMap<String, Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracted_proposal_uses_wire_field_names() {
        let json = r#"{
            "pricing": {"laptops": {"quantity": 20, "unitPrice": 1200, "total": 24000}},
            "totalPrice": 24000,
            "deliveryTime": "30 days",
            "paymentTerms": "net 30",
            "warranty": "1 year",
            "completeness": 90
        }"#;
        let extracted: ExtractedProposal = serde_json::from_str(json).unwrap();
        assert_eq!(extracted.pricing["laptops"].unit_price, Some(1200.0));
        assert_eq!(extracted.pricing["laptops"].total, Some(24000.0));
        assert_eq!(extracted.delivery_time.as_deref(), Some("30 days"));
        assert_eq!(extracted.completeness, Some(90.0));
        assert!(extracted.additional_terms.is_none());
    }

    #[test]
    fn terms_copy_leaves_missing_fields_absent() {
        let extracted = ExtractedProposal {
            delivery_time: Some("2 weeks".to_string()),
            ..Default::default()
        };
        let terms = extracted.terms();
        assert_eq!(terms.delivery_time.as_deref(), Some("2 weeks"));
        assert!(terms.payment_terms.is_none());
        assert!(terms.warranty.is_none());
        assert!(terms.additional_terms.is_none());
    }

    #[test]
    fn non_numeric_price_is_rejected() {
        let json = r#"{"pricing": {"laptops": {"unitPrice": "twelve hundred"}}}"#;
        let result: Result<ExtractedProposal, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn status_round_trips() {
        for status in ["draft", "sent", "closed"] {
            assert_eq!(RfpStatus::parse(status).unwrap().as_str(), status);
        }
        assert!(RfpStatus::parse("archived").is_none());
        for status in ["received", "reviewed", "accepted", "rejected"] {
            assert_eq!(ProposalStatus::parse(status).unwrap().as_str(), status);
        }
    }
}
