use tracing::info;

use crate::ai::{self, TextModel};
use crate::db::Database;
use crate::error::PipelineError;
use crate::models::{Comparison, ComparisonContext};

type Result<T> = std::result::Result<T, PipelineError>;

/// Scores all proposals for one RFP against each other and writes the
/// derived score fields back. Proposals whose vendor name is absent from
/// the returned score map are left untouched.
pub async fn run_comparison(
    db: &Database,
    model: &dyn TextModel,
    rfp_id: i64,
) -> Result<Comparison> {
    let proposals = db.list_proposals(rfp_id)?;
    if proposals.is_empty() {
        return Err(PipelineError::NoProposals);
    }

    let entries: Vec<ComparisonContext> = proposals
        .iter()
        .map(|p| ComparisonContext {
            vendor_name: p
                .vendor_name
                .clone()
                .unwrap_or_else(|| format!("vendor {}", p.vendor_id)),
            pricing: p.pricing.clone(),
            terms: p.terms.clone(),
            extracted_data: p.extracted_data.clone(),
            email_body: p.email_body.clone(),
        })
        .collect();

    let comparison = ai::compare_proposals(model, &entries).await?;

    let mut scored = 0;
    for (proposal, entry) in proposals.iter().zip(&entries) {
        if let Some(score) = comparison.scores.get(&entry.vendor_name) {
            db.set_proposal_scores(
                proposal.id,
                *score,
                &comparison.summary,
                &comparison.recommendation,
            )?;
            scored += 1;
        }
    }

    info!(
        rfp = rfp_id,
        proposals = proposals.len(),
        scored,
        "comparison complete"
    );
    Ok(comparison)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractedProposal, RfpStatus, SynthesizedRfp};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        response: &'static str,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(response: &'static str) -> Self {
            Self {
                response,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TextModel for Scripted {
        async fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.to_string())
        }
    }

    fn db_with_proposals(vendors: &[&str]) -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let rfp = db
            .create_rfp(
                &SynthesizedRfp {
                    title: "Laptops Q3".to_string(),
                    description: "laptops".to_string(),
                    budget: None,
                    deadline: None,
                    requirements: vec![],
                    payment_terms: None,
                    warranty: None,
                },
                "seed",
            )
            .unwrap();
        db.set_rfp_status(rfp.id, RfpStatus::Sent).unwrap();
        for (i, name) in vendors.iter().enumerate() {
            let vendor = db
                .create_vendor(name, &format!("v{i}@test"), None, None, None)
                .unwrap();
            db.create_proposal(rfp.id, vendor.id, "quote", &ExtractedProposal::default())
                .unwrap();
        }
        (db, rfp.id)
    }

    #[tokio::test]
    async fn empty_proposal_set_fails_before_any_model_call() {
        let (db, rfp_id) = db_with_proposals(&[]);
        let model = Scripted::new("{}");

        let err = run_comparison(&db, &model, rfp_id).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoProposals));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn scores_are_written_back_per_vendor() {
        let (db, rfp_id) = db_with_proposals(&["Acme", "Beta"]);
        let model = Scripted::new(
            r#"{"summary": "Acme is cheaper",
                "scores": {"Acme": 88, "Beta": 72},
                "recommendation": "Pick Acme",
                "strengths": {"Acme": ["price"]},
                "weaknesses": {"Beta": ["slow delivery"]}}"#,
        );

        let comparison = run_comparison(&db, &model, rfp_id).await.unwrap();
        assert_eq!(comparison.scores["Acme"], 88.0);
        assert_eq!(comparison.weaknesses["Beta"], vec!["slow delivery"]);

        let proposals = db.list_proposals(rfp_id).unwrap();
        assert_eq!(proposals[0].ai_score, Some(88.0));
        assert_eq!(proposals[1].ai_score, Some(72.0));
        assert_eq!(proposals[0].ai_summary.as_deref(), Some("Acme is cheaper"));
        assert_eq!(proposals[1].ai_recommendation.as_deref(), Some("Pick Acme"));
    }

    #[tokio::test]
    async fn vendors_missing_from_score_map_are_left_untouched() {
        let (db, rfp_id) = db_with_proposals(&["Acme", "Beta"]);
        let model = Scripted::new(
            r#"{"summary": "only scored Acme",
                "scores": {"Acme": 90},
                "recommendation": "Acme"}"#,
        );

        run_comparison(&db, &model, rfp_id).await.unwrap();

        let proposals = db.list_proposals(rfp_id).unwrap();
        assert_eq!(proposals[0].ai_score, Some(90.0));
        assert!(proposals[1].ai_score.is_none());
        assert!(proposals[1].ai_summary.is_none());
    }

    #[tokio::test]
    async fn undecodable_comparison_writes_nothing() {
        let (db, rfp_id) = db_with_proposals(&["Acme"]);
        let model = Scripted::new("the proposals are all quite similar");

        let err = run_comparison(&db, &model, rfp_id).await.unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }));

        let proposals = db.list_proposals(rfp_id).unwrap();
        assert!(proposals[0].ai_score.is_none());
    }
}
