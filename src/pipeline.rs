use tracing::info;

use crate::ai::{self, TextModel};
use crate::db::Database;
use crate::error::PipelineError;
use crate::mail::{self, InboundMessage};
use crate::resolve;

type Result<T> = std::result::Result<T, PipelineError>;

/// What became of one inbound message. Resolution misses are normal
/// outcomes, not errors: the message is dropped and the cycle continues.
#[derive(Debug)]
pub enum IngestOutcome {
    Recorded {
        proposal_id: i64,
        rfp_id: i64,
        vendor_id: i64,
    },
    UnknownVendor {
        sender: String,
    },
    UnmatchedRfp {
        sender: String,
        subject: String,
    },
}

/// One ingestion pass: parse → resolve → extract → record.
pub async fn ingest_message(
    db: &Database,
    model: &dyn TextModel,
    raw: &[u8],
) -> Result<IngestOutcome> {
    let message = mail::parse_message(raw)?;
    ingest_parsed(db, model, message).await
}

/// Ingestion for an already-parsed message.
async fn ingest_parsed(
    db: &Database,
    model: &dyn TextModel,
    message: InboundMessage,
) -> Result<IngestOutcome> {
    info!(sender = %message.sender, subject = %message.subject, "processing inbound message");

    let Some(vendor) = resolve::resolve_vendor(db, &message.sender)? else {
        return Ok(IngestOutcome::UnknownVendor {
            sender: message.sender,
        });
    };

    let Some(rfp) = resolve::resolve_rfp(db, &message.subject)? else {
        return Ok(IngestOutcome::UnmatchedRfp {
            sender: message.sender,
            subject: message.subject,
        });
    };

    let extracted = ai::extract_proposal(model, &rfp, &message.body).await?;
    let proposal = db.create_proposal(rfp.id, vendor.id, &message.body, &extracted)?;

    // Repeat submissions are expected; the count makes revisions visible.
    let from_vendor = db.count_proposals(rfp.id, vendor.id)?;
    info!(
        proposal = proposal.id,
        rfp = rfp.id,
        vendor = %vendor.name,
        proposals_from_vendor = from_vendor,
        "recorded proposal"
    );

    Ok(IngestOutcome::Recorded {
        proposal_id: proposal.id,
        rfp_id: rfp.id,
        vendor_id: vendor.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProposalStatus, RfpStatus, SynthesizedRfp};
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

    const LAPTOPS_EXTRACTION: &str = r#"{"pricing":{"laptops":{"quantity":20,"unitPrice":1200,"total":24000}},"deliveryTime":"30 days","paymentTerms":"net 30","warranty":"1 year","completeness":90}"#;

    fn seeded_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_vendor("Vendor X", "v@x.com", None, None, None)
            .unwrap();
        let rfp = db
            .create_rfp(
                &SynthesizedRfp {
                    title: "Laptops Q3".to_string(),
                    description: "20 developer laptops".to_string(),
                    budget: Some(30000.0),
                    deadline: None,
                    requirements: vec![],
                    payment_terms: None,
                    warranty: None,
                },
                "we need 20 laptops",
            )
            .unwrap();
        db.set_rfp_status(rfp.id, RfpStatus::Sent).unwrap();
        db
    }

    #[tokio::test]
    async fn end_to_end_records_a_proposal() {
        let db = seeded_db();
        let model = Scripted::new(LAPTOPS_EXTRACTION);
        let raw = b"From: v@x.com\r\n\
                    Subject: Re: RFP: Laptops Q3\r\n\
                    Content-Type: text/plain\r\n\
                    \r\n\
                    20 units at $1200 each, 30 day delivery, net 30, 1yr warranty";

        let outcome = ingest_message(&db, &model, raw).await.unwrap();
        let IngestOutcome::Recorded { proposal_id, .. } = outcome else {
            panic!("expected a recorded proposal, got {outcome:?}");
        };

        let proposal = db.get_proposal(proposal_id).unwrap().unwrap();
        assert_eq!(proposal.pricing["laptops"].total, Some(24000.0));
        assert_eq!(proposal.terms.delivery_time.as_deref(), Some("30 days"));
        assert_eq!(proposal.status, ProposalStatus::Received);
        assert!(proposal.email_body.contains("20 units at $1200 each"));
    }

    #[tokio::test]
    async fn unknown_sender_is_dropped_without_extraction() {
        let db = seeded_db();
        let model = Scripted::new(LAPTOPS_EXTRACTION);
        let raw = b"From: stranger@elsewhere.com\r\n\
                    Subject: Re: RFP: Laptops Q3\r\n\
                    \r\n\
                    our quote";

        let outcome = ingest_message(&db, &model, raw).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::UnknownVendor { .. }));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        assert_eq!(db.list_proposals(1).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn unmatched_subject_is_dropped_without_extraction() {
        let db = seeded_db();
        let model = Scripted::new(LAPTOPS_EXTRACTION);
        let raw = b"From: v@x.com\r\n\
                    Subject: Golf on saturday?\r\n\
                    \r\n\
                    tee off at 9";

        let outcome = ingest_message(&db, &model, raw).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::UnmatchedRfp { .. }));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn undecodable_extraction_drops_the_message() {
        let db = seeded_db();
        let model = Scripted::new("I'm sorry, I could not find any pricing here.");
        let raw = b"From: v@x.com\r\n\
                    Subject: Re: RFP: Laptops Q3\r\n\
                    \r\n\
                    our quote";

        let err = ingest_message(&db, &model, raw).await.unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }));
        assert_eq!(db.list_proposals(1).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn repeat_submission_creates_a_second_proposal() {
        let db = seeded_db();
        let model = Scripted::new(LAPTOPS_EXTRACTION);
        let raw: &[u8] = b"From: v@x.com\r\n\
                    Subject: Re: RFP: Laptops Q3\r\n\
                    \r\n\
                    revised quote";

        ingest_message(&db, &model, raw).await.unwrap();
        ingest_message(&db, &model, raw).await.unwrap();
        assert_eq!(db.list_proposals(1).unwrap().len(), 2);
    }
}
