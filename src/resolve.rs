use regex::Regex;
use tracing::debug;

use crate::db::Database;
use crate::error::PipelineError;
use crate::models::{Rfp, RfpStatus, Vendor};

type Result<T> = std::result::Result<T, PipelineError>;

/// Maps a sender address to a known vendor by exact email match. A miss is
/// a normal outcome: the message simply is not a vendor response.
pub fn resolve_vendor(db: &Database, sender: &str) -> Result<Option<Vendor>> {
    let vendor = db.find_vendor_by_email(sender)?;
    if vendor.is_none() {
        debug!(sender, "no vendor registered for sender");
    }
    Ok(vendor)
}

/// Maps a subject line to an RFP. A numeric subject tag ("RFP #7", "RFP: 7",
/// "RFP7") is ground truth and looks the RFP up by id regardless of status.
/// Without a tag, the subject is scanned against the titles of all `sent`
/// RFPs; the longest title contained in the subject wins, ties going to the
/// lowest id.
pub fn resolve_rfp(db: &Database, subject: &str) -> Result<Option<Rfp>> {
    if let Some(id) = subject_tag(subject) {
        return db.get_rfp(id);
    }

    let mut best: Option<Rfp> = None;
    for rfp in db.list_rfps(Some(RfpStatus::Sent))? {
        if !subject.contains(&rfp.title) {
            continue;
        }
        let better = match &best {
            None => true,
            Some(current) => rfp.title.len() > current.title.len(),
        };
        if better {
            best = Some(rfp);
        }
    }
    if best.is_none() {
        debug!(subject, "no RFP matched subject");
    }
    Ok(best)
}

fn subject_tag(subject: &str) -> Option<i64> {
    let re = Regex::new(r"(?i)RFP[:\s]*#?(\d+)").ok()?;
    let caps = re.captures(subject)?;
    caps.get(1)?.as_str().parse().ok()
}
