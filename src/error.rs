use thiserror::Error;

/// Maximum length of the diagnostic snippet carried by [`PipelineError::Format`].
pub const SNIPPET_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("mailbox connection failed: {0}")]
    Connection(String),

    #[error("could not parse message: {0}")]
    Parse(String),

    #[error("extraction service call failed: {0}")]
    Service(String),

    #[error("extraction service returned undecodable text: {detail} (near: {snippet:?})")]
    Format { detail: String, snippet: String },

    #[error("no proposals to compare")]
    NoProposals,

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    pub fn format(detail: impl Into<String>, text: &str) -> Self {
        PipelineError::Format {
            detail: detail.into(),
            snippet: truncate(text, SNIPPET_LEN),
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
