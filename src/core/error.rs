use reqwest::StatusCode;

#[derive(thiserror::Error, Debug)]
pub enum UploadError {
    #[error("invalid upload options: {0}")]
    InvalidOptions(String),

    #[error("invalid chunk range [{start}, {end})")]
    InvalidRange { start: u64, end: u64 },

    /// Create or query failed, or the server answered with a malformed response.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    /// The cached resource no longer exists server-side. Handled internally by
    /// falling back to create; never returned from a session.
    #[error("stale resource at {0}")]
    StaleResource(String),

    #[error("chunk transfer failed at offset {offset}: {}", display_status(.status, .message))]
    ChunkTransferFailed {
        offset: u64,
        status: Option<StatusCode>,
        message: String,
    },

    /// Non-fatal; the session logs it and continues without a durable resume point.
    #[error("could not persist resume location: {0}")]
    CacheWriteFailed(String),

    #[error("could not read bytes {start}..{end} of source: {message}")]
    SourceRead { start: u64, end: u64, message: String },

    #[error("upload task aborted: {0}")]
    Aborted(String),
}

impl UploadError {
    /// Response status carried by a failed chunk transfer, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::ChunkTransferFailed { status, .. } => *status,
            _ => None,
        }
    }
}

fn display_status(status: &Option<StatusCode>, message: &str) -> String {
    match status {
        Some(s) if message.is_empty() => format!("http status {}", s),
        Some(s) => format!("http status {} ({})", s, message),
        None => message.to_string(),
    }
}
