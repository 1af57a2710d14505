use crate::core::error::UploadError;
use std::collections::HashMap;
use std::fmt;
use url::Url;
use uuid::Uuid;

pub type SessionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Negotiating,
    Transferring,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Half-open byte range `[start, end)` of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    start: u64,
    end: u64,
}

impl ChunkRange {
    pub fn new(start: u64, end: u64) -> Result<Self, UploadError> {
        if end < start {
            return Err(UploadError::InvalidRange { start, end });
        }
        Ok(Self::spanning(start, end))
    }

    /// Caller guarantees `start <= end`.
    pub(crate) fn spanning(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Cache key identifying a local file across upload attempts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Name + type + size heuristic; distinct files sharing all three collide.
    pub fn derive(name: &str, mime_type: &str, size: u64) -> Self {
        Self(format!("tus-{}-{}-{}", name, mime_type, size))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Upload creation endpoint.
    pub endpoint: String,
    /// Overrides the derived fingerprint when set.
    pub fingerprint: Option<String>,
    /// When false any cached location is discarded before starting.
    pub resumable: bool,
    /// Discard the cached location for this file once, then behave as usual.
    pub reset_before: bool,
    /// Extra headers merged into every request.
    pub headers: HashMap<String, String>,
    pub chunk_size: u64,
}

impl UploadOptions {
    pub fn new(endpoint: impl Into<String>, chunk_size: u64) -> Self {
        Self {
            endpoint: endpoint.into(),
            fingerprint: None,
            resumable: true,
            reset_before: false,
            headers: HashMap::new(),
            chunk_size,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn resumable(mut self, resumable: bool) -> Self {
        self.resumable = resumable;
        self
    }

    pub fn reset_before(mut self, reset: bool) -> Self {
        self.reset_before = reset;
        self
    }

    pub fn validate(&self) -> Result<Url, UploadError> {
        if self.chunk_size == 0 {
            return Err(UploadError::InvalidOptions("chunk size must be positive".to_string()));
        }
        Url::parse(&self.endpoint).map_err(|e| {
            UploadError::InvalidOptions(format!("invalid endpoint {}: {}", self.endpoint, e))
        })
    }

    /// Explicit fingerprint if configured, otherwise derived from file metadata.
    pub fn fingerprint_for(&self, name: &str, mime_type: &str, size: u64) -> Fingerprint {
        match &self.fingerprint {
            Some(f) => Fingerprint::from(f.as_str()),
            None => Fingerprint::derive(name, mime_type, size),
        }
    }
}

/// Terminal result of a session that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Completed { location: String },
    Cancelled,
}
