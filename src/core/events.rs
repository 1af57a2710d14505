use crate::core::model::{SessionId, SessionState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    StateChanged { session_id: SessionId, state: SessionState },
    /// A location was negotiated; `resumed` is true when it came from the cache.
    ResourceReady { session_id: SessionId, location: String, offset: u64, resumed: bool },
    /// Cumulative bytes confirmed by the server. Strictly increasing per session.
    Progress { session_id: SessionId, bytes_written: u64, total: u64 },
}
