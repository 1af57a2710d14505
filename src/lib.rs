//! Resumable chunked upload client.
//!
//! A session negotiates an upload resource (create, or resume a cached one by
//! asking the server for its offset), then sends the remaining bytes of the
//! file as ordered `PATCH` requests.

pub mod core;
pub mod plugins;

pub use crate::core::engine::{UploadHandle, Uploader};
pub use crate::core::error::UploadError;
pub use crate::core::events::UploadEvent;
pub use crate::core::model::{ChunkRange, Fingerprint, SessionState, UploadOptions, UploadOutcome};
pub use crate::core::source::{FileSource, MemorySource, UploadSource};
pub use crate::core::store::{MemoryStore, ResumeCache, ResumeStore, SqliteStore};
pub use crate::plugins::registry::{DriverContext, PluginRegistry, Transport, TransportResponse};
