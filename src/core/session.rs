use crate::core::error::UploadError;
use crate::core::events::UploadEvent;
use crate::core::model::{ChunkRange, Fingerprint, SessionId, SessionState, UploadOptions, UploadOutcome};
use crate::core::planner::ChunkScheduler;
use crate::core::source::UploadSource;
use crate::core::store::ResumeCache;
use crate::plugins::registry::Transport;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

pub const HEADER_FINAL_LENGTH: &str = "Final-Length";
pub const HEADER_OFFSET: &str = "Offset";
pub const HEADER_LOCATION: &str = "Location";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// One upload attempt for one file: negotiate a resource, then push the
/// remaining bytes chunk by chunk, strictly in order.
pub struct UploadSession {
    id: SessionId,
    source: Arc<dyn UploadSource>,
    transport: Arc<dyn Transport>,
    cache: ResumeCache,
    options: UploadOptions,
    endpoint: Url,
    fingerprint: Fingerprint,
    file_size: u64,
    resource_location: Option<String>,
    bytes_written: u64,
    scheduler: ChunkScheduler,
    state: SessionState,
    last_reported: Option<u64>,
    events: mpsc::UnboundedSender<UploadEvent>,
    cancel: CancellationToken,
}

impl UploadSession {
    pub fn new(
        source: Arc<dyn UploadSource>,
        transport: Arc<dyn Transport>,
        cache: ResumeCache,
        options: UploadOptions,
        events: mpsc::UnboundedSender<UploadEvent>,
        cancel: CancellationToken,
    ) -> Result<Self, UploadError> {
        let endpoint = options.validate()?;
        let file_size = source.size();
        let fingerprint = options.fingerprint_for(source.name(), source.mime_type(), file_size);
        let chunk_size = options.chunk_size;

        Ok(Self {
            id: Uuid::new_v4(),
            source,
            transport,
            cache,
            options,
            endpoint,
            fingerprint,
            file_size,
            resource_location: None,
            bytes_written: 0,
            scheduler: ChunkScheduler::new(file_size, chunk_size, 0),
            state: SessionState::Idle,
            last_reported: None,
            events,
            cancel,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn resource_location(&self) -> Option<&str> {
        self.resource_location.as_deref()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn bytes_enqueued(&self) -> u64 {
        self.scheduler.bytes_enqueued()
    }

    /// Drives the session to a terminal state. Returns exactly once.
    pub async fn run(&mut self) -> Result<UploadOutcome, UploadError> {
        if self.state.is_terminal() {
            return Err(UploadError::Aborted(format!("session {} already finished", self.id)));
        }

        let result = match self.drive().await {
            Err(e) if self.cancel.is_cancelled() => {
                info!(session = %self.id, error = %e, "cancelled; discarding in-flight failure");
                Ok(UploadOutcome::Cancelled)
            }
            other => other,
        };

        match &result {
            Ok(UploadOutcome::Completed { location }) => {
                info!(session = %self.id, location = %location, bytes = self.bytes_written, "upload completed");
                self.set_state(SessionState::Completed);
            }
            Ok(UploadOutcome::Cancelled) => {
                info!(session = %self.id, bytes_written = self.bytes_written, "upload cancelled");
                self.set_state(SessionState::Cancelled);
            }
            Err(e) => {
                warn!(session = %self.id, bytes_written = self.bytes_written, error = %e, "upload failed");
                self.set_state(SessionState::Failed);
            }
        }
        result
    }

    async fn drive(&mut self) -> Result<UploadOutcome, UploadError> {
        if self.cancel.is_cancelled() {
            return Ok(UploadOutcome::Cancelled);
        }

        self.set_state(SessionState::Negotiating);
        if !self.options.resumable || self.options.reset_before {
            info!(fingerprint = %self.fingerprint, "resetting cached resume location");
            self.cache.clear(&self.fingerprint).await;
        }

        let offset = match self.negotiate().await? {
            Some(offset) => offset,
            None => return Ok(UploadOutcome::Cancelled),
        };

        self.bytes_written = offset;
        self.scheduler = ChunkScheduler::new(self.file_size, self.options.chunk_size, offset);
        self.set_state(SessionState::Transferring);

        loop {
            if self.bytes_written == self.file_size {
                self.report_progress(self.file_size);
                let location = self.location()?.to_string();
                return Ok(UploadOutcome::Completed { location });
            }

            // Only future chunks are suppressed; a fully written upload still completes.
            if self.cancel.is_cancelled() {
                return Ok(UploadOutcome::Cancelled);
            }

            self.scheduler.refill();
            let chunk = self.scheduler.next_chunk().ok_or_else(|| {
                UploadError::Aborted(format!(
                    "no chunk left at {} of {} bytes",
                    self.bytes_written, self.file_size
                ))
            })?;
            self.transfer_chunk(chunk).await?;

            tokio::task::yield_now().await;
        }
    }

    /// Establishes the resource location. Returns the starting offset, or
    /// `None` if cancellation was observed between requests.
    async fn negotiate(&mut self) -> Result<Option<u64>, UploadError> {
        if let Some(location) = self.cache.get(&self.fingerprint).await {
            match self.query_offset(&location).await {
                Ok(offset) => {
                    info!(session = %self.id, location = %location, offset, "resuming upload");
                    self.set_location(location, offset, true);
                    return Ok(Some(offset));
                }
                Err(UploadError::StaleResource(stale)) => {
                    info!(session = %self.id, location = %stale, "cached resource is gone; creating a new one");
                    self.cache.clear(&self.fingerprint).await;
                }
                Err(e) => return Err(e),
            }

            if self.cancel.is_cancelled() {
                return Ok(None);
            }
        }

        let location = self.create_resource().await?;
        if let Err(e) = self.cache.set(&self.fingerprint, &location).await {
            warn!(session = %self.id, error = %e, "continuing without a durable resume point");
        }
        info!(session = %self.id, location = %location, size = self.file_size, "created upload resource");
        self.set_location(location, 0, false);
        Ok(Some(0))
    }

    async fn create_resource(&self) -> Result<String, UploadError> {
        let headers = self.request_headers(&[(HEADER_FINAL_LENGTH, self.file_size.to_string())]);

        let endpoint = self.options.endpoint.as_str();
        let resp = self.transport.post(endpoint, &headers).await.map_err(|e| {
            UploadError::NegotiationFailed(format!("could not post to {}: {:#}", endpoint, e))
        })?;

        if !resp.status.is_success() {
            return Err(UploadError::NegotiationFailed(format!(
                "could not post to {}: http status {} {}",
                endpoint,
                resp.status,
                resp.body_text()
            )));
        }

        let location = resp
            .header(HEADER_LOCATION)
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or_else(|| {
                UploadError::NegotiationFailed(format!(
                    "could not get url for file resource from {}: response has no {} header",
                    endpoint, HEADER_LOCATION
                ))
            })?;

        self.resolve_location(location)
    }

    /// Absolute locations are kept verbatim; relative ones resolve against the endpoint.
    /// A schemeless `host:port/path` borrows the endpoint's scheme.
    fn resolve_location(&self, location: &str) -> Result<String, UploadError> {
        let resolved = match Url::parse(location) {
            Ok(url) if self.is_transfer_scheme(url.scheme()) => return Ok(location.to_string()),
            Ok(_) => self.endpoint.join(&format!("//{}", location)),
            Err(_) => self.endpoint.join(location),
        };
        resolved
            .map(|u| u.to_string())
            .map_err(|e| UploadError::NegotiationFailed(format!("invalid location {:?}: {}", location, e)))
    }

    fn is_transfer_scheme(&self, scheme: &str) -> bool {
        matches!(scheme, "http" | "https") || scheme == self.endpoint.scheme()
    }

    /// Protocol headers plus caller headers. Names are lowercased so a caller
    /// header replaces a protocol header regardless of spelling.
    fn request_headers(&self, protocol: &[(&str, String)]) -> HashMap<String, String> {
        let mut headers: HashMap<String, String> = protocol
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();
        for (k, v) in &self.options.headers {
            headers.insert(k.to_ascii_lowercase(), v.clone());
        }
        headers
    }

    async fn query_offset(&self, location: &str) -> Result<u64, UploadError> {
        let resp = self
            .transport
            .head(location, &self.request_headers(&[]))
            .await
            .map_err(|e| {
                UploadError::NegotiationFailed(format!("could not head at file resource {}: {:#}", location, e))
            })?;

        if resp.status == StatusCode::NOT_FOUND {
            return Err(UploadError::StaleResource(location.to_string()));
        }
        if !resp.status.is_success() {
            return Err(UploadError::NegotiationFailed(format!(
                "could not head at file resource {}: http status {}",
                location, resp.status
            )));
        }

        let offset = match resp.header(HEADER_OFFSET) {
            None => 0,
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                UploadError::NegotiationFailed(format!("malformed {} header {:?} from {}", HEADER_OFFSET, raw, location))
            })?,
        };
        if offset > self.file_size {
            return Err(UploadError::NegotiationFailed(format!(
                "server reports offset {} beyond file size {}",
                offset, self.file_size
            )));
        }
        Ok(offset)
    }

    async fn transfer_chunk(&mut self, chunk: ChunkRange) -> Result<(), UploadError> {
        debug_assert_eq!(chunk.start(), self.bytes_written);
        let location = self.location()?.to_string();

        let data = self.source.read_range(chunk).await.map_err(|e| UploadError::SourceRead {
            start: chunk.start(),
            end: chunk.end(),
            message: format!("{:#}", e),
        })?;
        if data.len() as u64 != chunk.len() {
            return Err(UploadError::SourceRead {
                start: chunk.start(),
                end: chunk.end(),
                message: format!("short read of {} bytes", data.len()),
            });
        }

        let headers = self.request_headers(&[
            (HEADER_OFFSET, chunk.start().to_string()),
            (HEADER_CONTENT_TYPE, OFFSET_OCTET_STREAM.to_string()),
        ]);

        let sent = data.len() as u64;
        debug!(session = %self.id, chunk = %chunk, "sending chunk");
        let resp = self
            .transport
            .patch(&location, &headers, data)
            .await
            .map_err(|e| UploadError::ChunkTransferFailed {
                offset: chunk.start(),
                status: None,
                message: format!("{:#}", e),
            })?;

        if !resp.status.is_success() {
            return Err(UploadError::ChunkTransferFailed {
                offset: chunk.start(),
                status: Some(resp.status),
                message: resp.body_text(),
            });
        }

        self.bytes_written += sent;
        debug_assert!(self.bytes_written <= self.file_size);
        self.report_progress(self.bytes_written);
        Ok(())
    }

    fn location(&self) -> Result<&str, UploadError> {
        self.resource_location
            .as_deref()
            .ok_or_else(|| UploadError::Aborted("transfer started without a resource location".to_string()))
    }

    fn set_location(&mut self, location: String, offset: u64, resumed: bool) {
        let _ = self.events.send(UploadEvent::ResourceReady {
            session_id: self.id,
            location: location.clone(),
            offset,
            resumed,
        });
        self.resource_location = Some(location);
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!(session = %self.id, from = ?self.state, to = ?state, "state change");
        self.state = state;
        let _ = self.events.send(UploadEvent::StateChanged { session_id: self.id, state });
    }

    /// Emits `bytes_written` unless it equals the last emitted value.
    fn report_progress(&mut self, bytes_written: u64) {
        if self.last_reported == Some(bytes_written) {
            return;
        }
        self.last_reported = Some(bytes_written);
        let _ = self.events.send(UploadEvent::Progress {
            session_id: self.id,
            bytes_written,
            total: self.file_size,
        });
    }
}
