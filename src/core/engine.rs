use crate::core::error::UploadError;
use crate::core::events::UploadEvent;
use crate::core::model::{Fingerprint, UploadOptions, UploadOutcome};
use crate::core::session::UploadSession;
use crate::core::source::UploadSource;
use crate::core::store::{ResumeCache, ResumeStore};
use crate::plugins::registry::Transport;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Starts upload sessions against one transport and one resume store.
#[derive(Clone)]
pub struct Uploader {
    transport: Arc<dyn Transport>,
    cache: ResumeCache,
}

impl Uploader {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn ResumeStore>) -> Self {
        Self { transport, cache: ResumeCache::new(store) }
    }

    /// Validates `options` and spawns the session on the current tokio runtime.
    pub fn start(
        &self,
        source: Arc<dyn UploadSource>,
        options: UploadOptions,
    ) -> Result<UploadHandle, UploadError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let mut session = UploadSession::new(
            source,
            self.transport.clone(),
            self.cache.clone(),
            options,
            event_tx,
            cancel.clone(),
        )?;
        info!(
            session = %session.id(),
            fingerprint = %session.fingerprint(),
            transport = self.transport.name(),
            "starting upload"
        );

        let task = tokio::spawn(async move { session.run().await });

        Ok(UploadHandle { events: event_rx, task, cancel })
    }

    /// Drops the cached resource location, so the next upload of this file starts over.
    pub async fn forget(&self, fingerprint: &Fingerprint) {
        self.cache.clear(fingerprint).await;
    }

    pub async fn cached_location(&self, fingerprint: &Fingerprint) -> Option<String> {
        self.cache.get(fingerprint).await
    }
}

/// Caller side of a running session: event stream, cancellation and the final outcome.
pub struct UploadHandle {
    events: mpsc::UnboundedReceiver<UploadEvent>,
    task: JoinHandle<Result<UploadOutcome, UploadError>>,
    cancel: CancellationToken,
}

impl UploadHandle {
    /// Next event, or `None` once the session has finished and the stream is drained.
    pub async fn next_event(&mut self) -> Option<UploadEvent> {
        self.events.recv().await
    }

    /// Requests cooperative cancellation; a chunk already on the wire still completes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> Result<UploadOutcome, UploadError> {
        self.task
            .await
            .map_err(|e| UploadError::Aborted(e.to_string()))?
    }
}
