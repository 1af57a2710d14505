use async_trait::async_trait;
use bytes::Bytes;
use clap::{ArgMatches, Command};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: StatusCode) -> Self {
        Self { status, headers: HeaderMap::new(), body: Bytes::new() }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Body as lossy UTF-8, for error messages.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).trim().to_string()
    }
}

/// Performs the three requests the upload protocol needs.
///
/// Non-2xx answers are returned as `Ok`; `Err` means no response was obtained.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;
    fn supports(&self, endpoint: &Url) -> bool;

    async fn post(&self, url: &str, headers: &HashMap<String, String>) -> anyhow::Result<TransportResponse>;

    async fn head(&self, url: &str, headers: &HashMap<String, String>) -> anyhow::Result<TransportResponse>;

    async fn patch(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        body: Bytes,
    ) -> anyhow::Result<TransportResponse>;
}

#[derive(Debug, Clone)]
pub struct DriverContext {
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for DriverContext {
    fn default() -> Self {
        Self {
            user_agent: "OrangeUploader/0.1".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadCliConfig {
    pub headers: HashMap<String, String>,
    pub driver_ctx: DriverContext,
}

pub trait CliPlugin: Send + Sync {
    fn name(&self) -> &'static str;
    fn augment_upload_command(&self, cmd: Command) -> Command;
    fn apply_upload_matches(&self, matches: &ArgMatches, cfg: &mut UploadCliConfig) -> anyhow::Result<()>;
}

pub struct PluginRegistry {
    transports: Vec<Arc<dyn Transport>>,
    cli_plugins: Vec<Box<dyn CliPlugin>>,
}

impl PluginRegistry {
    pub fn with_defaults() -> Self {
        let mut reg = Self { transports: vec![], cli_plugins: vec![] };
        reg.cli_plugins.push(Box::new(crate::plugins::http::cli::HttpCliPlugin::new()));
        reg
    }

    /// Builds the default transports once CLI flags are known.
    pub fn install_transports(&mut self, ctx: &DriverContext) -> anyhow::Result<()> {
        self.transports
            .push(Arc::new(crate::plugins::http::driver::HttpTransport::new(ctx)?));
        Ok(())
    }

    pub fn register_transport(&mut self, transport: Arc<dyn Transport>) {
        self.transports.push(transport);
    }

    pub fn augment_upload_command(&self, cmd: Command) -> Command {
        self.cli_plugins
            .iter()
            .fold(cmd, |c, p| p.augment_upload_command(c))
    }

    pub fn apply_upload_matches(&self, matches: &ArgMatches, cfg: &mut UploadCliConfig) -> anyhow::Result<()> {
        for p in &self.cli_plugins {
            p.apply_upload_matches(matches, cfg)?;
        }
        Ok(())
    }

    pub fn transport_for(&self, endpoint: &Url) -> Option<Arc<dyn Transport>> {
        self.transports.iter().find(|t| t.supports(endpoint)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::MockTransport;

    #[test]
    fn picks_transport_by_scheme() {
        let mut reg = PluginRegistry::with_defaults();
        reg.install_transports(&DriverContext::default()).unwrap();

        let http = Url::parse("https://uploads.example.com/files/").unwrap();
        assert_eq!(reg.transport_for(&http).unwrap().name(), "http-transport");

        let ftp = Url::parse("ftp://uploads.example.com/files/").unwrap();
        assert!(reg.transport_for(&ftp).is_none());
    }

    #[test]
    fn registered_transport_is_found() {
        let mut reg = PluginRegistry::with_defaults();
        reg.register_transport(Arc::new(MockTransport::new()));
        let url = Url::parse("mock://server/files").unwrap();
        assert_eq!(reg.transport_for(&url).unwrap().name(), "mock-transport");
    }

    #[test]
    fn response_header_lookup_is_case_insensitive() {
        let mut resp = TransportResponse::new(StatusCode::CREATED);
        resp.headers.insert("location", "http://host/files/1".parse().unwrap());
        assert_eq!(resp.header("Location"), Some("http://host/files/1"));
        assert_eq!(resp.header("Offset"), None);
    }
}
