//! Scripted collaborators shared by the session and engine tests.

use crate::core::store::ResumeStore;
use crate::plugins::registry::{Transport, TransportResponse};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use url::Url;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

type RequestHook = Box<dyn Fn(&RecordedRequest) + Send + Sync>;

/// Answers requests from a FIFO script. Once the script runs dry, PATCH
/// succeeds with 204 and anything else fails as a transport error.
/// The optional hook sees every request before it is answered.
pub struct MockTransport {
    script: Mutex<VecDeque<anyhow::Result<TransportResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    on_request: Option<RequestHook>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            on_request: None,
        }
    }

    pub fn with_hook(mut self, hook: impl Fn(&RecordedRequest) + Send + Sync + 'static) -> Self {
        self.on_request = Some(Box::new(hook));
        self
    }

    pub fn push(&self, resp: TransportResponse) -> &Self {
        self.script.lock().unwrap().push_back(Ok(resp));
        self
    }

    pub fn push_status(&self, status: StatusCode) -> &Self {
        self.push(TransportResponse::new(status))
    }

    pub fn push_created(&self, location: &str) -> &Self {
        self.push(response_with(StatusCode::CREATED, &[("Location", location)]))
    }

    pub fn push_offset(&self, offset: u64) -> &Self {
        self.push(response_with(StatusCode::OK, &[("Offset", &offset.to_string())]))
    }

    pub fn push_error(&self, message: &str) -> &Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(anyhow::anyhow!(message.to_string())));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<&'static str> {
        self.requests().iter().map(|r| r.method).collect()
    }

    pub fn patches(&self) -> Vec<RecordedRequest> {
        self.requests().into_iter().filter(|r| r.method == "PATCH").collect()
    }

    fn answer(
        &self,
        method: &'static str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Bytes,
    ) -> anyhow::Result<TransportResponse> {
        let req = RecordedRequest { method, url: url.to_string(), headers: headers.clone(), body };
        self.requests.lock().unwrap().push(req.clone());
        if let Some(hook) = &self.on_request {
            hook(&req);
        }

        match self.script.lock().unwrap().pop_front() {
            Some(r) => r,
            None if method == "PATCH" => Ok(TransportResponse::new(StatusCode::NO_CONTENT)),
            None => Err(anyhow::anyhow!("no scripted response for {} {}", method, url)),
        }
    }
}

pub fn response_with(status: StatusCode, headers: &[(&str, &str)]) -> TransportResponse {
    let mut resp = TransportResponse::new(status);
    for (k, v) in headers {
        let name = reqwest::header::HeaderName::from_bytes(k.as_bytes()).unwrap();
        resp.headers.insert(name, v.parse().unwrap());
    }
    resp
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock-transport"
    }

    fn supports(&self, endpoint: &Url) -> bool {
        endpoint.scheme() == "mock"
    }

    async fn post(&self, url: &str, headers: &HashMap<String, String>) -> anyhow::Result<TransportResponse> {
        self.answer("POST", url, headers, Bytes::new())
    }

    async fn head(&self, url: &str, headers: &HashMap<String, String>) -> anyhow::Result<TransportResponse> {
        self.answer("HEAD", url, headers, Bytes::new())
    }

    async fn patch(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        body: Bytes,
    ) -> anyhow::Result<TransportResponse> {
        self.answer("PATCH", url, headers, body)
    }
}

/// Reads work, writes always fail (e.g. quota exhausted).
#[derive(Default)]
pub struct ReadOnlyStore;

#[async_trait]
impl ResumeStore for ReadOnlyStore {
    async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
        anyhow::bail!("quota exceeded")
    }

    async fn remove(&self, _key: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Every read fails; writes and deletes succeed.
#[derive(Default)]
pub struct UnreadableStore;

#[async_trait]
impl ResumeStore for UnreadableStore {
    async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
        anyhow::bail!("disk I/O error")
    }

    async fn set(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn remove(&self, _key: &str) -> anyhow::Result<()> {
        Ok(())
    }
}
