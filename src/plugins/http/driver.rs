use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::Method;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::plugins::registry::{DriverContext, Transport, TransportResponse};

pub struct HttpTransport {
    client: reqwest::Client,
    user_agent: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(ctx: &DriverContext) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self {
            client,
            user_agent: ctx.user_agent.clone(),
            timeout: Duration::from_secs(ctx.timeout_secs.max(1)),
        })
    }

    fn build_headers(&self, headers: &HashMap<String, String>) -> anyhow::Result<HeaderMap> {
        let mut h = HeaderMap::new();
        h.insert(USER_AGENT, HeaderValue::from_str(&self.user_agent)?);
        for (k, v) in headers {
            let name = HeaderName::from_bytes(k.as_bytes())?;
            let value = HeaderValue::from_str(v)?;
            h.insert(name, value);
        }
        Ok(h)
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<Bytes>,
    ) -> anyhow::Result<TransportResponse> {
        let headers = self.build_headers(headers)?;
        let mut req = self
            .client
            .request(method.clone(), url)
            .headers(headers)
            .timeout(self.timeout);
        if let Some(b) = body {
            req = req.body(b);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = if method == Method::HEAD { Bytes::new() } else { resp.bytes().await? };
        debug!(%method, url, %status, "http request finished");

        Ok(TransportResponse { status, headers, body })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str { "http-transport" }

    fn supports(&self, endpoint: &Url) -> bool {
        matches!(endpoint.scheme(), "http" | "https")
    }

    async fn post(&self, url: &str, headers: &HashMap<String, String>) -> anyhow::Result<TransportResponse> {
        self.send(Method::POST, url, headers, None).await
    }

    async fn head(&self, url: &str, headers: &HashMap<String, String>) -> anyhow::Result<TransportResponse> {
        self.send(Method::HEAD, url, headers, None).await
    }

    async fn patch(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        body: Bytes,
    ) -> anyhow::Result<TransportResponse> {
        self.send(Method::PATCH, url, headers, Some(body)).await
    }
}
