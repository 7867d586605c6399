//! The Transport Contract: an interface producing an `HttpResponse`
//! from an `HttpRequest`. The concrete wire format each provider speaks is
//! out of scope here — this module only fixes the request/response shape
//! and supplies a pooled `reqwest`-backed default implementation.

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util_shim::CancellationToken;

use crate::bridge::error::{BridgeError, ErrorKind};

lazy_static! {
    /// One pooled client shared by every provider plugin's default
    /// transport: connection reuse across requests instead of a fresh
    /// client (and fresh TLS handshake) per call.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(32)
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .expect("failed to build shared reqwest client");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub cancellation: CancellationToken,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        HttpRequest {
            url: url.into(),
            method,
            headers: HashMap::new(),
            body: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_json_body(mut self, value: &serde_json::Value) -> Self {
        self.body = Some(serde_json::to_vec(value).unwrap_or_default());
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Consumed by provider plugins: one call exchanges a full request/response,
/// the other yields a raw byte stream for SSE parsing.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, BridgeError>;

    async fn stream(&self, request: HttpRequest) -> Result<BoxStream<'static, Result<Vec<u8>, BridgeError>>, BridgeError>;
}

/// Default `reqwest`-backed transport implementation of the provider-agnostic
/// `Transport` trait.
pub struct ReqwestTransport;

impl ReqwestTransport {
    pub fn new() -> Self {
        ReqwestTransport
    }

    fn build_request(&self, request: &HttpRequest) -> reqwest::RequestBuilder {
        let mut builder = SHARED_HTTP_CLIENT.request(request.method.to_reqwest(), &request.url);
        for (k, v) in &request.headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        builder
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, BridgeError> {
        if request.cancellation.is_cancelled() {
            return Err(BridgeError::new(ErrorKind::Timeout, "request cancelled before send"));
        }
        let builder = self.build_request(&request);
        let response = tokio::select! {
            res = builder.send() => res.map_err(|e| transport_error(&e))?,
            _ = request.cancellation.cancelled() => {
                return Err(BridgeError::new(ErrorKind::Timeout, "request cancelled"));
            }
        };
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(&e))?
            .to_vec();
        Ok(HttpResponse { status, headers, body })
    }

    async fn stream(&self, request: HttpRequest) -> Result<BoxStream<'static, Result<Vec<u8>, BridgeError>>, BridgeError> {
        let builder = self.build_request(&request);
        let response = builder.send().await.map_err(|e| transport_error(&e))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.bytes().await.unwrap_or_default();
            return Err(BridgeError::new(
                ErrorKind::Provider,
                format!("streaming request failed with status {}", status),
            )
            .with_context("body", String::from_utf8_lossy(&body)));
        }
        let byte_stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(|e| transport_error(&e)));
        Ok(byte_stream.boxed())
    }
}

fn transport_error(e: &reqwest::Error) -> BridgeError {
    if e.is_timeout() {
        BridgeError::new(ErrorKind::Timeout, e.to_string())
    } else {
        BridgeError::new(ErrorKind::Transport, e.to_string())
    }
}

/// A tiny cancellation-token shim so this module does not need to pull in
/// `tokio-util` solely for `CancellationToken`; the real thing is a thin
/// wrapper over a shared atomic flag plus a notify, which is all callers of
/// this crate need.
mod tokio_util_shim {
    use std::sync::Arc;
    use tokio::sync::Notify;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Clone)]
    pub struct CancellationToken {
        cancelled: Arc<AtomicBool>,
        notify: Arc<Notify>,
    }

    impl CancellationToken {
        pub fn new() -> Self {
            CancellationToken {
                cancelled: Arc::new(AtomicBool::new(false)),
                notify: Arc::new(Notify::new()),
            }
        }

        pub fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
            self.notify.notify_waiters();
        }

        pub fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }

        pub async fn cancelled(&self) {
            if self.is_cancelled() {
                return;
            }
            self.notify.notified().await;
        }
    }

    impl Default for CancellationToken {
        fn default() -> Self {
            Self::new()
        }
    }

    impl std::fmt::Debug for CancellationToken {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "CancellationToken({})", self.is_cancelled())
        }
    }
}

pub use tokio_util_shim::CancellationToken;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_request_builder_sets_json_body() {
        let req = HttpRequest::new(HttpMethod::Post, "https://example.test/x")
            .with_json_body(&serde_json::json!({"a": 1}));
        assert_eq!(req.headers.get("Content-Type").map(String::as_str), Some("application/json"));
        assert!(req.body.is_some());
    }

    #[test]
    fn cancellation_token_reports_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }
}
