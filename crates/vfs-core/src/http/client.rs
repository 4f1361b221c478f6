//! The injected HTTP transport (spec §1 Non-goals: "the concrete HTTP client").

use async_trait::async_trait;
use bytes::Bytes;

use super::CallOpts;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Adapters supply a concrete transport; the core only needs to execute one
/// request and, on failure, decode the body into a typed [`Error`] (spec
/// §4.1 "Error decoder").
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    async fn execute(&self, opts: CallOpts) -> Result<HttpResponse>;

    /// Decode a non-2xx response into a typed error. If the body is binary
    /// (e.g. an image payload on a 404), implementations should replace it
    /// with a fixed descriptive string rather than attempt JSON parsing.
    fn decode_error(&self, resp: HttpResponse) -> Error {
        let message = match std::str::from_utf8(&resp.body) {
            Ok(s) if !s.is_empty() => s.to_string(),
            _ => "<binary response body>".to_string(),
        };
        Error::Provider {
            code: resp.status.to_string(),
            message,
            status: resp.status,
        }
    }
}

#[cfg(feature = "reqwest-client")]
pub mod reqwest_client {
    use super::*;
    use crate::http::http_method::Method;

    pub struct ReqwestClient {
        inner: reqwest::Client,
    }

    impl ReqwestClient {
        pub fn new(inner: reqwest::Client) -> Self {
            Self { inner }
        }
    }

    #[async_trait]
    impl HttpClient for ReqwestClient {
        async fn execute(&self, opts: CallOpts) -> Result<HttpResponse> {
            let method = match opts.method {
                Method::Get => reqwest::Method::GET,
                Method::Post => reqwest::Method::POST,
                Method::Put => reqwest::Method::PUT,
                Method::Patch => reqwest::Method::PATCH,
                Method::Delete => reqwest::Method::DELETE,
                Method::Head => reqwest::Method::HEAD,
            };
            let mut req = self.inner.request(method, opts.full_url());
            for (k, v) in &opts.headers {
                req = req.header(k, v);
            }
            if let Some(body) = opts.body {
                req = req.body(body);
            }
            let resp = req.send().await?;
            let status = resp.status().as_u16();
            let headers = resp
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
                .collect();
            let body = if opts.no_response_body {
                Bytes::new()
            } else {
                resp.bytes().await?
            };
            Ok(HttpResponse { status, headers, body })
        }
    }
}

#[cfg(feature = "reqwest-client")]
pub use reqwest_client::ReqwestClient;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// A deterministic mock client that replays a fixed sequence of
    /// responses, one per call — enough to drive the pacer/retry tests
    /// without a real transport.
    pub struct MockClient {
        responses: Mutex<std::collections::VecDeque<Result<HttpResponse>>>,
    }

    impl MockClient {
        pub fn sequence(responses: Vec<Result<HttpResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl HttpClient for MockClient {
        async fn execute(&self, _opts: CallOpts) -> Result<HttpResponse> {
            let mut q = self.responses.lock().unwrap();
            q.pop_front()
                .unwrap_or_else(|| Err(Error::Other("mock exhausted".into())))
        }
    }
}
