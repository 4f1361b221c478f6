//! HTTP call pipeline: `Pacer` + `RetryClassifier` + `ErrorDecoder` + typed
//! `Call`/`CallJSON` wrappers (spec §4.1).
//!
//! The concrete transport is injected (spec §1 Non-goals); this module only
//! defines [`HttpClient`], the retry/error-decoding policy around it, and the
//! typed request/response wrappers every adapter calls through.

mod classifier;
mod client;

pub use classifier::{RetryClassifier, RetryDecision, TokenRenewer};
pub use client::{HttpClient, HttpResponse};

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::pacer::{Pacer, PacerOutcome};

/// One HTTP request, method-agnostic (spec §4.1: "method, path, base URL,
/// query parameters, headers, optional body").
#[derive(Debug, Clone)]
pub struct CallOpts {
    pub method: http_method::Method,
    pub base_url: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub content_length: Option<u64>,
    /// If set, the response body is not read (e.g. `DELETE` with empty reply).
    pub no_response_body: bool,
}

pub mod http_method {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Method {
        Get,
        Post,
        Put,
        Patch,
        Delete,
        Head,
    }
}

impl CallOpts {
    pub fn new(method: http_method::Method, base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method,
            base_url: base_url.into(),
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            content_length: None,
            no_response_body: false,
        }
    }

    pub fn full_url(&self) -> String {
        let mut url = format!("{}{}", self.base_url.trim_end_matches('/'), self.path);
        if !self.query.is_empty() {
            let qs = self
                .query
                .iter()
                .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(v)))
                .collect::<Vec<_>>()
                .join("&");
            url.push('?');
            url.push_str(&qs);
        }
        url
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// The HTTP call pipeline itself: a client, a pacer, a retry classifier and
/// an error decoder, bound together for one `FsHandle`.
pub struct CallPipeline<C: HttpClient> {
    client: C,
    pacer: Arc<Pacer>,
    classifier: RetryClassifier,
    renewer: Option<Arc<dyn TokenRenewer>>,
}

impl<C: HttpClient> CallPipeline<C> {
    pub fn new(client: C, pacer: Arc<Pacer>, classifier: RetryClassifier) -> Self {
        Self {
            client,
            pacer,
            classifier,
            renewer: None,
        }
    }

    pub fn with_token_renewer(mut self, renewer: Arc<dyn TokenRenewer>) -> Self {
        self.renewer = Some(renewer);
        self
    }

    /// Perform one HTTP round trip, retrying through the pacer per the
    /// retry classifier, and decoding non-2xx bodies through
    /// `C::decode_error`.
    #[instrument(skip(self, opts), fields(path = %opts.path))]
    pub async fn call(&self, opts: CallOpts) -> Result<HttpResponse> {
        self.pacer
            .call(|| async {
                match self.client.execute(opts.clone()).await {
                    Ok(resp) if resp.status < 400 => PacerOutcome::Done(resp),
                    Ok(resp) => {
                        let decision = self.classifier.classify(&resp);
                        match decision {
                            RetryDecision::RetryAfter(d) => PacerOutcome::Retry {
                                err: self.client.decode_error(resp),
                                after: Some(d),
                            },
                            RetryDecision::Retry => PacerOutcome::Retry {
                                err: self.client.decode_error(resp),
                                after: None,
                            },
                            RetryDecision::RenewTokenAndRetry => {
                                // A retry only if a renewer is actually installed to act
                                // on it (spec §4.1: 401 retries require both conditions);
                                // otherwise this 401 can never resolve, so fail fast.
                                match &self.renewer {
                                    Some(renewer) => {
                                        renewer.expire_token();
                                        PacerOutcome::Retry {
                                            err: Error::AuthExpired,
                                            after: None,
                                        }
                                    }
                                    None => PacerOutcome::Fatal(self.client.decode_error(resp)),
                                }
                            }
                            RetryDecision::Fatal => PacerOutcome::Fatal(self.client.decode_error(resp)),
                        }
                    }
                    Err(e) if e.is_retryable() => PacerOutcome::Retry { err: e, after: None },
                    Err(e) => PacerOutcome::Fatal(e),
                }
            })
            .await
    }

    pub async fn call_json<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        mut opts: CallOpts,
        body: Option<&Req>,
    ) -> Result<Resp> {
        if let Some(b) = body {
            let encoded = serde_json::to_vec(b)?;
            opts.content_length = Some(encoded.len() as u64);
            opts.body = Some(Bytes::from(encoded));
            opts.headers.push(("Content-Type".into(), "application/json".into()));
        }
        let resp = self.call(opts).await?;
        debug!(status = resp.status, "call_json response");
        if resp.body.is_empty() {
            return Err(Error::Other("empty response body for CallJSON".into()));
        }
        Ok(serde_json::from_slice(&resp.body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::client::tests::MockClient;
    use std::sync::Arc;

    #[tokio::test]
    async fn non_retryable_4xx_is_reported_without_retry() {
        let client = MockClient::sequence(vec![Ok(HttpResponse {
            status: 404,
            headers: vec![],
            body: Bytes::from_static(b"not found"),
        })]);
        let pipeline = CallPipeline::new(
            client,
            Arc::new(Pacer::zero_delay()),
            RetryClassifier::default(),
        );
        let result = pipeline
            .call(CallOpts::new(http_method::Method::Get, "http://x", "/y"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn expired_401_without_renewer_fails_fast() {
        // Only one response queued: if this retried, the pacer would hit
        // "mock exhausted" on its second attempt instead of the 401 itself.
        let client = MockClient::sequence(vec![Ok(HttpResponse {
            status: 401,
            headers: vec![],
            body: Bytes::new(),
        })]);
        let pipeline = CallPipeline::new(
            client,
            Arc::new(Pacer::zero_delay()),
            RetryClassifier::default(),
        );
        let result = pipeline
            .call(CallOpts::new(http_method::Method::Get, "http://x", "/y"))
            .await;
        match result {
            Err(Error::Provider { status, .. }) => assert_eq!(status, 401),
            other => panic!("expected a fatal 401, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retries_on_429_then_succeeds() {
        let client = MockClient::sequence(vec![
            Ok(HttpResponse {
                status: 429,
                headers: vec![("Retry-After".into(), "0".into())],
                body: Bytes::new(),
            }),
            Ok(HttpResponse {
                status: 200,
                headers: vec![],
                body: Bytes::from_static(b"ok"),
            }),
        ]);
        let pipeline = CallPipeline::new(
            client,
            Arc::new(Pacer::zero_delay()),
            RetryClassifier::default(),
        );
        let resp = pipeline
            .call(CallOpts::new(http_method::Method::Get, "http://x", "/y"))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
    }
}
