use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use thiserror::Error;

/// Failures reported by the request primitive.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// Connection failure or request timeout; eligible for backoff retry.
    #[error("transient transport failure: {0}")]
    Transient(String),
    /// Any other transport failure; surfaced immediately.
    #[error("transport failure: {0}")]
    Fatal(String),
}

/// Response body of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpResponse {
    /// Structured JSON body.
    Json(Value),
    /// Non-structured body, returned verbatim.
    Binary(Vec<u8>),
}

/// Black-box request/response primitive.
///
/// The retry loop and the sync engine only see this trait, which keeps both
/// testable against a scripted in-memory implementation.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn request(
        &self,
        method: &str,
        url: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
    ) -> Result<HttpResponse, HttpError>;
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    async fn request(
        &self,
        method: &str,
        url: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
    ) -> Result<HttpResponse, HttpError> {
        (**self).request(method, url, body, bearer).await
    }
}

const DEFAULT_CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(10_000);

/// [`HttpTransport`] implementation backed by `reqwest`.
///
/// Carries a connect timeout only; long-poll requests hold the connection
/// open well past any sensible total-request timeout.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Fails only when the underlying TLS backend cannot be initialized.
    pub fn new() -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|err| HttpError::Fatal(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn request(
        &self,
        method: &str,
        url: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
    ) -> Result<HttpResponse, HttpError> {
        let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|err| HttpError::Fatal(format!("invalid method '{method}': {err}")))?;

        let mut request = self.client.request(method, url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"));

        if is_json {
            let value = response.json::<Value>().await.map_err(map_reqwest_error)?;
            Ok(HttpResponse::Json(value))
        } else {
            let bytes = response.bytes().await.map_err(map_reqwest_error)?;
            Ok(HttpResponse::Binary(bytes.to_vec()))
        }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> HttpError {
    if err.is_timeout() || err.is_connect() {
        HttpError::Transient(err.to_string())
    } else {
        HttpError::Fatal(err.to_string())
    }
}
