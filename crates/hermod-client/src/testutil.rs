use std::{
    collections::VecDeque,
    sync::Mutex,
};

use async_trait::async_trait;
use serde_json::Value;

use crate::http::{HttpError, HttpResponse, HttpTransport};

/// One request observed by the mock, for assertions.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub body: Option<Value>,
    pub bearer: Option<String>,
}

/// Scripted transport: responses are served in push order, requests recorded.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_json(&self, value: Value) {
        self.push(Ok(HttpResponse::Json(value)));
    }

    pub fn push_binary(&self, bytes: Vec<u8>) {
        self.push(Ok(HttpResponse::Binary(bytes)));
    }

    pub fn push_transient(&self, detail: &str) {
        self.push(Err(HttpError::Transient(detail.to_owned())));
    }

    pub fn push_fatal(&self, detail: &str) {
        self.push(Err(HttpError::Fatal(detail.to_owned())));
    }

    fn push(&self, entry: Result<HttpResponse, HttpError>) {
        self.script
            .lock()
            .expect("script lock must not be poisoned")
            .push_back(entry);
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .expect("request lock must not be poisoned")
            .len()
    }

    pub fn recorded(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .expect("request lock must not be poisoned")
            .clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn request(
        &self,
        method: &str,
        url: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
    ) -> Result<HttpResponse, HttpError> {
        self.requests
            .lock()
            .expect("request lock must not be poisoned")
            .push(RecordedRequest {
                method: method.to_owned(),
                url: url.to_owned(),
                body: body.cloned(),
                bearer: bearer.map(ToOwned::to_owned),
            });

        self.script
            .lock()
            .expect("script lock must not be poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(HttpError::Fatal("mock script exhausted".to_owned())))
    }
}
