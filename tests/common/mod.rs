//! Scripted requester shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use http::StatusCode;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use switchyard::requester::{HttpRequest, HttpResponse, Requester, RequesterError};
use switchyard::{CallKind, Host};

type Handler = dyn Fn(&HttpRequest) -> Result<HttpResponse, RequesterError> + Send + Sync;

/// Records every attempt and answers with a caller-supplied handler.
pub struct MockRequester {
    handler: Box<Handler>,
    delay: Option<Duration>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockRequester {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, RequesterError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            delay: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Like [`MockRequester::new`], but every attempt sleeps first.
    pub fn delayed<F>(delay: Duration, handler: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, RequesterError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            delay: Some(delay),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Answers every attempt with `200` and the given body.
    pub fn ok(body: &'static str) -> Arc<Self> {
        Self::new(move |_| Ok(HttpResponse::new(StatusCode::OK, body)))
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn hosts_attempted(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.host.url.clone())
            .collect()
    }
}

#[async_trait]
impl Requester for MockRequester {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, RequesterError> {
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.handler)(&request)
    }
}

pub fn read_host(url: &str, priority: u32) -> Host {
    Host::new(url, CallKind::Read).with_priority(priority)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("switchyard=debug")
        .with_test_writer()
        .try_init();
}
