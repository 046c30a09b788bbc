//! The HTTP primitive the transporter drives.
//!
//! The transporter never talks to the network itself: every attempt goes through a
//! [`Requester`]. [`ReqwestRequester`] is the default; tests and embedders can
//! supply their own.

use crate::{Error, Host, Result};
use async_trait::async_trait;
use http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, Method, StatusCode};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// One attempt against one host.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// The host being attempted.
    pub host: Host,
    /// The HTTP method.
    pub method: Method,
    /// The path relative to the host.
    pub path: String,
    /// The serialized JSON body, if any.
    pub body: Option<String>,
    /// The merged headers.
    pub headers: HeaderMap,
    /// The merged query parameters.
    pub query_parameters: BTreeMap<String, String>,
    /// Budget for establishing the connection.
    pub connect_timeout: Duration,
    /// Budget for receiving the response once connected.
    pub response_timeout: Duration,
}

impl HttpRequest {
    /// Renders the full URL of this attempt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the host and path do not form a URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use switchyard::{CallKind, Host, requester::HttpRequest};
    /// use std::collections::BTreeMap;
    /// use std::time::Duration;
    ///
    /// let mut query_parameters = BTreeMap::new();
    /// query_parameters.insert("x-algolia-agent".to_string(), "Switchyard (0.1.0)".to_string());
    ///
    /// let request = HttpRequest {
    ///     host: Host::new("search.example.com", CallKind::Read),
    ///     method: http::Method::GET,
    ///     path: "1/indexes".to_string(),
    ///     body: None,
    ///     headers: http::HeaderMap::new(),
    ///     query_parameters,
    ///     connect_timeout: Duration::from_secs(2),
    ///     response_timeout: Duration::from_secs(5),
    /// };
    ///
    /// assert_eq!(
    ///     request.url().unwrap().as_str(),
    ///     "https://search.example.com/1/indexes?x-algolia-agent=Switchyard+%280.1.0%29"
    /// );
    /// ```
    pub fn url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.host.base_url())?;
        url.set_path(&self.path);

        if !self.query_parameters.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query_parameters {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }

    /// The total time this attempt may take. Saturates at `Duration::MAX`.
    pub fn total_timeout(&self) -> Duration {
        self.connect_timeout.saturating_add(self.response_timeout)
    }
}

/// What a host answered with. Any status, including errors, is a response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: StatusCode,
    /// The response headers.
    pub headers: HeaderMap,
    /// The raw response body.
    pub body: String,
}

impl HttpResponse {
    /// Creates a response with no headers.
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

/// Failure to obtain any response from a host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequesterError {
    /// The attempt exceeded its timeout budget.
    #[error("request timed out")]
    Timeout,
    /// The connection could not be made or broke.
    #[error("network error: {0}")]
    Network(String),
}

impl From<RequesterError> for Error {
    fn from(err: RequesterError) -> Self {
        match err {
            RequesterError::Timeout => Error::Timeout,
            RequesterError::Network(message) => Error::Network(message),
        }
    }
}

/// Sends one attempt to one host.
///
/// Implementations must honour [`HttpRequest::connect_timeout`] and
/// [`HttpRequest::response_timeout`] and report overruns as
/// [`RequesterError::Timeout`]. Implementations may enforce the two budgets
/// separately or merge them into a single deadline with
/// [`HttpRequest::total_timeout`]. HTTP error statuses are not failures at this level.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use http::StatusCode;
/// use switchyard::requester::{HttpRequest, HttpResponse, Requester, RequesterError};
///
/// struct AlwaysEmpty;
///
/// #[async_trait]
/// impl Requester for AlwaysEmpty {
///     async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, RequesterError> {
///         Ok(HttpResponse::new(StatusCode::OK, r#"{"hits":[]}"#))
///     }
/// }
/// ```
#[async_trait]
pub trait Requester: Send + Sync {
    /// Sends the request and waits for the host's answer.
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, RequesterError>;
}

/// [`Requester`] backed by a shared `reqwest::Client`.
///
/// The connect and response budgets are merged into one per-request deadline
/// ([`HttpRequest::total_timeout`]); the connect phase is not bounded on its own.
/// A saturated budget sends the request without a deadline. To bound connects
/// separately, pass a client built with `reqwest::ClientBuilder::connect_timeout`
/// to [`ReqwestRequester::with_client`].
#[derive(Debug, Clone)]
pub struct ReqwestRequester {
    http_client: reqwest::Client,
}

impl ReqwestRequester {
    /// Creates a requester with a default `reqwest` client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self> {
        let http_client = reqwest::Client::builder().build().map_err(|e| {
            Error::Configuration(format!("Failed to build HTTP client: {}", e))
        })?;
        Ok(Self { http_client })
    }

    /// Wraps an existing `reqwest` client.
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl Requester for ReqwestRequester {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, RequesterError> {
        let url = request
            .url()
            .map_err(|e| RequesterError::Network(e.to_string()))?;

        let mut builder = self.http_client.request(request.method.clone(), url);
        let timeout = request.total_timeout();
        if timeout < Duration::MAX {
            builder = builder.timeout(timeout);
        }

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        if let Some(body) = request.body {
            if !request.headers.contains_key(CONTENT_TYPE) {
                builder = builder.header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(map_reqwest_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> RequesterError {
    if err.is_timeout() {
        RequesterError::Timeout
    } else {
        RequesterError::Network(err.to_string())
    }
}
