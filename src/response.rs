//! Response wrapper that keeps the parsed body together with how it was obtained.

use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// A successful logical call.
///
/// Besides the parsed body this records which host answered, how many attempts
/// it took and whether the body came from the response cache.
///
/// # Examples
///
/// ```no_run
/// use switchyard::{CallKind, Host, Request, RequestOptions, Transporter};
/// use http::Method;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct SearchResult {
///     hits: Vec<serde_json::Value>,
/// }
///
/// # async fn example() -> Result<(), switchyard::Error> {
/// let transporter = Transporter::builder()
///     .host(Host::new("search.example.com", CallKind::ReadWrite))
///     .build()?;
///
/// let request = Request::read(Method::POST, "1/indexes/products/query").cacheable(true);
/// let response = transporter
///     .read::<SearchResult>(request, RequestOptions::default())
///     .await?;
///
/// println!("{} hits", response.data.hits.len());
/// println!("Answered by {:?} after {} attempts", response.host, response.attempts);
/// if response.from_cache {
///     println!("Served from cache");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The deserialized response data.
    pub data: T,

    /// The raw response body.
    pub raw_body: String,

    /// The HTTP status code. Cache hits report `200 OK`.
    pub status: StatusCode,

    /// The response headers. Empty for cache hits.
    pub headers: HeaderMap,

    /// Time from the start of the logical call until the answer, across all
    /// attempts.
    pub latency: Duration,

    /// The number of hosts attempted. `0` for cache hits.
    pub attempts: usize,

    /// The url of the host that answered. `None` for cache hits.
    pub host: Option<String>,

    /// Whether the body was served from the response cache.
    pub from_cache: bool,
}

impl<T> Response<T> {
    /// Creates a response received from a host.
    pub fn new(
        data: T,
        raw_body: String,
        status: StatusCode,
        headers: HeaderMap,
        latency: Duration,
        attempts: usize,
        host: impl Into<String>,
    ) -> Self {
        Self {
            data,
            raw_body,
            status,
            headers,
            latency,
            attempts,
            host: Some(host.into()),
            from_cache: false,
        }
    }

    /// Creates a response served from the response cache.
    pub fn cached(data: T, raw_body: String, latency: Duration) -> Self {
        Self {
            data,
            raw_body,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            latency,
            attempts: 0,
            host: None,
            from_cache: true,
        }
    }

    /// Maps the response data, keeping the metadata.
    ///
    /// # Examples
    ///
    /// ```
    /// # use switchyard::Response;
    /// # use std::time::Duration;
    /// let response = Response::cached(42, "42".to_string(), Duration::ZERO);
    ///
    /// let string_response = response.map(|n| n.to_string());
    /// assert_eq!(string_response.data, "42");
    /// assert!(string_response.from_cache);
    /// ```
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            attempts: self.attempts,
            host: self.host,
            from_cache: self.from_cache,
        }
    }

    /// Returns `true` if more than one host was attempted.
    ///
    /// # Examples
    ///
    /// ```
    /// # use switchyard::Response;
    /// # use http::{HeaderMap, StatusCode};
    /// # use std::time::Duration;
    /// let response = Response::new(
    ///     (),
    ///     String::new(),
    ///     StatusCode::OK,
    ///     HeaderMap::new(),
    ///     Duration::from_millis(100),
    ///     2,
    ///     "b.example.com",
    /// );
    ///
    /// assert!(response.failed_over());
    /// ```
    pub fn failed_over(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}
