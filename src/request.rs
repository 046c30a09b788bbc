//! Request descriptors and per-call options.
//!
//! A [`Request`] says what to call; [`RequestOptions`] carries the caller's
//! overrides. The transporter merges both with its own defaults before any cache
//! lookup or network activity.

use crate::{CallKind, Error, Result};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Describes one logical call.
///
/// # Examples
///
/// ```
/// use switchyard::{CallKind, Request};
/// use http::Method;
/// use serde_json::json;
///
/// let request = Request::read(Method::POST, "1/indexes/products/query")
///     .with_data(json!({ "query": "phone" }))
///     .cacheable(true);
///
/// assert_eq!(request.call, CallKind::Read);
/// assert!(request.cacheable);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// The HTTP method.
    pub method: Method,
    /// The path, relative to the host, without a leading slash.
    pub path: String,
    /// The payload. Object payloads are merged with [`RequestOptions::data`].
    pub data: Option<Value>,
    /// Whether the response may be served from, and stored in, the response cache.
    pub cacheable: bool,
    /// Query parameters specific to this request.
    pub query_parameters: BTreeMap<String, String>,
    /// Which hosts may serve this request.
    pub call: CallKind,
}

impl Request {
    /// Creates a request of the given kind.
    pub fn new(call: CallKind, method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            data: None,
            cacheable: false,
            query_parameters: BTreeMap::new(),
            call,
        }
    }

    /// Creates a request served by read hosts.
    pub fn read(method: Method, path: impl Into<String>) -> Self {
        Self::new(CallKind::Read, method, path)
    }

    /// Creates a request served by write hosts.
    pub fn write(method: Method, path: impl Into<String>) -> Self {
        Self::new(CallKind::Write, method, path)
    }

    /// Sets the payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Serializes `data` and sets it as the payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SerializationFailed`] if `data` cannot be represented as JSON.
    pub fn with_serialized_data<T: Serialize + ?Sized>(self, data: &T) -> Result<Self> {
        let value =
            serde_json::to_value(data).map_err(|e| Error::SerializationFailed(e.to_string()))?;
        Ok(self.with_data(value))
    }

    /// Marks the request as cacheable or not.
    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    /// Adds a query parameter.
    pub fn with_query_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_parameters.insert(key.into(), value.into());
        self
    }
}

/// Per-call overrides merged over the transporter defaults. Caller values win.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// Extra headers.
    pub headers: HeaderMap,
    /// Extra query parameters.
    pub query_parameters: BTreeMap<String, String>,
    /// Replaces the base response timeout for this call's kind.
    pub timeout: Option<Duration>,
    /// Overrides [`Request::cacheable`].
    pub cacheable: Option<bool>,
    /// Entries merged into object payloads (or into the query string for `GET`).
    pub data: Map<String, Value>,
}

impl RequestOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Adds a query parameter.
    pub fn with_query_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_parameters.insert(key.into(), value.into());
        self
    }

    /// Sets the response timeout base for this call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Forces the call to be cached or not.
    pub fn with_cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = Some(cacheable);
        self
    }

    /// Adds a payload entry.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// A request merged with its options and the transporter defaults, ready to be
/// sent to any host.
#[derive(Debug, Clone)]
pub(crate) struct PreparedRequest {
    pub method: Method,
    pub path: String,
    pub call: CallKind,
    /// Merged payload, as it takes part in the cache key.
    pub data: Option<Value>,
    /// Serialized JSON body. Always `None` for `GET`.
    pub body: Option<String>,
    pub headers: HeaderMap,
    pub query_parameters: BTreeMap<String, String>,
    pub cacheable: bool,
    /// Replacement response timeout base, if the caller gave one.
    pub timeout: Option<Duration>,
}

impl PreparedRequest {
    /// Merges `request` and `options` over the transporter defaults.
    ///
    /// For `GET`, payload entries travel as query parameters and there is no body.
    /// For other methods, object payloads absorb `options.data`; any other payload
    /// is sent unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SerializationFailed`] if the body cannot be encoded.
    pub fn new(
        request: Request,
        options: RequestOptions,
        default_headers: &HeaderMap,
        default_query_parameters: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let data = match request.data {
            Some(Value::Object(mut map)) => {
                map.extend(options.data);
                Some(Value::Object(map))
            }
            Some(other) => Some(other),
            None if options.data.is_empty() => None,
            None => Some(Value::Object(options.data)),
        };

        let mut query_parameters = default_query_parameters.clone();
        let body = if request.method == Method::GET {
            if let Some(Value::Object(map)) = &data {
                for (key, value) in map {
                    query_parameters.insert(key.clone(), query_value(value));
                }
            }
            None
        } else {
            data.as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| Error::SerializationFailed(e.to_string()))?
        };
        query_parameters.extend(request.query_parameters);
        query_parameters.extend(options.query_parameters);

        let mut headers = default_headers.clone();
        for (name, value) in &options.headers {
            headers.insert(name.clone(), value.clone());
        }

        Ok(Self {
            method: request.method,
            path: request.path,
            call: request.call,
            data,
            body,
            headers,
            query_parameters,
            cacheable: options.cacheable.unwrap_or(request.cacheable),
            timeout: options.timeout,
        })
    }

    /// Deterministic identity of this request, shared by the response cache and
    /// the in-flight map.
    pub fn cache_key(&self) -> String {
        let headers: BTreeMap<String, String> = self
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        serde_json::json!({
            "method": self.method.as_str(),
            "path": self.path,
            "data": self.data,
            "queryParameters": self.query_parameters,
            "headers": headers,
        })
        .to_string()
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn prepare(request: Request, options: RequestOptions) -> PreparedRequest {
        let mut headers = HeaderMap::new();
        headers.insert("x-default", HeaderValue::from_static("1"));
        let mut query = BTreeMap::new();
        query.insert("agent".to_string(), "switchyard".to_string());
        PreparedRequest::new(request, options, &headers, &query).unwrap()
    }

    #[test]
    fn test_options_data_merged_into_body() {
        let request = Request::write(Method::POST, "1/strategy").with_data(json!({"a": 1}));
        let options = RequestOptions::new().with_data("foo", "bar");

        let prepared = prepare(request, options);

        assert_eq!(prepared.data, Some(json!({"a": 1, "foo": "bar"})));
        let body: Value = serde_json::from_str(prepared.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"a": 1, "foo": "bar"}));
    }

    #[test]
    fn test_array_payload_sent_unchanged() {
        let request = Request::write(Method::POST, "1/batch").with_data(json!([1, 2]));
        let prepared = prepare(request, RequestOptions::new().with_data("ignored", true));
        assert_eq!(prepared.body.as_deref(), Some("[1,2]"));
    }

    #[test]
    fn test_get_payload_becomes_query() {
        let request = Request::read(Method::GET, "1/indexes")
            .with_data(json!({"page": 2, "query": "phone"}));
        let prepared = prepare(request, RequestOptions::new());

        assert!(prepared.body.is_none());
        assert_eq!(prepared.query_parameters["page"], "2");
        assert_eq!(prepared.query_parameters["query"], "phone");
        assert_eq!(prepared.query_parameters["agent"], "switchyard");
    }

    #[test]
    fn test_caller_values_win() {
        let request = Request::read(Method::GET, "1/indexes").with_query_parameter("agent", "req");
        let options = RequestOptions::new()
            .with_query_parameter("agent", "opt")
            .with_header("x-default", "2")
            .unwrap()
            .with_cacheable(true);

        let prepared = prepare(request, options);
        assert_eq!(prepared.query_parameters["agent"], "opt");
        assert_eq!(prepared.headers["x-default"], "2");
        assert!(prepared.cacheable);
    }

    #[test]
    fn test_cache_key_deterministic_and_discriminating() {
        let make = |query: &str| {
            prepare(
                Request::read(Method::POST, "1/indexes/foo/query")
                    .with_data(json!({"query": query, "hitsPerPage": 10})),
                RequestOptions::new(),
            )
        };

        assert_eq!(make("phone").cache_key(), make("phone").cache_key());
        assert_ne!(make("phone").cache_key(), make("tablet").cache_key());
    }

    #[test]
    fn test_invalid_header_rejected() {
        let result = RequestOptions::new().with_header("bad header", "v");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
