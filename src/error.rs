//! Error types for transporter calls.
//!
//! Every failure a logical call can end in is a variant of [`Error`]. Errors are
//! `Clone` so a single in-flight result can be handed to every caller that attached
//! to it.

use http::{HeaderMap, StatusCode};

/// The main error type for transporter calls.
///
/// # Examples
///
/// ```no_run
/// use switchyard::{CallKind, Error, Host, Request, RequestOptions, Transporter};
/// use http::Method;
///
/// # async fn example() -> Result<(), Error> {
/// let transporter = Transporter::builder()
///     .host(Host::new("search.example.com", CallKind::ReadWrite))
///     .build()?;
///
/// let request = Request::read(Method::GET, "1/indexes");
/// match transporter.execute(request, RequestOptions::default()).await {
///     Ok(response) => println!("Success: {:?}", response.data),
///     Err(Error::ApiError { status, message, .. }) => {
///         eprintln!("Rejected with {}: {}", status, message);
///     }
///     Err(Error::UnreachableHosts { stack_trace, .. }) => {
///         for frame in &stack_trace {
///             eprintln!("{} failed: {}", frame.host, frame.error);
///         }
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// The transporter or the request was configured in a way that cannot work,
    /// such as no host accepting the requested call kind.
    ///
    /// Raised before any network activity and never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The attempt did not complete within its timeout budget.
    #[error("Request timed out")]
    Timeout,

    /// A network-level error occurred (connection refused, DNS failure, reset, ...).
    #[error("Network error: {0}")]
    Network(String),

    /// The host answered with a status that is neither a success nor an
    /// application-level rejection (typically 5xx). Retryable on another host.
    #[error("HTTP error {status}: {raw_response}")]
    HttpError {
        /// The HTTP status code
        status: StatusCode,
        /// The raw response body
        raw_response: String,
        /// The response headers
        headers: HeaderMap,
    },

    /// The service rejected the request (4xx).
    ///
    /// The host responded correctly, so it is not marked down and the call is not
    /// retried elsewhere.
    #[error("API error {status}: {message}")]
    ApiError {
        /// The HTTP status code
        status: StatusCode,
        /// The service-provided message, or the raw body when none was given
        message: String,
        /// The raw response body
        raw_response: String,
        /// The response headers
        headers: HeaderMap,
        /// Attempts made during the logical call, including this one
        stack_trace: Vec<StackFrame>,
    },

    /// Every eligible host was tried and none of them answered successfully.
    #[error("Unreachable hosts after {} attempts: {last_error}", .stack_trace.len())]
    UnreachableHosts {
        /// One frame per attempted host, in attempt order
        stack_trace: Vec<StackFrame>,
        /// The error of the final attempt
        last_error: Box<Error>,
    },

    /// A successful response body was not valid JSON of the expected shape.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// The request data could not be serialized to JSON.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// A host and path did not form a valid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A cache implementation failed.
    ///
    /// The transporter treats cache failures as misses; this variant only reaches
    /// callers that use a [`Cache`](crate::cache::Cache) directly.
    #[error("Cache error: {0}")]
    Cache(String),
}

impl Error {
    /// Returns `true` if the failure should move the call on to the next host.
    ///
    /// Timeouts, network errors and non-4xx HTTP errors are retryable. Application
    /// errors, configuration errors and (de)serialization failures are not.
    ///
    /// # Examples
    ///
    /// ```
    /// use switchyard::Error;
    /// use http::StatusCode;
    ///
    /// let err = Error::HttpError {
    ///     status: StatusCode::SERVICE_UNAVAILABLE,
    ///     raw_response: "unavailable".to_string(),
    ///     headers: http::HeaderMap::new(),
    /// };
    /// assert!(err.is_retryable());
    ///
    /// assert!(!Error::Configuration("no hosts".to_string()).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout => true,
            Error::Network(_) => true,
            Error::HttpError { .. } => true,
            Error::Configuration(_) => false,
            Error::ApiError { .. } => false,
            Error::UnreachableHosts { .. } => false,
            Error::DeserializationFailed { .. } => false,
            Error::SerializationFailed(_) => false,
            Error::InvalidUrl(_) => false,
            Error::Cache(_) => false,
        }
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::HttpError { status, .. } => Some(*status),
            Error::ApiError { status, .. } => Some(*status),
            Error::DeserializationFailed { status, .. } => Some(*status),
            Error::UnreachableHosts { last_error, .. } => last_error.status(),
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::HttpError { raw_response, .. } => Some(raw_response),
            Error::ApiError { raw_response, .. } => Some(raw_response),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }

    /// Returns the per-host attempt history for errors produced by the retry loop.
    pub fn stack_trace(&self) -> &[StackFrame] {
        match self {
            Error::ApiError { stack_trace, .. } => stack_trace,
            Error::UnreachableHosts { stack_trace, .. } => stack_trace,
            _ => &[],
        }
    }
}

/// One attempt against one host, recorded while a logical call runs.
#[derive(Debug, Clone)]
pub struct StackFrame {
    /// The url of the host that was attempted.
    pub host: String,
    /// The HTTP method of the attempt.
    pub method: http::Method,
    /// The full URL the attempt was sent to.
    pub url: String,
    /// The status the host answered with, if it answered at all.
    pub status: Option<StatusCode>,
    /// What went wrong.
    pub error: Error,
    /// How many hosts were still untried after this attempt.
    pub tries_left: usize,
}

/// A specialized `Result` type for transporter calls.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_hosts_reports_last_status() {
        let last = Error::HttpError {
            status: StatusCode::BAD_GATEWAY,
            raw_response: "bad gateway".to_string(),
            headers: HeaderMap::new(),
        };
        let err = Error::UnreachableHosts {
            stack_trace: Vec::new(),
            last_error: Box::new(last),
        };

        assert_eq!(err.status(), Some(StatusCode::BAD_GATEWAY));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("0 attempts"));
    }

    #[test]
    fn test_api_error_is_not_retryable() {
        let err = Error::ApiError {
            status: StatusCode::NOT_FOUND,
            message: "Index does not exist".to_string(),
            raw_response: r#"{"message":"Index does not exist"}"#.to_string(),
            headers: HeaderMap::new(),
            stack_trace: Vec::new(),
        };

        assert!(!err.is_retryable());
        assert_eq!(err.raw_response(), Some(r#"{"message":"Index does not exist"}"#));
        assert_eq!(err.to_string(), "API error 404 Not Found: Index does not exist");
    }
}
