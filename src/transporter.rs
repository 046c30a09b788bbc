//! The transporter: runs logical calls against the host pool.
//!
//! [`Transporter`] is the entry point; configure it with [`TransporterBuilder`].

use crate::{
    cache::{Cache, InFlight, InMemoryCache},
    host::{CallKind, Host, HostPool, DEFAULT_HOST_COOLDOWN},
    request::{PreparedRequest, Request, RequestOptions},
    requester::{HttpRequest, HttpResponse, ReqwestRequester, Requester},
    retry::{Outcome, RetryState, TimeoutEscalation, Timeouts},
    user_agent::{UserAgent, USER_AGENT_PARAMETER},
    Error, Response, Result, StackFrame,
};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

type CallResult = Result<Response<Value>>;

/// Runs reads and writes against a ranked pool of hosts, failing over between
/// them, caching cacheable responses and collapsing identical concurrent calls.
///
/// Cloning is cheap; clones share the host pool and both caches.
///
/// # Examples
///
/// ```no_run
/// use switchyard::{CallKind, Host, Request, RequestOptions, Transporter};
/// use http::Method;
/// use serde_json::json;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), switchyard::Error> {
/// let transporter = Transporter::builder()
///     .host(Host::new("search-1.example.com", CallKind::Read).with_priority(1))
///     .host(Host::new("search-2.example.com", CallKind::Read).with_priority(2))
///     .host(Host::new("index.example.com", CallKind::Write))
///     .read_timeout(Duration::from_secs(2))
///     .build()?;
///
/// let search = Request::read(Method::POST, "1/indexes/products/query")
///     .with_data(json!({ "query": "phone" }))
///     .cacheable(true);
/// let response = transporter.execute(search, RequestOptions::default()).await?;
/// println!("{}", response.data);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Transporter {
    inner: Arc<TransporterInner>,
}

struct TransporterInner {
    requester: Arc<dyn Requester>,
    host_pool: HostPool,
    timeouts: Timeouts,
    escalation: TimeoutEscalation,
    max_timeout: Option<Duration>,
    response_cache: Arc<dyn Cache>,
    in_flight: InFlight<CallResult>,
    deduplicate: bool,
    default_headers: HeaderMap,
    default_query_parameters: BTreeMap<String, String>,
}

impl Transporter {
    /// Creates a new `TransporterBuilder`.
    pub fn builder() -> TransporterBuilder {
        TransporterBuilder::new()
    }

    /// Runs one logical call and returns the parsed JSON body.
    ///
    /// Cacheable calls are first matched against calls still in flight, then
    /// against the response cache; only a miss on both reaches a host.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] if no host accepts the request's call kind;
    /// - [`Error::ApiError`] if a host rejected the request;
    /// - [`Error::UnreachableHosts`] if every eligible host failed;
    /// - [`Error::DeserializationFailed`] if a success body was not JSON.
    pub async fn execute(&self, request: Request, options: RequestOptions) -> CallResult {
        let start_time = Instant::now();
        let prepared = PreparedRequest::new(
            request,
            options,
            &self.inner.default_headers,
            &self.inner.default_query_parameters,
        )?;

        if !prepared.cacheable {
            return self.inner.retryable_call(prepared, start_time).await;
        }

        let key = prepared.cache_key();

        if self.inner.deduplicate {
            if let Some(pending) = self.inner.in_flight.get(&key) {
                tracing::debug!(
                    method = %prepared.method,
                    path = %prepared.path,
                    "Attaching to in-flight request"
                );
                return pending.await;
            }
        }

        if let Some(data) = self.inner.cached(&key).await {
            tracing::debug!(
                method = %prepared.method,
                path = %prepared.path,
                "Serving response from cache"
            );
            let raw_body = data.to_string();
            return Ok(Response::cached(data, raw_body, start_time.elapsed()));
        }

        if !self.inner.deduplicate {
            return self.inner.call_and_store(prepared, key, start_time).await;
        }

        let inner = Arc::clone(&self.inner);
        let call_key = key.clone();
        let (result, attached) = self
            .inner
            .in_flight
            .run(&key, async move {
                inner.call_and_store(prepared, call_key, start_time).await
            })
            .await;

        if attached {
            tracing::debug!("Attached to a request that started concurrently");
        }
        result
    }

    /// Runs a call against read hosts and deserializes the body into `T`.
    pub async fn read<T>(&self, request: Request, options: RequestOptions) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        let request = Request {
            call: CallKind::Read,
            ..request
        };
        typed(self.execute(request, options).await?)
    }

    /// Runs a call against write hosts and deserializes the body into `T`.
    pub async fn write<T>(&self, request: Request, options: RequestOptions) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        let request = Request {
            call: CallKind::Write,
            ..request
        };
        typed(self.execute(request, options).await?)
    }

    /// Empties the response cache. Calls still in flight are unaffected.
    ///
    /// # Errors
    ///
    /// Returns the cache implementation's error if it could not be cleared.
    pub async fn clear_cache(&self) -> Result<()> {
        self.inner.response_cache.clear().await
    }

    /// The host pool, for inspecting host health.
    pub fn host_pool(&self) -> &HostPool {
        &self.inner.host_pool
    }

    /// The base timeouts.
    pub fn timeouts(&self) -> Timeouts {
        self.inner.timeouts
    }

    /// Headers sent with every request.
    pub fn default_headers(&self) -> &HeaderMap {
        &self.inner.default_headers
    }

    /// Query parameters sent with every request.
    pub fn default_query_parameters(&self) -> &BTreeMap<String, String> {
        &self.inner.default_query_parameters
    }
}

impl TransporterInner {
    async fn call_and_store(
        &self,
        prepared: PreparedRequest,
        key: String,
        start_time: Instant,
    ) -> CallResult {
        let response = self.retryable_call(prepared, start_time).await?;
        if let Err(e) = self.response_cache.set(&key, response.data.clone()).await {
            tracing::warn!(error = %e, "Failed to store response in cache");
        }
        Ok(response)
    }

    async fn cached(&self, key: &str) -> Option<Value> {
        match self.response_cache.get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Response cache lookup failed, treating as a miss");
                None
            }
        }
    }

    fn budget(&self, base: Duration, attempt: usize) -> Duration {
        let timeout = self.escalation.timeout_for_attempt(base, attempt);
        match self.max_timeout {
            Some(max) => timeout.min(max),
            None => timeout,
        }
    }

    /// Walks the host snapshot until one host answers or all have failed.
    async fn retryable_call(&self, prepared: PreparedRequest, start_time: Instant) -> CallResult {
        let hosts = self.host_pool.hosts(prepared.call)?;
        let mut state = RetryState::new(hosts);
        let response_base = prepared
            .timeout
            .unwrap_or_else(|| self.timeouts.response_for(prepared.call));

        while let Some(attempt) = state.next_attempt() {
            let request = HttpRequest {
                host: attempt.host.clone(),
                method: prepared.method.clone(),
                path: prepared.path.clone(),
                body: prepared.body.clone(),
                headers: prepared.headers.clone(),
                query_parameters: prepared.query_parameters.clone(),
                connect_timeout: self.budget(self.timeouts.connect, attempt.number),
                response_timeout: self.budget(response_base, attempt.number),
            };
            let url = request.url()?.to_string();

            tracing::debug!(
                method = %prepared.method,
                host = %attempt.host.url,
                attempt = attempt.number,
                timeout_ms = request.response_timeout.as_millis(),
                "Executing HTTP request"
            );

            let outcome = Outcome::classify(self.requester.send(request).await);

            match outcome {
                Outcome::Success(response) => {
                    state.succeed();
                    self.host_pool.mark_up(&attempt.host.url);

                    let latency = start_time.elapsed();
                    tracing::info!(
                        status = response.status.as_u16(),
                        host = %attempt.host.url,
                        latency_ms = latency.as_millis(),
                        attempts = attempt.number,
                        "Received HTTP response"
                    );

                    return parse_success(response, latency, attempt.number, attempt.host.url);
                }
                Outcome::Fatal(response) => {
                    tracing::error!(
                        status = response.status.as_u16(),
                        host = %attempt.host.url,
                        response = %response.body,
                        "Request rejected (4xx)"
                    );

                    let message = api_message(&response.body);
                    let frame = StackFrame {
                        host: attempt.host.url,
                        method: prepared.method.clone(),
                        url,
                        status: Some(response.status),
                        error: Error::ApiError {
                            status: response.status,
                            message: message.clone(),
                            raw_response: response.body.clone(),
                            headers: response.headers.clone(),
                            stack_trace: Vec::new(),
                        },
                        tries_left: state.tries_left(),
                    };
                    let stack_trace = state.fail_fatal(frame);

                    return Err(Error::ApiError {
                        status: response.status,
                        message,
                        raw_response: response.body,
                        headers: response.headers,
                        stack_trace,
                    });
                }
                Outcome::Retryable(error) => {
                    tracing::warn!(
                        error = %error,
                        host = %attempt.host.url,
                        attempt = attempt.number,
                        tries_left = state.tries_left(),
                        "Request failed, marking host down"
                    );

                    self.host_pool.mark_down(&attempt.host.url);
                    let frame = StackFrame {
                        host: attempt.host.url,
                        method: prepared.method.clone(),
                        url,
                        status: error.status(),
                        error,
                        tries_left: state.tries_left(),
                    };
                    state.fail_retryable(frame);
                }
            }
        }

        tracing::error!(
            method = %prepared.method,
            path = %prepared.path,
            attempts = state.stack_trace().len(),
            "All hosts failed"
        );
        Err(state.into_error())
    }
}

/// Parses a 2xx body. An empty body parses as `null`.
fn parse_success(
    response: HttpResponse,
    latency: Duration,
    attempts: usize,
    host: String,
) -> CallResult {
    let data = if response.body.trim().is_empty() {
        Value::Null
    } else {
        match serde_json::from_str::<Value>(&response.body) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    raw_response = %response.body,
                    "Failed to deserialize response"
                );
                return Err(Error::DeserializationFailed {
                    raw_response: response.body,
                    serde_error: e.to_string(),
                    status: response.status,
                });
            }
        }
    };

    Ok(Response::new(
        data,
        response.body,
        response.status,
        response.headers,
        latency,
        attempts,
        host,
    ))
}

/// The service's `message` field, or the raw body when there is none.
fn api_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

fn typed<T: DeserializeOwned>(response: Response<Value>) -> Result<Response<T>> {
    match serde_json::from_value::<T>(response.data.clone()) {
        Ok(data) => Ok(response.map(|_| data)),
        Err(e) => {
            tracing::error!(
                error = %e,
                raw_response = %response.raw_body,
                "Failed to deserialize response"
            );
            Err(Error::DeserializationFailed {
                raw_response: response.raw_body,
                serde_error: e.to_string(),
                status: response.status,
            })
        }
    }
}

/// Builder for configuring and creating a [`Transporter`].
///
/// # Examples
///
/// ```no_run
/// use switchyard::{CallKind, Host, TimeoutEscalation, Transporter};
/// use switchyard::cache::InMemoryCache;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), switchyard::Error> {
/// let transporter = Transporter::builder()
///     .hosts(vec![
///         Host::new("a.example.com", CallKind::ReadWrite).with_priority(1),
///         Host::new("b.example.com", CallKind::ReadWrite).with_priority(2),
///     ])
///     .connect_timeout(Duration::from_secs(1))
///     .timeout_escalation(TimeoutEscalation::Exponential { factor: 2.0 })
///     .max_timeout(Duration::from_secs(60))
///     .host_cooldown(Duration::from_secs(300))
///     .response_cache(Arc::new(InMemoryCache::with_ttl(Duration::from_secs(600))))
///     .default_header("x-algolia-application-id", "APP")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct TransporterBuilder {
    hosts: Vec<Host>,
    requester: Option<Arc<dyn Requester>>,
    timeouts: Timeouts,
    escalation: TimeoutEscalation,
    max_timeout: Option<Duration>,
    host_cooldown: Duration,
    response_cache: Option<Arc<dyn Cache>>,
    deduplicate: bool,
    default_headers: HeaderMap,
    default_query_parameters: BTreeMap<String, String>,
    user_agent: UserAgent,
}

impl TransporterBuilder {
    /// Creates a new `TransporterBuilder` with default settings and no hosts.
    pub fn new() -> Self {
        Self {
            hosts: Vec::new(),
            requester: None,
            timeouts: Timeouts::default(),
            escalation: TimeoutEscalation::default(),
            max_timeout: None,
            host_cooldown: DEFAULT_HOST_COOLDOWN,
            response_cache: None,
            deduplicate: true,
            default_headers: HeaderMap::new(),
            default_query_parameters: BTreeMap::new(),
            user_agent: UserAgent::default(),
        }
    }

    /// Adds a host.
    pub fn host(mut self, host: Host) -> Self {
        self.hosts.push(host);
        self
    }

    /// Adds several hosts.
    pub fn hosts(mut self, hosts: impl IntoIterator<Item = Host>) -> Self {
        self.hosts.extend(hosts);
        self
    }

    /// Sets the HTTP primitive. Defaults to [`ReqwestRequester`].
    pub fn requester(mut self, requester: Arc<dyn Requester>) -> Self {
        self.requester = Some(requester);
        self
    }

    /// Sets all base timeouts at once.
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sets the base connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connect = timeout;
        self
    }

    /// Sets the base response timeout for reads.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.read = timeout;
        self
    }

    /// Sets the base response timeout for writes.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.write = timeout;
        self
    }

    /// Sets how timeouts grow across attempts. Defaults to
    /// [`TimeoutEscalation::Linear`].
    pub fn timeout_escalation(mut self, escalation: TimeoutEscalation) -> Self {
        self.escalation = escalation;
        self
    }

    /// Caps escalated timeouts.
    pub fn max_timeout(mut self, max: Duration) -> Self {
        self.max_timeout = Some(max);
        self
    }

    /// Sets how long a failed host stays out of rotation. Defaults to two minutes.
    pub fn host_cooldown(mut self, cooldown: Duration) -> Self {
        self.host_cooldown = cooldown;
        self
    }

    /// Sets the response cache. Defaults to an [`InMemoryCache`] without expiry;
    /// use [`NullCache`](crate::cache::NullCache) to disable caching.
    pub fn response_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.response_cache = Some(cache);
        self
    }

    /// Enables or disables collapsing of identical concurrent cacheable calls.
    /// Enabled by default.
    pub fn deduplicate_requests(mut self, deduplicate: bool) -> Self {
        self.deduplicate = deduplicate;
        self
    }

    /// Adds a header sent with every request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Adds a query parameter sent with every request.
    pub fn default_query_parameter(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.default_query_parameters.insert(key.into(), value.into());
        self
    }

    /// Sets the agent string.
    pub fn user_agent(mut self, user_agent: UserAgent) -> Self {
        self.user_agent = user_agent;
        self
    }

    /// Builds the configured `Transporter`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if no host was given, a host is given
    /// twice, or the default requester cannot be created.
    pub fn build(self) -> Result<Transporter> {
        let host_pool = HostPool::new(self.hosts, self.host_cooldown)?;

        let requester: Arc<dyn Requester> = match self.requester {
            Some(requester) => requester,
            None => Arc::new(ReqwestRequester::new()?),
        };

        let response_cache = self
            .response_cache
            .unwrap_or_else(|| Arc::new(InMemoryCache::new()));

        let mut default_query_parameters = self.default_query_parameters;
        default_query_parameters
            .entry(USER_AGENT_PARAMETER.to_string())
            .or_insert_with(|| self.user_agent.value().to_string());

        tracing::debug!(
            hosts = host_pool.all().len(),
            connect_ms = self.timeouts.connect.as_millis(),
            read_ms = self.timeouts.read.as_millis(),
            write_ms = self.timeouts.write.as_millis(),
            deduplicate = self.deduplicate,
            "Transporter configured"
        );

        Ok(Transporter {
            inner: Arc::new(TransporterInner {
                requester,
                host_pool,
                timeouts: self.timeouts,
                escalation: self.escalation,
                max_timeout: self.max_timeout,
                response_cache,
                in_flight: InFlight::new(),
                deduplicate: self.deduplicate,
                default_headers: self.default_headers,
                default_query_parameters,
            }),
        })
    }
}

impl Default for TransporterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
