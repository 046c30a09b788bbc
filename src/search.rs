//! Search API client built on the [`Transporter`].
//!
//! Each method only builds a [`Request`] and hands it to the transporter; host
//! selection, failover and caching all happen there.

use crate::{
    cache::Cache,
    requester::Requester,
    retry::Timeouts,
    CallKind, Host, Request, RequestOptions, Response, Result, Transporter, UserAgent,
};
use futures::future::try_join_all;
use http::Method;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Header / query parameter carrying the application id.
pub const APPLICATION_ID_PARAMETER: &str = "x-algolia-application-id";

/// Header / query parameter carrying the API key.
pub const API_KEY_PARAMETER: &str = "x-algolia-api-key";

/// Characters left alone by `encodeURIComponent`.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Replaces each `%s` in `template` with the next argument, percent-encoded as a
/// single path segment. Missing arguments become empty strings.
///
/// # Examples
///
/// ```
/// use switchyard::search::encode_path;
///
/// assert_eq!(
///     encode_path("1/indexes/%s/facets/%s/query", &["my index", "brand/name"]),
///     "1/indexes/my%20index/facets/brand%2Fname/query"
/// );
/// ```
pub fn encode_path(template: &str, args: &[&str]) -> String {
    let mut args = args.iter();
    let mut parts = template.split("%s");
    let mut path = parts.next().unwrap_or_default().to_string();

    for part in parts {
        let arg = args.next().copied().unwrap_or_default();
        path.extend(utf8_percent_encode(arg, PATH_SEGMENT));
        path.push_str(part);
    }

    path
}

/// Where credentials travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// As request headers.
    #[default]
    WithCredentials,
    /// As query parameters.
    WithinQueryParameters,
}

/// The default host pool for an application: one dedicated read host, one
/// dedicated write host, then three shared fallbacks in random order.
pub fn default_hosts(app_id: &str) -> Vec<Host> {
    let mut fallbacks = vec![1, 2, 3];
    fallbacks.shuffle(&mut rand::thread_rng());

    let mut hosts = vec![
        Host::new(format!("{}-dsn.algolia.net", app_id), CallKind::Read),
        Host::new(format!("{}.algolia.net", app_id), CallKind::Write),
    ];
    hosts.extend(fallbacks.into_iter().zip(1..).map(|(n, priority)| {
        Host::new(format!("{}-{}.algolianet.com", app_id, n), CallKind::ReadWrite)
            .with_priority(priority)
    }));
    hosts
}

/// Scoring of one event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventScoring {
    /// Weight of the event.
    pub score: i64,
    /// Event type, e.g. `conversion` or `click`.
    #[serde(rename = "type")]
    pub kind: String,
}

/// Scoring of one facet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetScoring {
    /// Weight of the facet.
    pub score: i64,
}

/// How user events and facets weigh in personalization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizationStrategy {
    /// Scoring per event name.
    #[serde(default)]
    pub events_scoring: BTreeMap<String, EventScoring>,
    /// Scoring per facet name.
    #[serde(default)]
    pub facets_scoring: BTreeMap<String, FacetScoring>,
}

/// One search-for-facet-values query against one index.
#[derive(Debug, Clone, PartialEq)]
pub struct FacetValuesQuery {
    /// The index to search in.
    pub index_name: String,
    /// The facet whose values are searched.
    pub facet_name: String,
    /// The text to match facet values against.
    pub facet_query: String,
    /// Additional search parameters.
    pub params: Map<String, Value>,
}

impl FacetValuesQuery {
    /// Creates a query.
    pub fn new(
        index_name: impl Into<String>,
        facet_name: impl Into<String>,
        facet_query: impl Into<String>,
    ) -> Self {
        Self {
            index_name: index_name.into(),
            facet_name: facet_name.into(),
            facet_query: facet_query.into(),
            params: Map::new(),
        }
    }

    /// Adds a search parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    fn to_request(&self) -> Request {
        let mut data = self.params.clone();
        data.insert(
            "facetQuery".to_string(),
            Value::String(self.facet_query.clone()),
        );

        Request::read(
            Method::POST,
            encode_path(
                "1/indexes/%s/facets/%s/query",
                &[&self.index_name, &self.facet_name],
            ),
        )
        .with_data(Value::Object(data))
        .cacheable(true)
    }
}

/// A facet value matching the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetHit {
    pub value: String,
    pub highlighted: String,
    pub count: u64,
}

/// Answer to a search-for-facet-values query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacetValuesResponse {
    #[serde(default)]
    pub facet_hits: Vec<FacetHit>,
    #[serde(default)]
    pub exhaustive_facets_count: bool,
    #[serde(rename = "processingTimeMS", default)]
    pub processing_time_ms: Option<u64>,
}

/// Client for the search API of one application.
///
/// # Examples
///
/// ```no_run
/// use switchyard::search::{FacetValuesQuery, SearchClient};
/// use switchyard::RequestOptions;
///
/// # async fn example() -> Result<(), switchyard::Error> {
/// let client = SearchClient::builder("APP_ID", "API_KEY").build()?;
///
/// let responses = client
///     .search_for_facet_values(
///         &[FacetValuesQuery::new("products", "brand", "app")],
///         RequestOptions::default(),
///     )
///     .await?;
///
/// for hit in &responses[0].facet_hits {
///     println!("{} ({})", hit.value, hit.count);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SearchClient {
    app_id: String,
    transporter: Transporter,
}

impl SearchClient {
    /// Creates a builder for the given credentials.
    pub fn builder(app_id: impl Into<String>, api_key: impl Into<String>) -> SearchClientBuilder {
        SearchClientBuilder::new(app_id, api_key)
    }

    /// The application id.
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// The underlying transporter.
    pub fn transporter(&self) -> &Transporter {
        &self.transporter
    }

    /// Empties the response cache.
    pub async fn clear_cache(&self) -> Result<()> {
        self.transporter.clear_cache().await
    }

    /// Replaces the personalization strategy of the application.
    pub async fn set_personalization_strategy(
        &self,
        strategy: &PersonalizationStrategy,
        options: RequestOptions,
    ) -> Result<Response<Value>> {
        let request = Request::write(Method::POST, "1/recommendation/personalization/strategy")
            .with_serialized_data(strategy)?;
        self.transporter.write(request, options).await
    }

    /// Fetches the personalization strategy of the application.
    pub async fn get_personalization_strategy(
        &self,
        options: RequestOptions,
    ) -> Result<Response<PersonalizationStrategy>> {
        let request = Request::read(Method::GET, "1/recommendation/personalization/strategy");
        self.transporter.read(request, options).await
    }

    /// Searches facet values, one cacheable read per query. Queries run
    /// concurrently; the responses come back in query order.
    pub async fn search_for_facet_values(
        &self,
        queries: &[FacetValuesQuery],
        options: RequestOptions,
    ) -> Result<Vec<Response<FacetValuesResponse>>> {
        try_join_all(
            queries
                .iter()
                .map(|query| self.transporter.read(query.to_request(), options.clone())),
        )
        .await
    }
}

/// Builder for a [`SearchClient`].
pub struct SearchClientBuilder {
    app_id: String,
    api_key: String,
    auth_mode: AuthMode,
    hosts: Option<Vec<Host>>,
    requester: Option<Arc<dyn Requester>>,
    response_cache: Option<Arc<dyn Cache>>,
    timeouts: Option<Timeouts>,
    deduplicate: bool,
    user_agent: UserAgent,
}

impl SearchClientBuilder {
    /// Creates a builder with the default hosts for `app_id`.
    pub fn new(app_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            api_key: api_key.into(),
            auth_mode: AuthMode::default(),
            hosts: None,
            requester: None,
            response_cache: None,
            timeouts: None,
            deduplicate: true,
            user_agent: UserAgent::default().add("Search", Some(env!("CARGO_PKG_VERSION"))),
        }
    }

    /// Sets where credentials travel.
    pub fn auth_mode(mut self, auth_mode: AuthMode) -> Self {
        self.auth_mode = auth_mode;
        self
    }

    /// Replaces the default hosts.
    pub fn hosts(mut self, hosts: Vec<Host>) -> Self {
        self.hosts = Some(hosts);
        self
    }

    /// Sets the HTTP primitive.
    pub fn requester(mut self, requester: Arc<dyn Requester>) -> Self {
        self.requester = Some(requester);
        self
    }

    /// Sets the response cache.
    pub fn response_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.response_cache = Some(cache);
        self
    }

    /// Sets the base timeouts.
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Enables or disables in-flight deduplication.
    pub fn deduplicate_requests(mut self, deduplicate: bool) -> Self {
        self.deduplicate = deduplicate;
        self
    }

    /// Appends a segment to the agent string.
    pub fn user_agent_segment(mut self, segment: &str, version: Option<&str>) -> Self {
        self.user_agent = self.user_agent.add(segment, version);
        self
    }

    /// Builds the client.
    ///
    /// No default `content-type` header is set: requests with a body rely on the
    /// requester marking them `application/json`, as [`ReqwestRequester`]
    /// does.
    ///
    /// [`ReqwestRequester`]: crate::requester::ReqwestRequester
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`](crate::Error::Configuration) if the
    /// credentials are not valid header values or the transporter cannot be built.
    pub fn build(self) -> Result<SearchClient> {
        let hosts = self.hosts.unwrap_or_else(|| default_hosts(&self.app_id));

        let mut builder = Transporter::builder()
            .hosts(hosts)
            .deduplicate_requests(self.deduplicate)
            .user_agent(self.user_agent);

        builder = match self.auth_mode {
            AuthMode::WithCredentials => builder
                .default_header(APPLICATION_ID_PARAMETER, &self.app_id)?
                .default_header(API_KEY_PARAMETER, &self.api_key)?,
            AuthMode::WithinQueryParameters => builder
                .default_query_parameter(APPLICATION_ID_PARAMETER, self.app_id.as_str())
                .default_query_parameter(API_KEY_PARAMETER, self.api_key.as_str()),
        };

        if let Some(requester) = self.requester {
            builder = builder.requester(requester);
        }
        if let Some(cache) = self.response_cache {
            builder = builder.response_cache(cache);
        }
        if let Some(timeouts) = self.timeouts {
            builder = builder.timeouts(timeouts);
        }

        Ok(SearchClient {
            app_id: self.app_id,
            transporter: builder.build()?,
        })
    }
}
