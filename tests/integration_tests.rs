//! Integration tests using wiremock to simulate search hosts.

use http::Method;
use serde_json::json;
use std::time::Duration;
use switchyard::search::{AuthMode, FacetValuesQuery, PersonalizationStrategy, SearchClient};
use switchyard::{
    CallKind, Error, Host, HostState, Protocol, Request, RequestOptions, TimeoutEscalation,
    Transporter,
};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn host_for(server: &MockServer, priority: u32) -> Host {
    Host::new(server.address().to_string(), CallKind::ReadWrite)
        .with_protocol(Protocol::Http)
        .with_priority(priority)
}

fn query() -> Request {
    Request::read(Method::POST, "1/indexes/products/query").with_data(json!({"query": "phone"}))
}

#[tokio::test]
async fn test_server_error_fails_over() {
    let failing = MockServer::start().await;
    let healthy = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/1/indexes/products/query"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .expect(1)
        .mount(&failing)
        .await;

    Mock::given(method("POST"))
        .and(path("/1/indexes/products/query"))
        .and(body_json(json!({"query": "phone"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hits": [], "nbHits": 0})))
        .expect(1)
        .mount(&healthy)
        .await;

    let transporter = Transporter::builder()
        .host(host_for(&failing, 1))
        .host(host_for(&healthy, 2))
        .build()
        .unwrap();

    let response = transporter
        .execute(query(), RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.attempts, 2);
    assert_eq!(response.data["nbHits"], 0);
    assert_eq!(
        transporter
            .host_pool()
            .status(&failing.address().to_string())
            .unwrap()
            .state,
        HostState::Down
    );
}

#[tokio::test]
async fn test_slow_host_times_out_and_fails_over() {
    let slow = MockServer::start().await;
    let fast = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"from": "slow"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&slow)
        .await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"from": "fast"})))
        .expect(1)
        .mount(&fast)
        .await;

    let transporter = Transporter::builder()
        .host(host_for(&slow, 1))
        .host(host_for(&fast, 2))
        .connect_timeout(Duration::from_millis(100))
        .read_timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let response = transporter
        .execute(query(), RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(response.data, json!({"from": "fast"}));
    assert_eq!(response.attempts, 2);
}

#[tokio::test]
async fn test_refused_connection_fails_over() {
    let healthy = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&healthy)
        .await;

    let transporter = Transporter::builder()
        .host(
            Host::new("127.0.0.1:1", CallKind::ReadWrite)
                .with_protocol(Protocol::Http)
                .with_priority(1),
        )
        .host(host_for(&healthy, 2))
        .build()
        .unwrap();

    let response = transporter
        .execute(query(), RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(response.data, json!({"ok": true}));
    assert!(!transporter.host_pool().is_available("127.0.0.1:1"));
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let rejecting = MockServer::start().await;
    let untouched = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({"message": "Index products does not exist", "status": 404})),
        )
        .expect(1)
        .mount(&rejecting)
        .await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&untouched)
        .await;

    let transporter = Transporter::builder()
        .host(host_for(&rejecting, 1))
        .host(host_for(&untouched, 2))
        .build()
        .unwrap();

    let result = transporter.execute(query(), RequestOptions::default()).await;

    match result {
        Err(Error::ApiError {
            status, message, ..
        }) => {
            assert_eq!(status.as_u16(), 404);
            assert_eq!(message, "Index products does not exist");
        }
        other => panic!("Expected ApiError, got {:?}", other),
    }
}

#[tokio::test]
async fn test_all_hosts_down() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;

    for server in [&first, &second] {
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(server)
            .await;
    }

    let transporter = Transporter::builder()
        .host(host_for(&first, 1))
        .host(host_for(&second, 2))
        .build()
        .unwrap();

    match transporter.execute(query(), RequestOptions::default()).await {
        Err(Error::UnreachableHosts { stack_trace, .. }) => {
            assert_eq!(stack_trace.len(), 2);
            assert!(stack_trace
                .iter()
                .all(|frame| frame.status.map(|s| s.as_u16()) == Some(503)));
        }
        other => panic!("Expected UnreachableHosts, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cacheable_call_reaches_server_once() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/1/indexes/products/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hits": [{"objectID": "1"}]})))
        .expect(1)
        .mount(&server)
        .await;

    let transporter = Transporter::builder()
        .host(host_for(&server, 1))
        .build()
        .unwrap();

    for _ in 0..3 {
        let response = transporter
            .execute(query().cacheable(true), RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(response.data["hits"][0]["objectID"], "1");
    }
}

#[tokio::test]
async fn test_search_client_sends_credentials_and_agent() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/1/recommendation/personalization/strategy"))
        .and(header("x-algolia-application-id", "foo"))
        .and(header("x-algolia-api-key", "bar"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({
            "eventsScoring": {},
            "facetsScoring": {},
            "foo": "bar"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"updatedAt": "now"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = SearchClient::builder("foo", "bar")
        .hosts(vec![host_for(&server, 1)])
        .build()
        .unwrap();

    client
        .set_personalization_strategy(
            &PersonalizationStrategy::default(),
            RequestOptions::new().with_data("foo", "bar"),
        )
        .await
        .unwrap();

    let received = server.received_requests().await.unwrap();
    let agent = received[0]
        .url
        .query_pairs()
        .find(|(key, _)| key == "x-algolia-agent")
        .map(|(_, value)| value.into_owned())
        .unwrap();
    assert!(agent.starts_with("Switchyard for Rust ("));
    assert!(agent.contains("; Search ("));
}

#[tokio::test]
async fn test_search_client_credentials_in_query() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/1/indexes/foo/facets/firstname/query"))
        .and(query_param("x-algolia-application-id", "foo"))
        .and(query_param("x-algolia-api-key", "bar"))
        .and(body_json(json!({"facetQuery": "Jimmie"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "facetHits": [{"value": "Jimmie", "highlighted": "<em>Jimmie</em>", "count": 1}],
            "exhaustiveFacetsCount": true,
            "processingTimeMS": 1
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = SearchClient::builder("foo", "bar")
        .auth_mode(AuthMode::WithinQueryParameters)
        .hosts(vec![host_for(&server, 1)])
        .build()
        .unwrap();

    let query = FacetValuesQuery::new("foo", "firstname", "Jimmie");
    let responses = client
        .search_for_facet_values(&[query.clone(), query], RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].data.facet_hits[0].count, 1);
    assert_eq!(responses[0].data, responses[1].data);
}

#[tokio::test]
async fn test_unbounded_read_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1/indexes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(1)
        .mount(&server)
        .await;

    let transporter = Transporter::builder()
        .host(host_for(&server, 1))
        .read_timeout(Duration::MAX)
        .build()
        .unwrap();

    let response = transporter
        .execute(
            Request::read(Method::GET, "1/indexes"),
            RequestOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(response.data, json!({"items": []}));
}

#[tokio::test]
async fn test_saturated_escalation_on_failover() {
    let failing = MockServer::start().await;
    let healthy = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&failing)
        .await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(1)
        .mount(&healthy)
        .await;

    let transporter = Transporter::builder()
        .host(host_for(&failing, 1))
        .host(host_for(&healthy, 2))
        .timeout_escalation(TimeoutEscalation::Custom {
            scale_fn: |attempt| if attempt > 1 { f64::MAX } else { 1.0 },
        })
        .build()
        .unwrap();

    let response = transporter
        .execute(
            Request::read(Method::GET, "1/indexes"),
            RequestOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(response.attempts, 2);
    assert_eq!(response.data, json!({"items": []}));
}
