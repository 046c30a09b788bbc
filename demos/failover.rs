//! Failover example against a simulated cluster.
//!
//! This example shows how to:
//! - Plug a custom requester into the transporter
//! - Watch a call fail over when the first host times out
//! - See the failed host skipped on the next call
//! - Serve repeated cacheable calls from the response cache
//! - Collapse identical concurrent calls into one attempt
//!
//! Run with: `cargo run --example failover`

use async_trait::async_trait;
use http::{Method, StatusCode};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchyard::requester::{HttpRequest, HttpResponse, Requester, RequesterError};
use switchyard::{CallKind, Error, Host, Request, RequestOptions, Transporter};

/// Pretends the first host is unreachable and answers from every other one.
struct SimulatedCluster {
    sent: AtomicUsize,
}

#[async_trait]
impl Requester for SimulatedCluster {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, RequesterError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        println!(
            "  -> {} {} (timeout {:?})",
            request.host.url, request.path, request.response_timeout
        );

        if request.host.url == "APP-1.example.net" {
            tokio::time::sleep(request.response_timeout).await;
            return Err(RequesterError::Timeout);
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        let body = json!({
            "hits": [{ "objectID": "42", "name": "Phone" }],
            "nbHits": 1,
            "servedBy": request.host.url,
        });
        Ok(HttpResponse::new(StatusCode::OK, body.to_string()))
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("switchyard=debug,failover=info")
        .init();

    let cluster = Arc::new(SimulatedCluster {
        sent: AtomicUsize::new(0),
    });

    let transporter = Transporter::builder()
        .host(Host::new("APP-1.example.net", CallKind::ReadWrite).with_priority(1))
        .host(Host::new("APP-2.example.net", CallKind::ReadWrite).with_priority(2))
        .host(Host::new("APP-3.example.net", CallKind::ReadWrite).with_priority(3))
        .read_timeout(Duration::from_millis(250))
        .connect_timeout(Duration::from_millis(100))
        .requester(cluster.clone())
        .build()?;

    let search = || {
        Request::read(Method::POST, "1/indexes/products/query")
            .with_data(json!({ "query": "phone" }))
    };

    println!("=== Failover ===");
    let response = transporter
        .execute(search(), RequestOptions::default())
        .await?;
    println!("Served by: {:?}", response.host);
    println!("Attempts: {}", response.attempts);
    println!("Latency: {:?}", response.latency);
    println!();

    println!("=== Failed host is skipped ===");
    let response = transporter
        .execute(search(), RequestOptions::default())
        .await?;
    println!("Served by: {:?} in {} attempt(s)", response.host, response.attempts);
    for host in transporter.host_pool().all() {
        println!(
            "  {} available: {}",
            host.url,
            transporter.host_pool().is_available(&host.url)
        );
    }
    println!();

    println!("=== Response cache ===");
    let before = cluster.sent.load(Ordering::SeqCst);
    for _ in 0..3 {
        let response = transporter
            .execute(search().cacheable(true), RequestOptions::default())
            .await?;
        println!("from_cache: {}", response.from_cache);
    }
    println!(
        "Network attempts for 3 calls: {}",
        cluster.sent.load(Ordering::SeqCst) - before
    );
    println!();

    println!("=== Concurrent identical calls ===");
    transporter.clear_cache().await?;
    let before = cluster.sent.load(Ordering::SeqCst);
    let calls = (0..5).map(|_| {
        transporter.execute(search().cacheable(true), RequestOptions::default())
    });
    let responses = futures::future::try_join_all(calls).await?;
    println!(
        "{} responses from {} network attempt(s)",
        responses.len(),
        cluster.sent.load(Ordering::SeqCst) - before
    );

    Ok(())
}
