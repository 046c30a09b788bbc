//! # Switchyard - failover-aware transport for search API clients
//!
//! Switchyard turns a logical read or write into HTTP attempts against a ranked
//! pool of hosts. Failed hosts are skipped until a cooldown elapses, timeouts grow
//! with every failover, cacheable responses are kept, and identical calls made
//! while one is already running share its result.
//!
//! ## Quick Start
//!
//! ```no_run
//! use switchyard::{CallKind, Host, Request, RequestOptions, Transporter};
//! use http::Method;
//! use serde::Deserialize;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct SearchResult {
//!     hits: Vec<serde_json::Value>,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), switchyard::Error> {
//!     let transporter = Transporter::builder()
//!         .host(Host::new("APP-dsn.example.net", CallKind::Read))
//!         .host(Host::new("APP.example.net", CallKind::Write))
//!         .host(Host::new("APP-1.example.net", CallKind::ReadWrite).with_priority(1))
//!         .host(Host::new("APP-2.example.net", CallKind::ReadWrite).with_priority(2))
//!         .read_timeout(Duration::from_secs(2))
//!         .build()?;
//!
//!     let request = Request::read(Method::POST, "1/indexes/products/query")
//!         .with_data(json!({ "query": "phone" }))
//!         .cacheable(true);
//!
//!     let result = transporter
//!         .read::<SearchResult>(request, RequestOptions::default())
//!         .await?;
//!     println!("{} hits from {:?}", result.data.hits.len(), result.host);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Host failover** - hosts ranked by priority and call kind, failed hosts
//!   re-qualified lazily after a cooldown
//! - **Timeout escalation** - each failover gets a larger budget, reset per call
//! - **Response caching** - pluggable [`Cache`](cache::Cache) implementations
//! - **Request deduplication** - concurrent identical cacheable calls hit the network once
//! - **Typed errors** - 4xx rejections, exhausted hosts and configuration problems
//!   are distinct [`Error`] variants with the per-host attempt history
//! - **Injectable HTTP** - any [`Requester`](requester::Requester); `reqwest` by default
//! - **Structured logging** with `tracing`
//!
//! ## Error Handling
//!
//! ```no_run
//! use switchyard::{Error, Request, RequestOptions, Transporter};
//! use http::Method;
//!
//! # async fn example(transporter: Transporter) {
//! let request = Request::write(Method::DELETE, "1/indexes/products");
//! match transporter.execute(request, RequestOptions::default()).await {
//!     Ok(response) => println!("Deleted: {}", response.data),
//!     Err(Error::ApiError { status, message, .. }) => {
//!         eprintln!("Rejected ({}): {}", status, message);
//!     }
//!     Err(Error::UnreachableHosts { stack_trace, last_error }) => {
//!         eprintln!("{} hosts failed, last: {}", stack_trace.len(), last_error);
//!     }
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! # }
//! ```

pub mod cache;
mod error;
mod host;
mod request;
pub mod requester;
mod response;
pub mod retry;
pub mod search;
mod transporter;
mod user_agent;

pub use error::{Error, Result, StackFrame};
pub use host::{CallKind, Host, HostPool, HostState, HostStatus, Protocol, DEFAULT_HOST_COOLDOWN};
pub use request::{Request, RequestOptions};
pub use response::Response;
pub use retry::{TimeoutEscalation, Timeouts};
pub use transporter::{Transporter, TransporterBuilder};
pub use user_agent::{UserAgent, USER_AGENT_PARAMETER};
