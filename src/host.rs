//! Candidate hosts and their best-effort health tracking.
//!
//! A [`HostPool`] ranks the configured hosts for a call kind. Hosts that failed
//! recently are skipped until their cooldown elapses; the check is lazy and happens
//! when hosts are selected, there is no background timer.

use crate::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Default time a failed host is kept out of rotation.
pub const DEFAULT_HOST_COOLDOWN: Duration = Duration::from_secs(120);

/// The class of operation a host accepts, or a call performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    /// Reads only (searches, gets).
    Read,
    /// Writes only (indexing, settings).
    Write,
    /// Both reads and writes.
    ReadWrite,
}

impl CallKind {
    /// Returns `true` if a host accepting `self` can serve a call of kind `call`.
    ///
    /// ```
    /// use switchyard::CallKind;
    ///
    /// assert!(CallKind::ReadWrite.accepts(CallKind::Read));
    /// assert!(CallKind::Write.accepts(CallKind::Write));
    /// assert!(!CallKind::Read.accepts(CallKind::Write));
    /// ```
    pub fn accepts(self, call: CallKind) -> bool {
        match (self, call) {
            (CallKind::ReadWrite, _) => true,
            (CallKind::Read, CallKind::Read) => true,
            (CallKind::Write, CallKind::Write) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallKind::Read => f.write_str("read"),
            CallKind::Write => f.write_str("write"),
            CallKind::ReadWrite => f.write_str("read-write"),
        }
    }
}

/// URL scheme used to reach a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain HTTP, mostly useful against local test servers.
    Http,
    /// HTTPS.
    #[default]
    Https,
}

impl Protocol {
    /// The URL scheme for this protocol.
    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

/// A candidate host.
///
/// `url` is the authority part only (`host[:port]`); the scheme comes from
/// `protocol`. Lower `priority` values are tried first.
///
/// # Examples
///
/// ```
/// use switchyard::{CallKind, Host, Protocol};
///
/// let host = Host::new("127.0.0.1:8080", CallKind::Read)
///     .with_protocol(Protocol::Http)
///     .with_priority(2);
///
/// assert_eq!(host.base_url(), "http://127.0.0.1:8080");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Host {
    /// The host authority, e.g. `search.example.com` or `127.0.0.1:7700`.
    pub url: String,
    /// Which call kinds this host serves.
    pub accept: CallKind,
    /// The scheme used to reach the host.
    #[serde(default)]
    pub protocol: Protocol,
    /// Rank within the pool, ascending.
    #[serde(default)]
    pub priority: u32,
}

impl Host {
    /// Creates an HTTPS host with priority 0.
    pub fn new(url: impl Into<String>, accept: CallKind) -> Self {
        Self {
            url: url.into(),
            accept,
            protocol: Protocol::Https,
            priority: 0,
        }
    }

    /// Sets the protocol.
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Returns `scheme://url`.
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol.scheme(), self.url)
    }
}

/// Health state of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Up,
    Down,
}

/// Mutable status associated with a host.
#[derive(Debug, Clone, Copy)]
pub struct HostStatus {
    /// Current state.
    pub state: HostState,
    /// When the state last changed.
    pub last_update: Instant,
}

impl HostStatus {
    fn up() -> Self {
        Self {
            state: HostState::Up,
            last_update: Instant::now(),
        }
    }

    fn cooled_down(&self, cooldown: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_update) >= cooldown
    }
}

/// The ranked set of hosts shared by every call of a transporter.
///
/// Status updates are last-writer-wins and never fail; a stale status only costs
/// an extra attempt.
#[derive(Debug)]
pub struct HostPool {
    hosts: Vec<Host>,
    statuses: RwLock<HashMap<String, HostStatus>>,
    cooldown: Duration,
}

impl HostPool {
    /// Creates a pool from the given hosts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `hosts` is empty or contains the same
    /// url twice.
    pub fn new(hosts: Vec<Host>, cooldown: Duration) -> Result<Self> {
        if hosts.is_empty() {
            return Err(Error::Configuration(
                "at least one host is required".to_string(),
            ));
        }

        let mut statuses = HashMap::with_capacity(hosts.len());
        for host in &hosts {
            if statuses.insert(host.url.clone(), HostStatus::up()).is_some() {
                return Err(Error::Configuration(format!(
                    "host {} is configured more than once",
                    host.url
                )));
            }
        }

        Ok(Self {
            hosts,
            statuses: RwLock::new(statuses),
            cooldown,
        })
    }

    /// All configured hosts, in configuration order.
    pub fn all(&self) -> &[Host] {
        &self.hosts
    }

    /// The configured cooldown window.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Returns the hosts eligible for a call of kind `call`, best first.
    ///
    /// Hosts that are up come first by ascending priority, followed by failed hosts
    /// whose cooldown has elapsed. Failed hosts still cooling down are left out,
    /// unless every compatible host is in that situation, in which case the whole
    /// compatible set is returned by priority.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if no host accepts `call`.
    pub fn hosts(&self, call: CallKind) -> Result<Vec<Host>> {
        let mut compatible: Vec<&Host> = self
            .hosts
            .iter()
            .filter(|host| host.accept.accepts(call))
            .collect();

        if compatible.is_empty() {
            return Err(Error::Configuration(format!(
                "no host accepts {} calls",
                call
            )));
        }

        // Stable sort keeps configuration order between equal priorities.
        compatible.sort_by_key(|host| host.priority);

        let now = Instant::now();
        let statuses = self.statuses.read();
        let mut up = Vec::new();
        let mut requalified = Vec::new();

        for host in &compatible {
            match statuses.get(&host.url) {
                Some(status) if status.state == HostState::Down => {
                    if status.cooled_down(self.cooldown, now) {
                        requalified.push((*host).clone());
                    }
                }
                _ => up.push((*host).clone()),
            }
        }
        drop(statuses);

        if up.is_empty() && requalified.is_empty() {
            tracing::warn!(
                call = %call,
                hosts = compatible.len(),
                "All hosts are down, retrying the full pool"
            );
            return Ok(compatible.into_iter().cloned().collect());
        }

        up.extend(requalified);
        Ok(up)
    }

    /// Marks the host with the given url as down. Unknown urls are ignored.
    pub fn mark_down(&self, url: &str) {
        self.set_state(url, HostState::Down);
    }

    /// Marks the host with the given url as up. Unknown urls are ignored.
    pub fn mark_up(&self, url: &str) {
        self.set_state(url, HostState::Up);
    }

    /// Returns the current status of a host.
    pub fn status(&self, url: &str) -> Option<HostStatus> {
        self.statuses.read().get(url).copied()
    }

    /// Returns `true` if the host would currently be selected on its own merits,
    /// i.e. it is up or its cooldown has elapsed.
    pub fn is_available(&self, url: &str) -> bool {
        match self.status(url) {
            Some(status) => {
                status.state == HostState::Up
                    || status.cooled_down(self.cooldown, Instant::now())
            }
            None => false,
        }
    }

    fn set_state(&self, url: &str, state: HostState) {
        let mut statuses = self.statuses.write();
        if let Some(status) = statuses.get_mut(url) {
            status.state = state;
            status.last_update = Instant::now();
        }
    }
}
