//! Failover policy: what an attempt's outcome means, which host comes next, and
//! how long the next attempt may take.
//!
//! A logical call walks a fixed snapshot of hosts taken when it starts. Each
//! attempt ends in one of three [`Outcome`]s:
//!
//! - `Success` (2xx) ends the call;
//! - `Fatal` (4xx) ends the call, the host answered correctly and stays up;
//! - `Retryable` (timeout, network error, any other status) marks the host down
//!   and moves on to the next host with an escalated timeout.
//!
//! When the snapshot is exhausted the call fails with
//! [`Error::UnreachableHosts`](crate::Error::UnreachableHosts).

use crate::requester::{HttpResponse, RequesterError};
use crate::{CallKind, Error, Host, StackFrame};
use std::time::Duration;

/// Base timeouts for one attempt, before escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Time allowed to establish a connection.
    pub connect: Duration,
    /// Time allowed for a read host to answer.
    pub read: Duration,
    /// Time allowed for a write host to answer.
    pub write: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(2),
            read: Duration::from_secs(5),
            write: Duration::from_secs(30),
        }
    }
}

impl Timeouts {
    /// The response timeout base for a call kind.
    ///
    /// `ReadWrite` is not a call kind in practice; it gets the write budget.
    pub fn response_for(&self, call: CallKind) -> Duration {
        match call {
            CallKind::Read => self.read,
            CallKind::Write | CallKind::ReadWrite => self.write,
        }
    }
}

/// How timeouts grow across the attempts of one logical call.
///
/// The first attempt always uses the base timeout. The budget resets for every
/// logical call.
///
/// # Examples
///
/// ```
/// use switchyard::TimeoutEscalation;
/// use std::time::Duration;
///
/// let base = Duration::from_secs(2);
///
/// // 2s, 4s, 6s...
/// let linear = TimeoutEscalation::Linear;
/// assert_eq!(linear.timeout_for_attempt(base, 3), Duration::from_secs(6));
///
/// // 2s, 6s, 18s...
/// let exponential = TimeoutEscalation::Exponential { factor: 3.0 };
/// assert_eq!(exponential.timeout_for_attempt(base, 3), Duration::from_secs(18));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub enum TimeoutEscalation {
    /// Every attempt uses the base timeout.
    None,

    /// Attempt `n` gets `base * n`.
    #[default]
    Linear,

    /// Attempt `n` gets `base * factor^(n - 1)`.
    Exponential {
        /// Growth per attempt.
        factor: f64,
    },

    /// Attempt `n` gets `base * scale_fn(n)`.
    Custom {
        /// Takes the attempt number (1-indexed) and returns the multiplier.
        scale_fn: fn(attempt: usize) -> f64,
    },
}

impl TimeoutEscalation {
    /// Returns the multiplier applied to the base timeout for `attempt` (1-indexed).
    pub fn scale(&self, attempt: usize) -> f64 {
        let attempt = attempt.max(1);
        match self {
            TimeoutEscalation::None => 1.0,
            TimeoutEscalation::Linear => attempt as f64,
            TimeoutEscalation::Exponential { factor } => {
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                factor.powi(exponent)
            }
            TimeoutEscalation::Custom { scale_fn } => scale_fn(attempt),
        }
    }

    /// Returns the timeout for `attempt` (1-indexed) given a base.
    ///
    /// Nonsensical multipliers (negative, NaN) fall back to the base; overflowing
    /// ones saturate.
    pub fn timeout_for_attempt(&self, base: Duration, attempt: usize) -> Duration {
        let scale = self.scale(attempt);
        if scale.is_nan() || scale < 0.0 {
            return base;
        }
        Duration::try_from_secs_f64(base.as_secs_f64() * scale).unwrap_or(Duration::MAX)
    }
}

/// Classification of one attempt.
#[derive(Debug)]
pub enum Outcome {
    /// 2xx.
    Success(HttpResponse),
    /// 4xx: the service rejected the request.
    Fatal(HttpResponse),
    /// Anything else; try the next host.
    Retryable(Error),
}

impl Outcome {
    /// Classifies what the requester returned.
    pub fn classify(result: Result<HttpResponse, RequesterError>) -> Self {
        match result {
            Ok(response) if response.status.is_success() => Outcome::Success(response),
            Ok(response) if response.status.is_client_error() => Outcome::Fatal(response),
            Ok(response) => Outcome::Retryable(Error::HttpError {
                status: response.status,
                raw_response: response.body,
                headers: response.headers,
            }),
            Err(e) => Outcome::Retryable(e.into()),
        }
    }
}

/// Where a logical call stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    /// Hosts remain to be tried.
    PendingHosts,
    /// An attempt is in flight.
    Attempting,
    /// The last attempt succeeded.
    Success,
    /// The last attempt failed in a way another host might not.
    RetryableFailure,
    /// The last attempt failed in a way no host can fix.
    FatalFailure,
}

/// The next attempt to make.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// The host to send to.
    pub host: Host,
    /// 1-indexed attempt number within the logical call.
    pub number: usize,
}

/// Attempt bookkeeping for one logical call.
///
/// Hosts are handed out in snapshot order, each at most once.
#[derive(Debug)]
pub struct RetryState {
    hosts: Vec<Host>,
    next: usize,
    phase: RetryPhase,
    stack_trace: Vec<StackFrame>,
}

impl RetryState {
    /// Starts a call over the given host snapshot.
    pub fn new(hosts: Vec<Host>) -> Self {
        Self {
            hosts,
            next: 0,
            phase: RetryPhase::PendingHosts,
            stack_trace: Vec::new(),
        }
    }

    /// The current phase.
    pub fn phase(&self) -> RetryPhase {
        self.phase
    }

    /// Hosts not yet attempted.
    pub fn tries_left(&self) -> usize {
        self.hosts.len() - self.next
    }

    /// Attempts recorded so far.
    pub fn stack_trace(&self) -> &[StackFrame] {
        &self.stack_trace
    }

    /// Hands out the next host, or `None` once the snapshot is exhausted or the
    /// call has reached a terminal phase.
    pub fn next_attempt(&mut self) -> Option<Attempt> {
        match self.phase {
            RetryPhase::PendingHosts | RetryPhase::RetryableFailure => {}
            RetryPhase::Attempting | RetryPhase::Success | RetryPhase::FatalFailure => {
                return None
            }
        }

        let host = self.hosts.get(self.next)?.clone();
        self.next += 1;
        self.phase = RetryPhase::Attempting;
        Some(Attempt {
            host,
            number: self.next,
        })
    }

    /// Records a successful attempt.
    pub fn succeed(&mut self) {
        self.phase = RetryPhase::Success;
    }

    /// Records a retryable failure; the call goes back to pending hosts.
    pub fn fail_retryable(&mut self, frame: StackFrame) {
        self.stack_trace.push(frame);
        self.phase = if self.tries_left() > 0 {
            RetryPhase::PendingHosts
        } else {
            RetryPhase::RetryableFailure
        };
    }

    /// Records a fatal failure and returns the full attempt history.
    pub fn fail_fatal(&mut self, frame: StackFrame) -> Vec<StackFrame> {
        self.stack_trace.push(frame);
        self.phase = RetryPhase::FatalFailure;
        std::mem::take(&mut self.stack_trace)
    }

    /// Builds the error for a call whose hosts all failed.
    pub fn into_error(self) -> Error {
        let last_error = match self.stack_trace.last() {
            Some(frame) => frame.error.clone(),
            None => Error::Configuration("no host was attempted".to_string()),
        };

        Error::UnreachableHosts {
            stack_trace: self.stack_trace,
            last_error: Box::new(last_error),
        }
    }
}
