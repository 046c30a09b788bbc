//! The agent string sent with every request.

use std::fmt;

/// Query parameter carrying the agent string.
pub const USER_AGENT_PARAMETER: &str = "x-algolia-agent";

/// Identifies the client to the service, e.g.
/// `Switchyard for Rust (0.1.0); Search (0.1.0)`.
///
/// # Examples
///
/// ```
/// use switchyard::UserAgent;
///
/// let agent = UserAgent::new("0.1.0")
///     .add("Search", Some("0.1.0"))
///     .add("Search", Some("0.1.0"))
///     .add("my-app", None);
///
/// assert_eq!(
///     agent.value(),
///     "Switchyard for Rust (0.1.0); Search (0.1.0); my-app"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgent {
    value: String,
}

impl UserAgent {
    /// Creates the base agent for the given library version.
    pub fn new(version: &str) -> Self {
        Self {
            value: format!("Switchyard for Rust ({})", version),
        }
    }

    /// Appends a segment. Segments already present are not added twice.
    pub fn add(mut self, segment: &str, version: Option<&str>) -> Self {
        let added = match version {
            Some(version) => format!("; {} ({})", segment, version),
            None => format!("; {}", segment),
        };
        if !self.value.contains(&added) {
            self.value.push_str(&added);
        }
        self
    }

    /// The full agent string.
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl Default for UserAgent {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_VERSION"))
    }
}

impl fmt::Display for UserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}
