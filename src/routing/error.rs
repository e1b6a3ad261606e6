//! Error types for the few conditions that are not routing-domain outcomes.
//!
//! Routing failures (blocked cells, exhausted searches, clear corridors) are
//! reported as values. The errors here cover missing mandatory inputs and
//! faults raised by host collaborators. Lookup faults are logged where they
//! occur; the connector router turns missing inputs into an `invalid` result.

/// A bounds lookup failed inside the host.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("bounds lookup for `{id}` failed: {message}")]
pub struct SourceError {
    pub id: String,
    pub message: String,
}

impl SourceError {
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Self {
        SourceError {
            id: id.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum RouteError {
    /// The connector has no start point.
    #[error("connector `{0}` has no start point")]
    MissingStart(String),

    /// Neither an endpoint nor a target box could be resolved.
    #[error("connector `{0}` has no endpoint and no target box")]
    MissingTarget(String),
}
