use std::time::Duration;

use crate::domain::UserId;

/// Core error type for the bot.
///
/// Adapter crates map their specific errors into this type so the pipeline can
/// decide between the generic service-unavailable reply, the unexpected-error
/// reply, and the completion fallback.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    /// The entitlement store could not be reached at all.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store answered, but the operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("upstream timed out after {0:?}")]
    UpstreamTimeout(Duration),

    /// The message carries nothing to answer; it is dropped without a reply.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("unknown user: {0}")]
    UnknownUser(UserId),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
