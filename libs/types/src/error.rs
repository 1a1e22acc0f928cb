//! Error types for schedule payload handling.

use thiserror::Error;

/// Errors raised while decoding the payload of a schedule request.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The action tag is not one of the known lifecycle actions.
    #[error("unknown schedule action: {0}")]
    UnknownAction(String),

    /// The action requires a payload but none was attached.
    #[error("missing payload for action {action}")]
    Missing { action: String },

    /// The payload could not be decoded for the given action.
    #[error("malformed payload for action {action}: {source}")]
    Malformed {
        action: String,
        #[source]
        source: serde_json::Error,
    },
}
