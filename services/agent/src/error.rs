//! Error types for the orchestration engine.
//!
//! Collaborators (store, runtime, prober) report their own error enums; the
//! engine wraps them with the operation and entity it was working on. Every
//! variant maps onto one [`ErrorKind`], which is also what travels between
//! hosts when a request is forwarded.

use std::fmt;

use lhorc_types::PayloadError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::IdentityError;
use crate::probe::ProbeError;
use crate::runtime::RuntimeError;
use crate::store::StoreError;

/// Coarse failure classes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    InvalidArgument,
    UnknownAction,
    RuntimeFailure,
    ReadinessTimeout,
    StoreFailure,
    ConnectivityFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyExists => "already_exists",
            Self::NotFound => "not_found",
            Self::InvalidArgument => "invalid_argument",
            Self::UnknownAction => "unknown_action",
            Self::RuntimeFailure => "runtime_failure",
            Self::ReadinessTimeout => "readiness_timeout",
            Self::StoreFailure => "store_failure",
            Self::ConnectivityFailure => "connectivity_failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine-level error.
#[derive(Debug, Error)]
pub enum OrcError {
    #[error("{entity} {name} already exists")]
    AlreadyExists { entity: &'static str, name: String },

    #[error("{entity} {name} not found")]
    NotFound { entity: &'static str, name: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("received request for the wrong orchestrator {0}")]
    WrongOrchestrator(String),

    #[error("cannot find specified action {0}")]
    UnknownAction(String),

    #[error("invalid schedule payload: {0}")]
    Payload(#[source] PayloadError),

    #[error("failed to {op} {target}: {source}")]
    Runtime {
        op: &'static str,
        target: String,
        #[source]
        source: RuntimeError,
    },

    #[error(transparent)]
    Readiness(#[from] ProbeError),

    #[error("failed to {op} {key}: {source}")]
    Store {
        op: &'static str,
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("connectivity failure: {0}")]
    Connectivity(String),

    #[error("host identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("host {host} rejected request ({kind}): {message}")]
    Remote {
        host: String,
        kind: ErrorKind,
        message: String,
    },

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<OrcError>,
    },
}

pub type Result<T> = std::result::Result<T, OrcError>;

impl OrcError {
    pub fn not_found(entity: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            name: name.into(),
        }
    }

    pub fn already_exists(entity: &'static str, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity,
            name: name.into(),
        }
    }

    pub fn runtime(op: &'static str, target: impl Into<String>, source: RuntimeError) -> Self {
        Self::Runtime {
            op,
            target: target.into(),
            source,
        }
    }

    pub fn store(op: &'static str, key: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            op,
            key: key.into(),
            source,
        }
    }

    /// Wrap with a description of the operation that failed.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Failure class, looking through any context wrapping.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidArgument(_) | Self::WrongOrchestrator(_) | Self::Payload(_) => {
                ErrorKind::InvalidArgument
            }
            Self::UnknownAction(_) => ErrorKind::UnknownAction,
            Self::Runtime { .. } => ErrorKind::RuntimeFailure,
            Self::Readiness(ProbeError::Timeout { .. }) => ErrorKind::ReadinessTimeout,
            Self::Readiness(ProbeError::Client(_)) => ErrorKind::ConnectivityFailure,
            Self::Store { .. } => ErrorKind::StoreFailure,
            Self::Connectivity(_) => ErrorKind::ConnectivityFailure,
            Self::Identity(IdentityError::NoAddress | IdentityError::Interfaces(_)) => {
                ErrorKind::ConnectivityFailure
            }
            Self::Identity(_) => ErrorKind::StoreFailure,
            Self::Remote { kind, .. } => *kind,
            Self::Context { source, .. } => source.kind(),
        }
    }
}

impl From<PayloadError> for OrcError {
    fn from(err: PayloadError) -> Self {
        match err {
            PayloadError::UnknownAction(action) => Self::UnknownAction(action),
            other => Self::Payload(other),
        }
    }
}

/// Context wrapping for engine results.
pub trait ErrorContext<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ErrorContext<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_context_preserves_kind() {
        let err = OrcError::not_found("volume", "vol1")
            .context("fail to create replica for vol1")
            .context("outer");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            err.to_string(),
            "outer: fail to create replica for vol1: volume vol1 not found"
        );
    }

    #[test]
    fn test_payload_unknown_action_maps_to_unknown_action() {
        let err: OrcError = PayloadError::UnknownAction("resize".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::UnknownAction);

        let err: OrcError = PayloadError::Missing {
            action: "create-replica".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_wrong_orchestrator_is_invalid_argument() {
        let err = OrcError::WrongOrchestrator("k8s".to_string());
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_readiness_kind() {
        let err: OrcError = ProbeError::Timeout {
            target: "/dev/longhorn/vol1".to_string(),
            timeout: Duration::from_secs(30),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::ReadinessTimeout);
        assert!(err.to_string().contains("/dev/longhorn/vol1"));
    }

    #[tokio::test]
    async fn test_probe_client_failure_is_connectivity() {
        let source = reqwest::get("not a url").await.unwrap_err();
        let err: OrcError = ProbeError::Client(source).into();
        assert_eq!(err.kind(), ErrorKind::ConnectivityFailure);
    }

    #[test]
    fn test_identity_kinds() {
        let err: OrcError = IdentityError::NoAddress.into();
        assert_eq!(err.kind(), ErrorKind::ConnectivityFailure);

        let err: OrcError = IdentityError::Empty("/tmp/.physical_host_uuid".into()).into();
        assert_eq!(err.kind(), ErrorKind::StoreFailure);
    }

    #[test]
    fn test_remote_kind_round_trips() {
        let kind: ErrorKind = serde_json::from_str("\"already_exists\"").unwrap();
        let err = OrcError::Remote {
            host: "h2".to_string(),
            kind,
            message: "volume vol1 already exists".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(
            serde_json::to_string(&ErrorKind::ReadinessTimeout).unwrap(),
            format!("\"{}\"", ErrorKind::ReadinessTimeout.as_str())
        );
    }
}
