//! Error types for the upgrade engine
//!
//! Every error that reaches a caller carries enough context (spec ref, org,
//! version or definition id) to be logged and retried at a higher cadence.
//! Collaborator failures keep their own types ([`StoreError`],
//! [`RegistryError`], [`SinkError`]) and are wrapped with context here.

use msvc_model::{DefinitionId, HashError, ProtocolError, RangeError, TransitionError};

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    /// Version range on the definition does not parse
    #[error("invalid version range '{range}' for {spec_ref}: {source}")]
    InvalidRange {
        spec_ref: String,
        range: String,
        #[source]
        source: RangeError,
    },

    /// Registry lookup failed
    #[error("failed to find a highest version for {org}/{spec_ref} in range {range}: {source}")]
    Registry {
        spec_ref: String,
        org: String,
        range: String,
        #[source]
        source: RegistryError,
    },

    /// Node read or update on the registry failed
    #[error("exchange node {node_id}: {source}")]
    Node {
        node_id: String,
        #[source]
        source: RegistryError,
    },

    /// Record or attribute store failed
    #[error("store error while {context}: {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },

    /// Attribute data cannot be compiled into a policy
    #[error("policy compilation failed for {spec_ref} version {version}: {source}")]
    PolicyCompile {
        spec_ref: String,
        version: String,
        #[source]
        source: PolicyCompileError,
    },

    /// Registry record could not be fingerprinted
    #[error("failed to convert registry record for {spec_ref}: {source}")]
    Conversion {
        spec_ref: String,
        #[source]
        source: HashError,
    },

    /// Phase event not allowed in the current phase
    #[error("{definition}: {source}")]
    Transition {
        definition: String,
        #[source]
        source: TransitionError,
    },

    /// Policy sink rejected a request
    #[error("policy sink error: {0}")]
    Sink(#[from] SinkError),

    /// No such definition
    #[error("definition not found: {0}")]
    NotFound(DefinitionId),
}

impl UpgradeError {
    /// Wrap a store error with what was being done
    pub fn store(context: impl Into<String>, source: StoreError) -> Self {
        Self::Store {
            context: context.into(),
            source,
        }
    }

    /// Whether retrying later may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Registry { source, .. } | Self::Node { source, .. } => {
                source.is_transient() || matches!(source, RegistryError::NotFound { .. })
            }
            Self::Store { source, .. } => source.is_retryable(),
            Self::Sink(_) => true,
            Self::InvalidRange { .. }
            | Self::PolicyCompile { .. }
            | Self::Conversion { .. }
            | Self::Transition { .. }
            | Self::NotFound(_) => false,
        }
    }
}

/// Record and attribute store failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend could not be reached or refused the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be decoded
    #[error("corrupt record {key}: {message}")]
    Corrupt { key: String, message: String },

    /// Serialization of a record failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Transient backend failures are retryable; bad data is not
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Registry client failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Network or protocol hiccup; worth retrying after a delay
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("registry returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// Nothing in the catalog satisfies the request
    #[error("no version of {spec_ref} matches {range}")]
    NotFound { spec_ref: String, range: String },

    /// Response body did not decode
    #[error("malformed registry response: {0}")]
    Decode(String),
}

impl RegistryError {
    /// Transient errors are retried by the client wrapper
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => matches!(status, 502..=504),
            Self::NotFound { .. } | Self::Decode(_) => false,
        }
    }
}

/// Attribute data that cannot become a policy
#[derive(Debug, thiserror::Error)]
pub enum PolicyCompileError {
    /// Agreement protocol attribute is malformed
    #[error("error converting agreement protocol list attribute: {0}")]
    AgreementProtocol(#[from] ProtocolError),

    /// Compute attribute values out of range
    #[error("invalid compute attribute: {0}")]
    InvalidCompute(String),
}

/// Policy sink failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// Downstream consumer has gone away
    #[error("policy channel closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_carries_context() {
        let err = UpgradeError::Registry {
            spec_ref: "https://acme.com/svc/gps".into(),
            org: "acme".into(),
            range: "[1.0.0,INFINITY)".into(),
            source: RegistryError::Transport("connection reset".into()),
        };
        let text = err.to_string();
        assert!(text.contains("acme/https://acme.com/svc/gps"));
        assert!(text.contains("[1.0.0,INFINITY)"));
    }

    #[test]
    fn transient_classification() {
        assert!(RegistryError::Transport("reset".into()).is_transient());
        assert!(RegistryError::Status {
            status: 503,
            message: String::new()
        }
        .is_transient());
        assert!(!RegistryError::Status {
            status: 401,
            message: String::new()
        }
        .is_transient());
        assert!(!RegistryError::Decode("eof".into()).is_transient());
    }

    #[test]
    fn retryable_classification() {
        assert!(UpgradeError::store("reading", StoreError::Unavailable("locked".into())).is_retryable());
        assert!(!UpgradeError::store(
            "reading",
            StoreError::Corrupt {
                key: "k".into(),
                message: "truncated".into()
            }
        )
        .is_retryable());
        assert!(!UpgradeError::NotFound(DefinitionId::new()).is_retryable());
        assert!(UpgradeError::Sink(SinkError::Closed).is_retryable());
    }
}
