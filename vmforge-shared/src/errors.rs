//! Error taxonomy for template, planning, provisioning and deployment operations.

use thiserror::Error;

pub type ForgeResult<T> = Result<T, ForgeError>;

#[derive(Debug, Error)]
pub enum ForgeError {
    /// A template field violates an invariant. Raised before any external call.
    #[error("invalid value for `{field}`: {reason}")]
    Validation { field: String, reason: String },

    #[error("instance name '{0}' is already in use")]
    NameCollision(String),

    #[error("network '{0}' is not available on this host")]
    NoNetworkTarget(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A persisted record exists but cannot be turned back into a valid value.
    #[error("corrupt record {id}: {reason}")]
    CorruptRecord { id: String, reason: String },

    /// An external capability call failed.
    #[error("instance '{instance}' step {step_index} ({step}) failed: {message}")]
    Capability {
        instance: String,
        step: String,
        step_index: usize,
        message: String,
    },

    /// The instance was created but a later step failed; it is left partially configured.
    #[error(
        "instance '{instance}' ({handle}) is partially provisioned: step {failed_step} failed: {message}"
    )]
    PartialProvisioning {
        instance: String,
        handle: String,
        failed_step: String,
        message: String,
    },

    /// Raw failure reported by the hypervisor management layer.
    #[error("hypervisor error: {0}")]
    Engine(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ForgeError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn corrupt(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptRecord {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// The field named by a validation error, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_names_field() {
        let err = ForgeError::validation("cpu_count", "must be greater than zero");
        assert_eq!(err.field(), Some("cpu_count"));
        assert!(err.to_string().contains("cpu_count"));
    }

    #[test]
    fn test_capability_message_names_step() {
        let err = ForgeError::Capability {
            instance: "APP01".into(),
            step: "set_memory".into(),
            step_index: 3,
            message: "access denied".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("APP01"));
        assert!(msg.contains("step 3"));
        assert!(msg.contains("set_memory"));
    }
}
