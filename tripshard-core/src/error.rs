//! Error types for tripshard operations

use crate::{EntityType, PlanId, ShardKey, Version};
use thiserror::Error;
use uuid::Uuid;

/// Request-path storage errors.
///
/// `NotFound`, `VersionConflict`, `OrderConflict` and `ConstraintViolation`
/// are expected outcomes the caller can act on. `Infrastructure` aborts the
/// request's transaction and may be retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("{entity_type} {id} not found")]
    NotFound { entity_type: EntityType, id: Uuid },

    #[error("Travel plan {plan_id} was modified by another user (current version {current_version})")]
    VersionConflict {
        plan_id: PlanId,
        current_version: Version,
    },

    #[error("Visit order {requested_order} is already taken for travel plan {plan_id}")]
    OrderConflict {
        plan_id: PlanId,
        requested_order: i32,
    },

    /// The write would leave the aggregate in a state its constraints
    /// forbid. Retrying the same request cannot succeed.
    #[error("Constraint violated: {reason}")]
    ConstraintViolation { reason: String },

    #[error("No shard configured for key '{key}'")]
    UnknownShard { key: ShardKey },

    #[error("Infrastructure failure: {reason}")]
    Infrastructure { reason: String },
}

impl StorageError {
    pub fn plan_not_found(id: PlanId) -> Self {
        StorageError::NotFound {
            entity_type: EntityType::Plan,
            id,
        }
    }

    pub fn location_not_found(id: Uuid) -> Self {
        StorageError::NotFound {
            entity_type: EntityType::Location,
            id,
        }
    }

    pub fn constraint_violation(reason: impl Into<String>) -> Self {
        StorageError::ConstraintViolation {
            reason: reason.into(),
        }
    }

    pub fn infrastructure(reason: impl Into<String>) -> Self {
        StorageError::Infrastructure {
            reason: reason.into(),
        }
    }

    /// Whether retrying the same request (after refreshing state for a
    /// version conflict) can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::Infrastructure { .. } | StorageError::VersionConflict { .. }
        )
    }
}

/// Errors from the cross-shard two-phase commit coordinator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommitError {
    #[error("Shard mapping is empty")]
    EmptyMapping,

    #[error("SQL script is empty")]
    EmptyScript,

    /// Phase 1 failed somewhere; every shard was rolled back.
    #[error("Aborted, rolled back everywhere. Reason: [{shard}] {reason}")]
    Aborted { shard: ShardKey, reason: String },

    /// Phase 2 failed on `failed_shard`. Shards in `committed` have the change,
    /// `failed_shard` is in doubt, and `prepared` still hold prepared
    /// transactions that need manual resolution.
    #[error(
        "Critical: commit phase failed on shard {failed_shard}: {reason}. \
         Committed: {committed:?}; still prepared: {prepared:?}"
    )]
    PartialCommit {
        failed_shard: ShardKey,
        reason: String,
        committed: Vec<ShardKey>,
        prepared: Vec<(ShardKey, String)>,
    },
}

impl CommitError {
    /// Process exit code for the administrative CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            CommitError::EmptyMapping | CommitError::EmptyScript => 1,
            CommitError::Aborted { .. } => 2,
            CommitError::PartialCommit { .. } => 3,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Cannot read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Cannot parse {source_name}: {reason}")]
    Parse { source_name: String, reason: String },
}

/// Master error type for all tripshard errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TripshardError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] CommitError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for tripshard operations.
pub type TripshardResult<T> = Result<T, TripshardError>;

/// Result type alias for request-path storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = StorageError::plan_not_found(Uuid::nil());
        let msg = err.to_string();
        assert!(msg.contains("Travel plan"));
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_conflicts_name_their_values() {
        let err = StorageError::VersionConflict {
            plan_id: Uuid::nil(),
            current_version: 7,
        };
        assert!(err.to_string().contains("current version 7"));

        let err = StorageError::OrderConflict {
            plan_id: Uuid::nil(),
            requested_order: 3,
        };
        assert!(err.to_string().contains("Visit order 3"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(StorageError::infrastructure("timeout").is_retryable());
        assert!(StorageError::VersionConflict {
            plan_id: Uuid::nil(),
            current_version: 2
        }
        .is_retryable());
        assert!(!StorageError::plan_not_found(Uuid::nil()).is_retryable());
        assert!(!StorageError::OrderConflict {
            plan_id: Uuid::nil(),
            requested_order: 1
        }
        .is_retryable());
        assert!(!StorageError::constraint_violation("departure before arrival").is_retryable());
    }

    #[test]
    fn test_commit_exit_codes_are_distinct() {
        let key = ShardKey::parse("7").unwrap();
        let aborted = CommitError::Aborted {
            shard: key,
            reason: "syntax error".to_string(),
        };
        let partial = CommitError::PartialCommit {
            failed_shard: key,
            reason: "connection reset".to_string(),
            committed: vec![],
            prepared: vec![],
        };
        assert_eq!(CommitError::EmptyScript.exit_code(), 1);
        assert_eq!(aborted.exit_code(), 2);
        assert_eq!(partial.exit_code(), 3);
    }

    #[test]
    fn test_error_conversion() {
        let err: TripshardError = StorageError::infrastructure("boom").into();
        assert!(matches!(err, TripshardError::Storage(_)));
        let err: TripshardError = CommitError::EmptyMapping.into();
        assert!(matches!(err, TripshardError::Commit(_)));
    }
}
