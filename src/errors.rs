//! Typed error taxonomy for the reviewer assignment service.
//!
//! Store implementations classify storage failures (unique violations,
//! missing rows, foreign-key misses) into these variants at the call site;
//! services and the transactional boundary propagate them unchanged.

use std::fmt;

use thiserror::Error;

/// The kind of record a `NotFound` / `AlreadyExists` error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Team,
    User,
    PullRequest,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Team => write!(f, "team"),
            Entity::User => write!(f, "user"),
            Entity::PullRequest => write!(f, "pull request"),
        }
    }
}

/// Errors surfaced by the assignment engine and its collaborators.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: String },

    #[error("{entity} {id} already exists")]
    AlreadyExists { entity: Entity, id: String },

    #[error("cannot reassign on merged pull request {pr_id}")]
    PrMerged { pr_id: String },

    #[error("reviewer {reviewer_id} is not assigned to pull request {pr_id}")]
    NotAssigned { pr_id: String, reviewer_id: String },

    #[error("no active replacement candidate in team for pull request {pr_id}")]
    NoCandidate { pr_id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn not_found(entity: Entity, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn already_exists(entity: Entity, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_carries_entity_and_id() {
        let err = ServiceError::not_found(Entity::User, "u42");
        match &err {
            ServiceError::NotFound { entity, id } => {
                assert_eq!(*entity, Entity::User);
                assert_eq!(id, "u42");
            }
            _ => panic!("Expected NotFound"),
        }
        assert_eq!(err.to_string(), "user u42 not found");
    }

    #[test]
    fn already_exists_names_the_pull_request() {
        let err = ServiceError::already_exists(Entity::PullRequest, "pr-1");
        assert_eq!(err.to_string(), "pull request pr-1 already exists");
    }

    #[test]
    fn internal_converts_from_anyhow() {
        let err: ServiceError = anyhow::anyhow!("disk on fire").into();
        assert!(matches!(err, ServiceError::Internal(_)));
        assert_eq!(err.to_string(), "disk on fire");
    }

    #[test]
    fn reassign_failures_are_distinct() {
        let merged = ServiceError::PrMerged {
            pr_id: "pr-1".into(),
        };
        let not_assigned = ServiceError::NotAssigned {
            pr_id: "pr-1".into(),
            reviewer_id: "u2".into(),
        };
        let no_candidate = ServiceError::NoCandidate {
            pr_id: "pr-1".into(),
        };
        assert!(matches!(merged, ServiceError::PrMerged { .. }));
        assert!(matches!(not_assigned, ServiceError::NotAssigned { .. }));
        assert!(matches!(no_candidate, ServiceError::NoCandidate { .. }));
        assert!(not_assigned.to_string().contains("u2"));
    }

    #[test]
    fn implements_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ServiceError::Cancelled);
        assert_std_error(&ServiceError::Conflict("dup".into()));
    }
}
