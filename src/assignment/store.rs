//! Storage capabilities consumed by the services.
//!
//! Each trait groups one role's operations; a `UnitOfWork` is anything that
//! offers all of them inside a single transaction. Services never open or
//! commit transactions themselves: they hand a closure to a
//! `TransactionManager`, which commits when the closure returns `Ok` and
//! rolls back on any `Err`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::models::{
    NewPullRequest, PrStatistics, PullRequest, SortOrder, Team, User, UserAssignmentStats,
    UserUpsert,
};
use crate::errors::ServiceError;

/// Cancellation signal and optional deadline for one operation.
///
/// Store implementations call [`OpContext::check`] before every statement so
/// a fired token or an expired deadline aborts the unit of work.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancels the operation when the returned guard is dropped.
    pub fn drop_guard(&self) -> DropGuard {
        self.cancel.clone().drop_guard()
    }

    pub fn check(&self) -> Result<(), ServiceError> {
        if self.cancel.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(ServiceError::DeadlineExceeded);
        }
        Ok(())
    }
}

/// Teams and their members.
pub trait TeamDirectory {
    /// Fails with `AlreadyExists` when the name is taken.
    fn create_team(&self, name: &str) -> Result<Team, ServiceError>;

    fn get_team_by_name(&self, name: &str) -> Result<Team, ServiceError>;

    fn get_team_name_by_id(&self, team_id: i64) -> Result<String, ServiceError>;

    /// Insert or update the user keyed by id; returns the id.
    fn upsert_user(&self, user: &UserUpsert) -> Result<String, ServiceError>;

    fn get_user_by_id(&self, user_id: &str) -> Result<User, ServiceError>;

    fn set_user_active(&self, user_id: &str, is_active: bool) -> Result<(), ServiceError>;

    fn get_active_user_ids_in_team(&self, team_id: i64) -> Result<Vec<String>, ServiceError>;

    fn list_users_in_team(&self, team_id: i64) -> Result<Vec<User>, ServiceError>;
}

/// Pull requests and their reviewer edges.
pub trait PullRequestStore {
    /// Inserts an OPEN pull request. `AlreadyExists` on id collision,
    /// `NotFound` when the author does not exist.
    fn create_pr(&self, pr: &NewPullRequest) -> Result<PullRequest, ServiceError>;

    fn get_pr_by_id(&self, pr_id: &str) -> Result<PullRequest, ServiceError>;

    /// Sets status MERGED and stamps `merged_at` if it is not set yet.
    fn mark_merged(&self, pr_id: &str) -> Result<(), ServiceError>;

    /// Reviewer ids in assignment order.
    fn list_reviewers(&self, pr_id: &str) -> Result<Vec<String>, ServiceError>;

    /// `Conflict` if the edge already exists.
    fn assign_reviewer(&self, pr_id: &str, user_id: &str) -> Result<(), ServiceError>;

    /// `NotAssigned` if there is no such edge.
    fn delete_reviewer(&self, pr_id: &str, user_id: &str) -> Result<(), ServiceError>;

    /// Replace `old_id` with `new_id` atomically. `NotAssigned` if `old_id`
    /// is not assigned, `Conflict` if `new_id` already is.
    fn swap_reviewer(&self, pr_id: &str, old_id: &str, new_id: &str) -> Result<(), ServiceError>;

    /// Pull requests the user is assigned to review, newest first.
    fn list_reviews_of_user(&self, user_id: &str) -> Result<Vec<PullRequest>, ServiceError>;
}

/// Read-only reporting queries.
pub trait StatsReader {
    fn assignment_counts(&self, order: SortOrder)
    -> Result<Vec<UserAssignmentStats>, ServiceError>;

    fn pr_counts(&self) -> Result<PrStatistics, ServiceError>;
}

/// Everything a closure may touch inside one transaction.
pub trait UnitOfWork: TeamDirectory + PullRequestStore + StatsReader {}

impl<T> UnitOfWork for T where T: TeamDirectory + PullRequestStore + StatsReader {}

/// The transactional execution boundary.
#[async_trait]
pub trait TransactionManager: Send + Sync + 'static {
    /// Run `work` in one transaction and return its result. Any `Err` from
    /// `work`, or a cancellation observed before commit, rolls everything back.
    async fn run<T, F>(&self, ctx: &OpContext, work: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn UnitOfWork) -> Result<T, ServiceError> + Send + 'static;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_passes_check() {
        assert!(OpContext::new().check().is_ok());
    }

    #[test]
    fn cancelled_context_fails_check() {
        let ctx = OpContext::new();
        ctx.cancel();
        assert!(matches!(ctx.check(), Err(ServiceError::Cancelled)));
    }

    #[test]
    fn expired_deadline_fails_check() {
        let ctx = OpContext::new().with_deadline(Instant::now());
        assert!(matches!(ctx.check(), Err(ServiceError::DeadlineExceeded)));
    }

    #[test]
    fn drop_guard_cancels_shared_token() {
        let ctx = OpContext::new();
        let clone = ctx.clone();
        {
            let _guard = ctx.drop_guard();
        }
        assert!(clone.token().is_cancelled());
    }

    #[test]
    fn generous_timeout_is_not_expired() {
        let ctx = OpContext::with_token(CancellationToken::new()).with_timeout(Duration::from_secs(60));
        assert!(ctx.check().is_ok());
    }
}
