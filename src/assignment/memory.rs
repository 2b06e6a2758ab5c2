//! In-memory store with the same transactional contract as [`SqliteStore`].
//!
//! A unit of work runs against a private copy of the committed state. The
//! copy replaces the committed state only when the closure returns `Ok`,
//! so a failed or cancelled unit of work leaves no trace.
//!
//! [`SqliteStore`]: super::sqlite::SqliteStore

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;

use super::models::*;
use super::store::{
    OpContext, PullRequestStore, StatsReader, TeamDirectory, TransactionManager, UnitOfWork,
};
use crate::errors::{Entity, ServiceError};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_team_id: i64,
    teams: Vec<Team>,
    users: Vec<User>,
    /// Creation order.
    prs: Vec<PullRequest>,
    /// `(pull_request_id, user_id)` in assignment order.
    reviewers: Vec<(String, String)>,
}

struct Inner {
    committed: Mutex<MemoryState>,
    fail_mark_merged: AtomicBool,
    /// `usize::MAX` when disabled.
    fail_assign_after: AtomicUsize,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            committed: Mutex::default(),
            fail_mark_merged: AtomicBool::new(false),
            fail_assign_after: AtomicUsize::new(usize::MAX),
        }
    }
}

/// Cloneable handle; clones share the same committed state.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `mark_merged` call fail with an internal error.
    pub fn set_fail_mark_merged(&self, fail: bool) {
        self.inner.fail_mark_merged.store(fail, Ordering::SeqCst);
    }

    /// Within each unit of work, let `n` `assign_reviewer` calls succeed and
    /// fail the next one with an internal error. `None` disables it.
    pub fn set_fail_assign_after(&self, n: Option<usize>) {
        self.inner
            .fail_assign_after
            .store(n.unwrap_or(usize::MAX), Ordering::SeqCst);
    }

    fn run_sync<T, F>(&self, ctx: &OpContext, work: F) -> Result<T, ServiceError>
    where
        F: FnOnce(&dyn UnitOfWork) -> Result<T, ServiceError>,
    {
        ctx.check()?;
        // Held for the whole unit of work, which serializes writers.
        let mut committed = self
            .inner
            .committed
            .lock()
            .map_err(|e| anyhow!("Store lock poisoned: {}", e))?;

        let tx = MemoryTx {
            state: RefCell::new(committed.clone()),
            ctx,
            fail_mark_merged: self.inner.fail_mark_merged.load(Ordering::SeqCst),
            assigns_left: Cell::new(self.inner.fail_assign_after.load(Ordering::SeqCst)),
        };
        let out = work(&tx)?;
        ctx.check()?;

        *committed = tx.state.into_inner();
        Ok(out)
    }
}

#[async_trait]
impl TransactionManager for InMemoryStore {
    async fn run<T, F>(&self, ctx: &OpContext, work: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn UnitOfWork) -> Result<T, ServiceError> + Send + 'static,
    {
        self.run_sync(ctx, work)
    }
}

struct MemoryTx<'a> {
    state: RefCell<MemoryState>,
    ctx: &'a OpContext,
    fail_mark_merged: bool,
    assigns_left: Cell<usize>,
}

impl TeamDirectory for MemoryTx<'_> {
    fn create_team(&self, name: &str) -> Result<Team, ServiceError> {
        self.ctx.check()?;
        let mut state = self.state.borrow_mut();
        if state.teams.iter().any(|t| t.name == name) {
            return Err(ServiceError::already_exists(Entity::Team, name));
        }
        state.next_team_id += 1;
        let team = Team {
            id: state.next_team_id,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        state.teams.push(team.clone());
        Ok(team)
    }

    fn get_team_by_name(&self, name: &str) -> Result<Team, ServiceError> {
        self.ctx.check()?;
        self.state
            .borrow()
            .teams
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| ServiceError::not_found(Entity::Team, name))
    }

    fn get_team_name_by_id(&self, team_id: i64) -> Result<String, ServiceError> {
        self.ctx.check()?;
        self.state
            .borrow()
            .teams
            .iter()
            .find(|t| t.id == team_id)
            .map(|t| t.name.clone())
            .ok_or_else(|| ServiceError::not_found(Entity::Team, team_id.to_string()))
    }

    fn upsert_user(&self, user: &UserUpsert) -> Result<String, ServiceError> {
        self.ctx.check()?;
        let mut state = self.state.borrow_mut();
        if !state.teams.iter().any(|t| t.id == user.team_id) {
            return Err(ServiceError::not_found(
                Entity::Team,
                user.team_id.to_string(),
            ));
        }
        match state.users.iter_mut().find(|u| u.id == user.id) {
            Some(existing) => {
                existing.name = user.name.clone();
                existing.team_id = user.team_id;
                existing.is_active = user.is_active;
            }
            None => state.users.push(User {
                id: user.id.clone(),
                name: user.name.clone(),
                team_id: user.team_id,
                is_active: user.is_active,
                created_at: Utc::now(),
            }),
        }
        Ok(user.id.clone())
    }

    fn get_user_by_id(&self, user_id: &str) -> Result<User, ServiceError> {
        self.ctx.check()?;
        self.state
            .borrow()
            .users
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
            .ok_or_else(|| ServiceError::not_found(Entity::User, user_id))
    }

    fn set_user_active(&self, user_id: &str, is_active: bool) -> Result<(), ServiceError> {
        self.ctx.check()?;
        let mut state = self.state.borrow_mut();
        let user = state
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| ServiceError::not_found(Entity::User, user_id))?;
        user.is_active = is_active;
        Ok(())
    }

    fn get_active_user_ids_in_team(&self, team_id: i64) -> Result<Vec<String>, ServiceError> {
        Ok(self
            .list_users_in_team(team_id)?
            .into_iter()
            .filter(|u| u.is_active)
            .map(|u| u.id)
            .collect())
    }

    fn list_users_in_team(&self, team_id: i64) -> Result<Vec<User>, ServiceError> {
        self.ctx.check()?;
        let mut users: Vec<User> = self
            .state
            .borrow()
            .users
            .iter()
            .filter(|u| u.team_id == team_id)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(users)
    }
}

impl PullRequestStore for MemoryTx<'_> {
    fn create_pr(&self, pr: &NewPullRequest) -> Result<PullRequest, ServiceError> {
        self.ctx.check()?;
        let mut state = self.state.borrow_mut();
        if state.prs.iter().any(|p| p.id == pr.id) {
            return Err(ServiceError::already_exists(Entity::PullRequest, &pr.id));
        }
        if !state.users.iter().any(|u| u.id == pr.author_id) {
            return Err(ServiceError::not_found(Entity::User, &pr.author_id));
        }
        let created = PullRequest {
            id: pr.id.clone(),
            title: pr.title.clone(),
            author_id: pr.author_id.clone(),
            status: PrStatus::Open,
            created_at: Utc::now(),
            merged_at: None,
        };
        state.prs.push(created.clone());
        Ok(created)
    }

    fn get_pr_by_id(&self, pr_id: &str) -> Result<PullRequest, ServiceError> {
        self.ctx.check()?;
        self.state
            .borrow()
            .prs
            .iter()
            .find(|p| p.id == pr_id)
            .cloned()
            .ok_or_else(|| ServiceError::not_found(Entity::PullRequest, pr_id))
    }

    fn mark_merged(&self, pr_id: &str) -> Result<(), ServiceError> {
        self.ctx.check()?;
        if self.fail_mark_merged {
            return Err(anyhow!("injected mark_merged failure for {}", pr_id).into());
        }
        let mut state = self.state.borrow_mut();
        let pr = state
            .prs
            .iter_mut()
            .find(|p| p.id == pr_id)
            .ok_or_else(|| ServiceError::not_found(Entity::PullRequest, pr_id))?;
        pr.status = PrStatus::Merged;
        if pr.merged_at.is_none() {
            pr.merged_at = Some(Utc::now());
        }
        Ok(())
    }

    fn list_reviewers(&self, pr_id: &str) -> Result<Vec<String>, ServiceError> {
        self.ctx.check()?;
        Ok(self
            .state
            .borrow()
            .reviewers
            .iter()
            .filter(|(pr, _)| pr == pr_id)
            .map(|(_, user)| user.clone())
            .collect())
    }

    fn assign_reviewer(&self, pr_id: &str, user_id: &str) -> Result<(), ServiceError> {
        self.ctx.check()?;
        match self.assigns_left.get() {
            0 => {
                return Err(anyhow!("injected assign_reviewer failure for {}", pr_id).into());
            }
            usize::MAX => {}
            n => self.assigns_left.set(n - 1),
        }
        let mut state = self.state.borrow_mut();
        if !state.prs.iter().any(|p| p.id == pr_id) {
            return Err(ServiceError::not_found(Entity::PullRequest, pr_id));
        }
        if !state.users.iter().any(|u| u.id == user_id) {
            return Err(ServiceError::not_found(Entity::User, user_id));
        }
        if state
            .reviewers
            .iter()
            .any(|(pr, user)| pr == pr_id && user == user_id)
        {
            return Err(ServiceError::Conflict(format!(
                "reviewer {} is already assigned to pull request {}",
                user_id, pr_id
            )));
        }
        state
            .reviewers
            .push((pr_id.to_string(), user_id.to_string()));
        Ok(())
    }

    fn delete_reviewer(&self, pr_id: &str, user_id: &str) -> Result<(), ServiceError> {
        self.ctx.check()?;
        let mut state = self.state.borrow_mut();
        let before = state.reviewers.len();
        state
            .reviewers
            .retain(|(pr, user)| !(pr == pr_id && user == user_id));
        if state.reviewers.len() == before {
            return Err(ServiceError::NotAssigned {
                pr_id: pr_id.to_string(),
                reviewer_id: user_id.to_string(),
            });
        }
        Ok(())
    }

    fn swap_reviewer(&self, pr_id: &str, old_id: &str, new_id: &str) -> Result<(), ServiceError> {
        self.ctx.check()?;
        let state = self.state.borrow();
        if !state
            .reviewers
            .iter()
            .any(|(pr, user)| pr == pr_id && user == old_id)
        {
            return Err(ServiceError::NotAssigned {
                pr_id: pr_id.to_string(),
                reviewer_id: old_id.to_string(),
            });
        }
        if state
            .reviewers
            .iter()
            .any(|(pr, user)| pr == pr_id && user == new_id)
        {
            return Err(ServiceError::Conflict(format!(
                "reviewer {} is already assigned to pull request {}",
                new_id, pr_id
            )));
        }
        if !state.users.iter().any(|u| u.id == new_id) {
            return Err(ServiceError::not_found(Entity::User, new_id));
        }
        drop(state);

        // Both checks passed, so the two halves cannot fail independently.
        self.delete_reviewer(pr_id, old_id)?;
        self.assign_reviewer(pr_id, new_id)
    }

    fn list_reviews_of_user(&self, user_id: &str) -> Result<Vec<PullRequest>, ServiceError> {
        self.ctx.check()?;
        let state = self.state.borrow();
        Ok(state
            .prs
            .iter()
            .rev()
            .filter(|p| {
                state
                    .reviewers
                    .iter()
                    .any(|(pr, user)| *pr == p.id && user == user_id)
            })
            .cloned()
            .collect())
    }
}

impl StatsReader for MemoryTx<'_> {
    fn assignment_counts(
        &self,
        order: SortOrder,
    ) -> Result<Vec<UserAssignmentStats>, ServiceError> {
        self.ctx.check()?;
        let state = self.state.borrow();
        let mut stats: Vec<UserAssignmentStats> = state
            .users
            .iter()
            .map(|u| UserAssignmentStats {
                user_id: u.id.clone(),
                username: u.name.clone(),
                assignment_count: state.reviewers.iter().filter(|(_, r)| *r == u.id).count()
                    as i64,
            })
            .collect();
        stats.sort_by(|a, b| {
            let by_count = match order {
                SortOrder::Asc => a.assignment_count.cmp(&b.assignment_count),
                SortOrder::Desc => b.assignment_count.cmp(&a.assignment_count),
            };
            by_count.then_with(|| a.username.cmp(&b.username))
        });
        Ok(stats)
    }

    fn pr_counts(&self) -> Result<PrStatistics, ServiceError> {
        self.ctx.check()?;
        let state = self.state.borrow();
        let merged = state
            .prs
            .iter()
            .filter(|p| p.status == PrStatus::Merged)
            .count() as i64;
        let total = state.prs.len() as i64;
        Ok(PrStatistics {
            pr_count: total,
            open_pr_count: total - merged,
            merged_pr_count: merged,
        })
    }
}
