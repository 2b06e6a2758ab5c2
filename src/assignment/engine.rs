//! Reviewer Assignment Engine: create, merge, and reassign.
//!
//! Each operation is one unit of work handed to the injected
//! [`TransactionManager`]. The engine holds no state of its own beyond the
//! store handle and the randomness source.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::models::{NewPullRequest, PrStatus, PullRequestView, ReassignOutcome};
use super::selection::{RandomSource, select_reviewers};
use super::store::{OpContext, TransactionManager};
use crate::errors::ServiceError;

/// Reviewers picked for a freshly created pull request.
pub const MAX_REVIEWERS_ON_CREATE: usize = 2;

pub struct ReviewerEngine<M> {
    store: M,
    random: Arc<dyn RandomSource>,
}

impl<M: TransactionManager> ReviewerEngine<M> {
    pub fn new(store: M, random: Arc<dyn RandomSource>) -> Self {
        Self { store, random }
    }

    /// Insert an OPEN pull request and assign up to two active teammates of
    /// the author. Having no eligible teammate is not an error.
    pub async fn create_pull_request(
        &self,
        ctx: &OpContext,
        pr_id: &str,
        title: &str,
        author_id: &str,
    ) -> Result<PullRequestView, ServiceError> {
        let new_pr = NewPullRequest {
            id: pr_id.to_string(),
            title: title.to_string(),
            author_id: author_id.to_string(),
        };
        let random = Arc::clone(&self.random);

        let view = self
            .store
            .run(ctx, move |uow| {
                let pr = uow.create_pr(&new_pr)?;
                let author = uow.get_user_by_id(&pr.author_id)?;
                let pool = uow.get_active_user_ids_in_team(author.team_id)?;

                let picked = select_reviewers(
                    random.as_ref(),
                    &pool,
                    MAX_REVIEWERS_ON_CREATE,
                    std::slice::from_ref(&author.id),
                );
                for reviewer_id in &picked {
                    uow.assign_reviewer(&pr.id, reviewer_id)?;
                }

                Ok(PullRequestView::new(pr, picked))
            })
            .await?;

        info!(
            pr_id = %view.id,
            author_id = %view.author_id,
            reviewers = ?view.assigned_reviewers,
            "Created pull request"
        );
        Ok(view)
    }

    /// Mark a pull request MERGED. Merging a MERGED pull request returns its
    /// current state unchanged.
    ///
    /// A failing `mark_merged` does not abort the unit of work: the failure is
    /// logged and whatever state is persisted gets returned.
    pub async fn merge_pull_request(
        &self,
        ctx: &OpContext,
        pr_id: &str,
    ) -> Result<PullRequestView, ServiceError> {
        let pr_id = pr_id.to_string();

        let view = self
            .store
            .run(ctx, move |uow| {
                let pr = uow.get_pr_by_id(&pr_id)?;
                if pr.status == PrStatus::Open {
                    if let Err(err) = uow.mark_merged(&pr_id) {
                        warn!(pr_id = %pr_id, error = %err, "Failed to mark pull request merged");
                    }
                } else {
                    debug!(pr_id = %pr_id, "Pull request already merged");
                }

                let pr = uow.get_pr_by_id(&pr_id)?;
                let reviewers = uow.list_reviewers(&pr_id)?;
                Ok(PullRequestView::new(pr, reviewers))
            })
            .await?;

        info!(pr_id = %view.id, status = view.status.as_str(), "Merged pull request");
        Ok(view)
    }

    /// Replace `old_reviewer_id` with a random active teammate of the author
    /// who is neither the author nor already assigned.
    pub async fn reassign_reviewer(
        &self,
        ctx: &OpContext,
        pr_id: &str,
        old_reviewer_id: &str,
    ) -> Result<ReassignOutcome, ServiceError> {
        let pr_id = pr_id.to_string();
        let old_reviewer_id = old_reviewer_id.to_string();
        let random = Arc::clone(&self.random);

        let outcome = self
            .store
            .run(ctx, move |uow| {
                let pr = uow.get_pr_by_id(&pr_id)?;
                if pr.status == PrStatus::Merged {
                    return Err(ServiceError::PrMerged { pr_id });
                }

                let author = uow.get_user_by_id(&pr.author_id)?;
                let pool = uow.get_active_user_ids_in_team(author.team_id)?;
                let assigned = uow.list_reviewers(&pr_id)?;

                let mut excluded = assigned;
                excluded.push(author.id);

                // The eligible set is computed explicitly: assigned reviewers
                // that were deactivated are not part of `pool`.
                let excluded_set: HashSet<&str> = excluded.iter().map(String::as_str).collect();
                if pool.iter().all(|id| excluded_set.contains(id.as_str())) {
                    return Err(ServiceError::NoCandidate { pr_id });
                }

                let replacement = select_reviewers(random.as_ref(), &pool, 1, &excluded)
                    .into_iter()
                    .next()
                    .ok_or_else(|| ServiceError::NoCandidate {
                        pr_id: pr_id.clone(),
                    })?;

                uow.swap_reviewer(&pr_id, &old_reviewer_id, &replacement)?;

                let pr = uow.get_pr_by_id(&pr_id)?;
                let reviewers = uow.list_reviewers(&pr_id)?;
                Ok(ReassignOutcome {
                    pr: PullRequestView::new(pr, reviewers),
                    replaced_by: replacement,
                })
            })
            .await?;

        info!(
            pr_id = %outcome.pr.id,
            replaced_by = %outcome.replaced_by,
            "Reassigned reviewer"
        );
        Ok(outcome)
    }
}
