use super::models::{SortOrder, StatsReport};
use super::store::{OpContext, TransactionManager};
use crate::errors::ServiceError;

/// Read-only reporting over assignments and pull requests.
pub struct StatsService<M> {
    store: M,
}

impl<M: TransactionManager> StatsService<M> {
    pub fn new(store: M) -> Self {
        Self { store }
    }

    /// Per-user assignment counts ordered by count (`order`), then username
    /// ascending, together with pull request totals.
    pub async fn statistics(
        &self,
        ctx: &OpContext,
        order: SortOrder,
    ) -> Result<StatsReport, ServiceError> {
        self.store
            .run(ctx, move |uow| {
                Ok(StatsReport {
                    pr: uow.pr_counts()?,
                    users: uow.assignment_counts(order)?,
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::memory::InMemoryStore;
    use crate::assignment::models::{NewPullRequest, PrStatistics, UserUpsert};

    #[tokio::test]
    async fn statistics_reflect_assignments() {
        let store = InMemoryStore::new();
        store
            .run(&OpContext::new(), |uow| {
                let team = uow.create_team("core")?;
                for (id, name) in [("u1", "zed"), ("u2", "amy"), ("u3", "bob")] {
                    uow.upsert_user(&UserUpsert {
                        id: id.into(),
                        name: name.into(),
                        team_id: team.id,
                        is_active: true,
                    })?;
                }
                for id in ["pr-1", "pr-2"] {
                    uow.create_pr(&NewPullRequest {
                        id: id.into(),
                        title: "Some change".into(),
                        author_id: "u1".into(),
                    })?;
                    uow.assign_reviewer(id, "u3")?;
                }
                uow.assign_reviewer("pr-1", "u2")?;
                uow.mark_merged("pr-2")
            })
            .await
            .unwrap();

        let service = StatsService::new(store);
        let desc = service
            .statistics(&OpContext::new(), SortOrder::Desc)
            .await
            .unwrap();
        let names: Vec<_> = desc.users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["bob", "amy", "zed"]);
        assert_eq!(
            desc.pr,
            PrStatistics {
                pr_count: 2,
                open_pr_count: 1,
                merged_pr_count: 1,
            }
        );

        let asc = service
            .statistics(&OpContext::new(), SortOrder::Asc)
            .await
            .unwrap();
        let counts: Vec<_> = asc.users.iter().map(|u| u.assignment_count).collect();
        assert_eq!(counts, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn empty_store_reports_zeroes() {
        let report = StatsService::new(InMemoryStore::new())
            .statistics(&OpContext::new(), SortOrder::default())
            .await
            .unwrap();
        assert!(report.users.is_empty());
        assert_eq!(report.pr, PrStatistics::default());
    }
}
