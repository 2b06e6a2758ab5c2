//! Team and user operations that sit beside the engine.

use tracing::info;

use super::models::{PullRequestShort, TeamMember, TeamView, UserReviews, UserUpsert, UserView};
use super::store::{OpContext, TransactionManager};
use crate::errors::ServiceError;

pub const MAX_TEAM_NAME_LEN: usize = 16;
pub const MAX_USERNAME_LEN: usize = 32;

pub struct TeamService<M> {
    store: M,
}

fn validate_team_name(name: &str) -> Result<(), ServiceError> {
    let len = name.chars().count();
    if len == 0 || len > MAX_TEAM_NAME_LEN {
        return Err(ServiceError::Validation(format!(
            "team_name must be 1..={} characters",
            MAX_TEAM_NAME_LEN
        )));
    }
    Ok(())
}

fn validate_member(member: &TeamMember) -> Result<(), ServiceError> {
    if member.user_id.trim().is_empty() {
        return Err(ServiceError::Validation("user_id is required".into()));
    }
    let len = member.username.chars().count();
    if len == 0 || len > MAX_USERNAME_LEN {
        return Err(ServiceError::Validation(format!(
            "username for {} must be 1..={} characters",
            member.user_id, MAX_USERNAME_LEN
        )));
    }
    Ok(())
}

impl<M: TransactionManager> TeamService<M> {
    pub fn new(store: M) -> Self {
        Self { store }
    }

    /// Create a team and upsert its members into it. Members that already
    /// exist elsewhere are moved into the new team.
    pub async fn add_team(
        &self,
        ctx: &OpContext,
        team_name: &str,
        members: Vec<TeamMember>,
    ) -> Result<TeamView, ServiceError> {
        validate_team_name(team_name)?;
        for member in &members {
            validate_member(member)?;
        }

        let team_name = team_name.to_string();
        let view = self
            .store
            .run(ctx, move |uow| {
                let team = uow.create_team(&team_name)?;
                for member in &members {
                    uow.upsert_user(&UserUpsert {
                        id: member.user_id.clone(),
                        name: member.username.clone(),
                        team_id: team.id,
                        is_active: member.is_active,
                    })?;
                }
                Ok(TeamView {
                    team_name: team.name,
                    members,
                })
            })
            .await?;

        info!(team = %view.team_name, members = view.members.len(), "Added team");
        Ok(view)
    }

    pub async fn get_team(&self, ctx: &OpContext, team_name: &str) -> Result<TeamView, ServiceError> {
        let team_name = team_name.to_string();
        self.store
            .run(ctx, move |uow| {
                let team = uow.get_team_by_name(&team_name)?;
                let members = uow
                    .list_users_in_team(team.id)?
                    .into_iter()
                    .map(TeamMember::from)
                    .collect();
                Ok(TeamView {
                    team_name: team.name,
                    members,
                })
            })
            .await
    }

    pub async fn set_user_active(
        &self,
        ctx: &OpContext,
        user_id: &str,
        is_active: bool,
    ) -> Result<UserView, ServiceError> {
        let user_id = user_id.to_string();
        let view = self
            .store
            .run(ctx, move |uow| {
                uow.set_user_active(&user_id, is_active)?;
                let user = uow.get_user_by_id(&user_id)?;
                let team_name = uow.get_team_name_by_id(user.team_id)?;
                Ok(UserView {
                    user_id: user.id,
                    username: user.name,
                    team_name,
                    is_active: user.is_active,
                })
            })
            .await?;

        info!(user_id = %view.user_id, is_active = view.is_active, "Updated user active flag");
        Ok(view)
    }

    /// Pull requests the user is assigned to review, newest first.
    pub async fn reviews_for_user(
        &self,
        ctx: &OpContext,
        user_id: &str,
    ) -> Result<UserReviews, ServiceError> {
        let user_id = user_id.to_string();
        self.store
            .run(ctx, move |uow| {
                let user = uow.get_user_by_id(&user_id)?;
                let pull_requests = uow
                    .list_reviews_of_user(&user.id)?
                    .into_iter()
                    .map(PullRequestShort::from)
                    .collect();
                Ok(UserReviews {
                    user_id: user.id,
                    pull_requests,
                })
            })
            .await
    }
}
