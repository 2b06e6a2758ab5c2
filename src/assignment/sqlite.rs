use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::ffi::{
    SQLITE_CONSTRAINT_FOREIGNKEY, SQLITE_CONSTRAINT_PRIMARYKEY, SQLITE_CONSTRAINT_UNIQUE,
};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior, params};

use super::models::*;
use super::store::{
    OpContext, PullRequestStore, StatsReader, TeamDirectory, TransactionManager, UnitOfWork,
};
use crate::errors::{Entity, ServiceError};

/// SQLite-backed store and transactional boundary.
///
/// A single connection sits behind a mutex and every unit of work runs on
/// tokio's blocking pool inside an `IMMEDIATE` transaction, so units of work
/// are fully serialized.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        Self::from_connection(conn)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        run_migrations(&conn).context("Failed to run migrations")?;
        Ok(Self {
            inner: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_sync<T, F>(&self, ctx: &OpContext, work: F) -> Result<T, ServiceError>
    where
        F: FnOnce(&dyn UnitOfWork) -> Result<T, ServiceError>,
    {
        ctx.check()?;
        let mut conn = self
            .inner
            .lock()
            .map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin transaction")?;

        // Dropping `tx` on any early return rolls the transaction back.
        let out = work(&SqliteTx { conn: &*tx, ctx })?;
        ctx.check()?;

        tx.commit().context("Failed to commit transaction")?;
        Ok(out)
    }
}

#[async_trait]
impl TransactionManager for SqliteStore {
    async fn run<T, F>(&self, ctx: &OpContext, work: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn UnitOfWork) -> Result<T, ServiceError> + Send + 'static,
    {
        let store = self.clone();
        let ctx = ctx.clone();
        tokio::task::spawn_blocking(move || store.run_sync(&ctx, work))
            .await
            .context("DB task panicked")?
    }
}

fn run_migrations(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS teams (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            team_id INTEGER NOT NULL REFERENCES teams(id),
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pull_requests (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            author_id TEXT NOT NULL REFERENCES users(id),
            status TEXT NOT NULL DEFAULT 'OPEN',
            created_at TEXT NOT NULL,
            merged_at TEXT
        );

        CREATE TABLE IF NOT EXISTS pr_reviewers (
            pull_request_id TEXT NOT NULL REFERENCES pull_requests(id),
            user_id TEXT NOT NULL REFERENCES users(id),
            assigned_at TEXT NOT NULL,
            PRIMARY KEY (pull_request_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_users_team_active ON users(team_id, is_active);
        CREATE INDEX IF NOT EXISTS idx_pr_reviewers_user ON pr_reviewers(user_id);
        CREATE INDEX IF NOT EXISTS idx_pull_requests_status ON pull_requests(status);
        ",
    )
    .context("Failed to create tables")?;
    Ok(())
}

// ── Error classification ──────────────────────────────────────────────

fn constraint_code(err: &rusqlite::Error) -> Option<i32> {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            Some(e.extended_code)
        }
        _ => None,
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        constraint_code(err),
        Some(SQLITE_CONSTRAINT_PRIMARYKEY | SQLITE_CONSTRAINT_UNIQUE)
    )
}

fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    constraint_code(err) == Some(SQLITE_CONSTRAINT_FOREIGNKEY)
}

fn internal(err: rusqlite::Error, what: &'static str) -> ServiceError {
    ServiceError::Internal(anyhow::Error::new(err).context(what))
}

// ── Row mapping ───────────────────────────────────────────────────────

const USER_COLUMNS: &str = "id, name, team_id, is_active, created_at";
const PR_COLUMNS: &str = "id, title, author_id, status, created_at, merged_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        team_id: row.get(2)?,
        is_active: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Raw pull request row; `status` is parsed after the query.
struct PullRequestRow {
    id: String,
    title: String,
    author_id: String,
    status: String,
    created_at: DateTime<Utc>,
    merged_at: Option<DateTime<Utc>>,
}

impl PullRequestRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            author_id: row.get(2)?,
            status: row.get(3)?,
            created_at: row.get(4)?,
            merged_at: row.get(5)?,
        })
    }

    fn into_pull_request(self) -> anyhow::Result<PullRequest> {
        let status = PrStatus::from_str(&self.status).map_err(|e| anyhow!(e))?;
        Ok(PullRequest {
            id: self.id,
            title: self.title,
            author_id: self.author_id,
            status,
            created_at: self.created_at,
            merged_at: self.merged_at,
        })
    }
}

// ── Unit of work ──────────────────────────────────────────────────────

struct SqliteTx<'a> {
    conn: &'a Connection,
    ctx: &'a OpContext,
}

impl SqliteTx<'_> {
    fn swap_within_savepoint(
        &self,
        pr_id: &str,
        old_id: &str,
        new_id: &str,
    ) -> Result<(), ServiceError> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM pr_reviewers WHERE pull_request_id = ?1 AND user_id = ?2",
                params![pr_id, old_id],
            )
            .context("Failed to delete old reviewer")?;
        if removed == 0 {
            return Err(ServiceError::NotAssigned {
                pr_id: pr_id.to_string(),
                reviewer_id: old_id.to_string(),
            });
        }

        match self.conn.execute(
            "INSERT INTO pr_reviewers (pull_request_id, user_id, assigned_at) VALUES (?1, ?2, ?3)",
            params![pr_id, new_id, Utc::now()],
        ) {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(ServiceError::Conflict(format!(
                "reviewer {} is already assigned to pull request {}",
                new_id, pr_id
            ))),
            Err(e) if is_foreign_key_violation(&e) => {
                Err(ServiceError::not_found(Entity::User, new_id))
            }
            Err(e) => Err(internal(e, "Failed to insert replacement reviewer")),
        }
    }
}

impl TeamDirectory for SqliteTx<'_> {
    fn create_team(&self, name: &str) -> Result<Team, ServiceError> {
        self.ctx.check()?;
        let created_at = Utc::now();
        match self.conn.execute(
            "INSERT INTO teams (name, created_at) VALUES (?1, ?2)",
            params![name, created_at],
        ) {
            Ok(_) => Ok(Team {
                id: self.conn.last_insert_rowid(),
                name: name.to_string(),
                created_at,
            }),
            Err(e) if is_unique_violation(&e) => {
                Err(ServiceError::already_exists(Entity::Team, name))
            }
            Err(e) => Err(internal(e, "Failed to insert team")),
        }
    }

    fn get_team_by_name(&self, name: &str) -> Result<Team, ServiceError> {
        self.ctx.check()?;
        self.conn
            .query_row(
                "SELECT id, name, created_at FROM teams WHERE name = ?1",
                params![name],
                |row| {
                    Ok(Team {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to query team")?
            .ok_or_else(|| ServiceError::not_found(Entity::Team, name))
    }

    fn get_team_name_by_id(&self, team_id: i64) -> Result<String, ServiceError> {
        self.ctx.check()?;
        self.conn
            .query_row(
                "SELECT name FROM teams WHERE id = ?1",
                params![team_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query team name")?
            .ok_or_else(|| ServiceError::not_found(Entity::Team, team_id.to_string()))
    }

    fn upsert_user(&self, user: &UserUpsert) -> Result<String, ServiceError> {
        self.ctx.check()?;
        match self.conn.execute(
            "INSERT INTO users (id, name, team_id, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                team_id = excluded.team_id,
                is_active = excluded.is_active",
            params![user.id, user.name, user.team_id, user.is_active, Utc::now()],
        ) {
            Ok(_) => Ok(user.id.clone()),
            Err(e) if is_foreign_key_violation(&e) => Err(ServiceError::not_found(
                Entity::Team,
                user.team_id.to_string(),
            )),
            Err(e) => Err(internal(e, "Failed to upsert user")),
        }
    }

    fn get_user_by_id(&self, user_id: &str) -> Result<User, ServiceError> {
        self.ctx.check()?;
        self.conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                params![user_id],
                user_from_row,
            )
            .optional()
            .context("Failed to query user")?
            .ok_or_else(|| ServiceError::not_found(Entity::User, user_id))
    }

    fn set_user_active(&self, user_id: &str, is_active: bool) -> Result<(), ServiceError> {
        self.ctx.check()?;
        let changed = self
            .conn
            .execute(
                "UPDATE users SET is_active = ?1 WHERE id = ?2",
                params![is_active, user_id],
            )
            .context("Failed to update user active flag")?;
        if changed == 0 {
            return Err(ServiceError::not_found(Entity::User, user_id));
        }
        Ok(())
    }

    fn get_active_user_ids_in_team(&self, team_id: i64) -> Result<Vec<String>, ServiceError> {
        self.ctx.check()?;
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM users WHERE team_id = ?1 AND is_active = 1 ORDER BY id")
            .context("Failed to prepare active users query")?;
        let ids = stmt
            .query_map(params![team_id], |row| row.get(0))
            .context("Failed to query active users")?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("Failed to read active user row")?;
        Ok(ids)
    }

    fn list_users_in_team(&self, team_id: i64) -> Result<Vec<User>, ServiceError> {
        self.ctx.check()?;
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM users WHERE team_id = ?1 ORDER BY id",
                USER_COLUMNS
            ))
            .context("Failed to prepare team members query")?;
        let users = stmt
            .query_map(params![team_id], user_from_row)
            .context("Failed to query team members")?
            .collect::<rusqlite::Result<Vec<User>>>()
            .context("Failed to read team member row")?;
        Ok(users)
    }
}

impl PullRequestStore for SqliteTx<'_> {
    fn create_pr(&self, pr: &NewPullRequest) -> Result<PullRequest, ServiceError> {
        self.ctx.check()?;
        let created_at = Utc::now();
        match self.conn.execute(
            "INSERT INTO pull_requests (id, title, author_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                pr.id,
                pr.title,
                pr.author_id,
                PrStatus::Open.as_str(),
                created_at
            ],
        ) {
            Ok(_) => Ok(PullRequest {
                id: pr.id.clone(),
                title: pr.title.clone(),
                author_id: pr.author_id.clone(),
                status: PrStatus::Open,
                created_at,
                merged_at: None,
            }),
            Err(e) if is_unique_violation(&e) => {
                Err(ServiceError::already_exists(Entity::PullRequest, &pr.id))
            }
            Err(e) if is_foreign_key_violation(&e) => {
                Err(ServiceError::not_found(Entity::User, &pr.author_id))
            }
            Err(e) => Err(internal(e, "Failed to insert pull request")),
        }
    }

    fn get_pr_by_id(&self, pr_id: &str) -> Result<PullRequest, ServiceError> {
        self.ctx.check()?;
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM pull_requests WHERE id = ?1", PR_COLUMNS),
                params![pr_id],
                PullRequestRow::from_row,
            )
            .optional()
            .context("Failed to query pull request")?;
        match row {
            Some(row) => Ok(row.into_pull_request()?),
            None => Err(ServiceError::not_found(Entity::PullRequest, pr_id)),
        }
    }

    fn mark_merged(&self, pr_id: &str) -> Result<(), ServiceError> {
        self.ctx.check()?;
        let changed = self
            .conn
            .execute(
                "UPDATE pull_requests
                 SET status = ?1, merged_at = COALESCE(merged_at, ?2)
                 WHERE id = ?3",
                params![PrStatus::Merged.as_str(), Utc::now(), pr_id],
            )
            .context("Failed to mark pull request merged")?;
        if changed == 0 {
            return Err(ServiceError::not_found(Entity::PullRequest, pr_id));
        }
        Ok(())
    }

    fn list_reviewers(&self, pr_id: &str) -> Result<Vec<String>, ServiceError> {
        self.ctx.check()?;
        let mut stmt = self
            .conn
            .prepare("SELECT user_id FROM pr_reviewers WHERE pull_request_id = ?1 ORDER BY rowid")
            .context("Failed to prepare list_reviewers")?;
        let reviewers = stmt
            .query_map(params![pr_id], |row| row.get(0))
            .context("Failed to query reviewers")?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("Failed to read reviewer row")?;
        Ok(reviewers)
    }

    fn assign_reviewer(&self, pr_id: &str, user_id: &str) -> Result<(), ServiceError> {
        self.ctx.check()?;
        match self.conn.execute(
            "INSERT INTO pr_reviewers (pull_request_id, user_id, assigned_at) VALUES (?1, ?2, ?3)",
            params![pr_id, user_id, Utc::now()],
        ) {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(ServiceError::Conflict(format!(
                "reviewer {} is already assigned to pull request {}",
                user_id, pr_id
            ))),
            Err(e) if is_foreign_key_violation(&e) => {
                // Either side of the edge may be missing; report the pull request first.
                self.get_pr_by_id(pr_id)?;
                Err(ServiceError::not_found(Entity::User, user_id))
            }
            Err(e) => Err(internal(e, "Failed to assign reviewer")),
        }
    }

    fn delete_reviewer(&self, pr_id: &str, user_id: &str) -> Result<(), ServiceError> {
        self.ctx.check()?;
        let removed = self
            .conn
            .execute(
                "DELETE FROM pr_reviewers WHERE pull_request_id = ?1 AND user_id = ?2",
                params![pr_id, user_id],
            )
            .context("Failed to delete reviewer")?;
        if removed == 0 {
            return Err(ServiceError::NotAssigned {
                pr_id: pr_id.to_string(),
                reviewer_id: user_id.to_string(),
            });
        }
        Ok(())
    }

    fn swap_reviewer(&self, pr_id: &str, old_id: &str, new_id: &str) -> Result<(), ServiceError> {
        self.ctx.check()?;
        self.conn
            .execute_batch("SAVEPOINT swap_reviewer")
            .context("Failed to open swap savepoint")?;
        match self.swap_within_savepoint(pr_id, old_id, new_id) {
            Ok(()) => {
                self.conn
                    .execute_batch("RELEASE swap_reviewer")
                    .context("Failed to release swap savepoint")?;
                Ok(())
            }
            Err(err) => {
                self.conn
                    .execute_batch("ROLLBACK TO swap_reviewer; RELEASE swap_reviewer")
                    .context("Failed to roll back swap savepoint")?;
                Err(err)
            }
        }
    }

    fn list_reviews_of_user(&self, user_id: &str) -> Result<Vec<PullRequest>, ServiceError> {
        self.ctx.check()?;
        let mut stmt = self
            .conn
            .prepare(
                "SELECT p.id, p.title, p.author_id, p.status, p.created_at, p.merged_at
                 FROM pull_requests p
                 JOIN pr_reviewers r ON r.pull_request_id = p.id
                 WHERE r.user_id = ?1
                 ORDER BY p.created_at DESC, p.rowid DESC",
            )
            .context("Failed to prepare list_reviews_of_user")?;
        let rows = stmt
            .query_map(params![user_id], PullRequestRow::from_row)
            .context("Failed to query user reviews")?;
        let mut prs = Vec::new();
        for row in rows {
            let r = row.context("Failed to read pull request row")?;
            prs.push(r.into_pull_request()?);
        }
        Ok(prs)
    }
}

impl StatsReader for SqliteTx<'_> {
    fn assignment_counts(
        &self,
        order: SortOrder,
    ) -> Result<Vec<UserAssignmentStats>, ServiceError> {
        self.ctx.check()?;
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT u.id, u.name, COUNT(r.pull_request_id) AS assignment_count
                 FROM users u
                 LEFT JOIN pr_reviewers r ON r.user_id = u.id
                 GROUP BY u.id, u.name
                 ORDER BY assignment_count {}, u.name ASC",
                order.as_sql()
            ))
            .context("Failed to prepare assignment stats")?;
        let stats = stmt
            .query_map([], |row| {
                Ok(UserAssignmentStats {
                    user_id: row.get(0)?,
                    username: row.get(1)?,
                    assignment_count: row.get(2)?,
                })
            })
            .context("Failed to query assignment stats")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read assignment stats row")?;
        Ok(stats)
    }

    fn pr_counts(&self) -> Result<PrStatistics, ServiceError> {
        self.ctx.check()?;
        let stats = self
            .conn
            .query_row(
                "SELECT
                    COUNT(*),
                    COUNT(CASE WHEN status = 'OPEN' THEN 1 END),
                    COUNT(CASE WHEN status = 'MERGED' THEN 1 END)
                 FROM pull_requests",
                [],
                |row| {
                    Ok(PrStatistics {
                        pr_count: row.get(0)?,
                        open_pr_count: row.get(1)?,
                        merged_pr_count: row.get(2)?,
                    })
                },
            )
            .context("Failed to query pull request stats")?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, team_id: i64, is_active: bool) -> UserUpsert {
        UserUpsert {
            id: id.to_string(),
            name: format!("name-{}", id),
            team_id,
            is_active,
        }
    }

    fn new_pr(id: &str, author: &str) -> NewPullRequest {
        NewPullRequest {
            id: id.to_string(),
            title: format!("Change {}", id),
            author_id: author.to_string(),
        }
    }

    /// Team "backend" with u1..u4 active and a PR pr-1 by u1 reviewed by u2, u3.
    fn seeded_store() -> anyhow::Result<SqliteStore> {
        let store = SqliteStore::open_in_memory()?;
        store.run_sync(&OpContext::new(), |uow| {
            let team = uow.create_team("backend")?;
            for id in ["u1", "u2", "u3", "u4"] {
                uow.upsert_user(&member(id, team.id, true))?;
            }
            uow.create_pr(&new_pr("pr-1", "u1"))?;
            uow.assign_reviewer("pr-1", "u2")?;
            uow.assign_reviewer("pr-1", "u3")?;
            Ok(())
        })?;
        Ok(store)
    }

    fn reviewers(store: &SqliteStore, pr_id: &'static str) -> Vec<String> {
        store
            .run_sync(&OpContext::new(), move |uow| uow.list_reviewers(pr_id))
            .unwrap()
    }

    #[test]
    fn test_migrations_create_tables() -> anyhow::Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let conn = store.inner.lock().unwrap();
        let table_count: i32 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table'
             AND name IN ('teams', 'users', 'pull_requests', 'pr_reviewers')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 4);
        Ok(())
    }

    #[test]
    fn test_duplicate_team_name_is_already_exists() -> anyhow::Result<()> {
        let store = SqliteStore::open_in_memory()?;
        store.run_sync(&OpContext::new(), |uow| uow.create_team("backend"))?;
        let err = store
            .run_sync(&OpContext::new(), |uow| uow.create_team("backend"))
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::AlreadyExists {
                entity: Entity::Team,
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn test_upsert_user_updates_in_place() -> anyhow::Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let user = store.run_sync(&OpContext::new(), |uow| {
            let a = uow.create_team("a")?;
            let b = uow.create_team("b")?;
            uow.upsert_user(&member("u1", a.id, true))?;
            uow.upsert_user(&UserUpsert {
                id: "u1".into(),
                name: "Renamed".into(),
                team_id: b.id,
                is_active: false,
            })?;
            uow.get_user_by_id("u1")
        })?;
        assert_eq!(user.name, "Renamed");
        assert!(!user.is_active);

        let team_name = store.run_sync(&OpContext::new(), move |uow| {
            uow.get_team_name_by_id(user.team_id)
        })?;
        assert_eq!(team_name, "b");
        Ok(())
    }

    #[test]
    fn test_upsert_into_missing_team_is_not_found() -> anyhow::Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let err = store
            .run_sync(&OpContext::new(), |uow| uow.upsert_user(&member("u1", 77, true)))
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::NotFound {
                entity: Entity::Team,
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn test_active_user_ids_skip_inactive_members() -> anyhow::Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let ids = store.run_sync(&OpContext::new(), |uow| {
            let team = uow.create_team("t")?;
            uow.upsert_user(&member("u1", team.id, true))?;
            uow.upsert_user(&member("u2", team.id, false))?;
            uow.upsert_user(&member("u3", team.id, true))?;
            uow.get_active_user_ids_in_team(team.id)
        })?;
        assert_eq!(ids, vec!["u1".to_string(), "u3".to_string()]);
        Ok(())
    }

    #[test]
    fn test_create_pr_classifies_constraint_failures() -> anyhow::Result<()> {
        let store = seeded_store()?;

        let dup = store
            .run_sync(&OpContext::new(), |uow| uow.create_pr(&new_pr("pr-1", "u2")))
            .unwrap_err();
        assert!(matches!(
            dup,
            ServiceError::AlreadyExists {
                entity: Entity::PullRequest,
                ..
            }
        ));

        let orphan = store
            .run_sync(&OpContext::new(), |uow| uow.create_pr(&new_pr("pr-2", "ghost")))
            .unwrap_err();
        match orphan {
            ServiceError::NotFound { entity, id } => {
                assert_eq!(entity, Entity::User);
                assert_eq!(id, "ghost");
            }
            other => panic!("Expected NotFound, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_assign_same_reviewer_twice_conflicts() -> anyhow::Result<()> {
        let store = seeded_store()?;
        let err = store
            .run_sync(&OpContext::new(), |uow| uow.assign_reviewer("pr-1", "u2"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
        Ok(())
    }

    #[test]
    fn test_swap_reviewer_replaces_edge() -> anyhow::Result<()> {
        let store = seeded_store()?;
        store.run_sync(&OpContext::new(), |uow| uow.swap_reviewer("pr-1", "u2", "u4"))?;
        assert_eq!(reviewers(&store, "pr-1"), vec!["u3".to_string(), "u4".to_string()]);
        Ok(())
    }

    #[test]
    fn test_swap_unassigned_old_reviewer_is_not_assigned() -> anyhow::Result<()> {
        let store = seeded_store()?;
        let err = store
            .run_sync(&OpContext::new(), |uow| uow.swap_reviewer("pr-1", "u4", "u1"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotAssigned { .. }));
        assert_eq!(reviewers(&store, "pr-1"), vec!["u2".to_string(), "u3".to_string()]);
        Ok(())
    }

    #[test]
    fn test_swap_to_existing_reviewer_restores_old_edge() -> anyhow::Result<()> {
        let store = seeded_store()?;
        // The caller swallows the conflict and commits; the savepoint must
        // have put u2 back.
        let outcome = store.run_sync(&OpContext::new(), |uow| {
            let swap = uow.swap_reviewer("pr-1", "u2", "u3");
            Ok((swap.is_err(), uow.list_reviewers("pr-1")?))
        })?;
        assert!(outcome.0);
        assert_eq!(outcome.1, vec!["u2".to_string(), "u3".to_string()]);
        Ok(())
    }

    #[test]
    fn test_delete_reviewer() -> anyhow::Result<()> {
        let store = seeded_store()?;
        store.run_sync(&OpContext::new(), |uow| uow.delete_reviewer("pr-1", "u2"))?;
        assert_eq!(reviewers(&store, "pr-1"), vec!["u3".to_string()]);

        let err = store
            .run_sync(&OpContext::new(), |uow| uow.delete_reviewer("pr-1", "u2"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotAssigned { .. }));
        Ok(())
    }

    #[test]
    fn test_mark_merged_keeps_first_timestamp() -> anyhow::Result<()> {
        let store = seeded_store()?;
        let first = store.run_sync(&OpContext::new(), |uow| {
            uow.mark_merged("pr-1")?;
            uow.get_pr_by_id("pr-1")
        })?;
        assert_eq!(first.status, PrStatus::Merged);
        assert!(first.merged_at.is_some());

        let second = store.run_sync(&OpContext::new(), |uow| {
            uow.mark_merged("pr-1")?;
            uow.get_pr_by_id("pr-1")
        })?;
        assert_eq!(second.merged_at, first.merged_at);

        let err = store
            .run_sync(&OpContext::new(), |uow| uow.mark_merged("nope"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
        Ok(())
    }

    #[test]
    fn test_failed_unit_of_work_rolls_back() -> anyhow::Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let err = store
            .run_sync(&OpContext::new(), |uow| {
                uow.create_team("doomed")?;
                Err::<(), _>(ServiceError::Conflict("boom".into()))
            })
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let lookup = store
            .run_sync(&OpContext::new(), |uow| uow.get_team_by_name("doomed"))
            .unwrap_err();
        assert!(matches!(lookup, ServiceError::NotFound { .. }));
        Ok(())
    }

    #[test]
    fn test_cancellation_mid_work_rolls_back() -> anyhow::Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let ctx = OpContext::new();
        let trigger = ctx.clone();
        let err = store
            .run_sync(&ctx, move |uow| {
                uow.create_team("half-done")?;
                trigger.cancel();
                uow.create_team("never")?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, ServiceError::Cancelled));

        let lookup = store
            .run_sync(&OpContext::new(), |uow| uow.get_team_by_name("half-done"))
            .unwrap_err();
        assert!(matches!(lookup, ServiceError::NotFound { .. }));
        Ok(())
    }

    #[test]
    fn test_reviews_of_user_and_stats() -> anyhow::Result<()> {
        let store = seeded_store()?;
        let (reviews, counts, totals) = store.run_sync(&OpContext::new(), |uow| {
            uow.create_pr(&new_pr("pr-2", "u4"))?;
            uow.assign_reviewer("pr-2", "u2")?;
            uow.mark_merged("pr-2")?;
            Ok((
                uow.list_reviews_of_user("u2")?,
                uow.assignment_counts(SortOrder::Desc)?,
                uow.pr_counts()?,
            ))
        })?;

        let ids: Vec<_> = reviews.iter().map(|pr| pr.id.as_str()).collect();
        assert_eq!(ids, vec!["pr-2", "pr-1"]);

        assert_eq!(counts[0].user_id, "u2");
        assert_eq!(counts[0].assignment_count, 2);
        assert_eq!(counts.last().map(|s| s.assignment_count), Some(0));

        assert_eq!(
            totals,
            PrStatistics {
                pr_count: 2,
                open_pr_count: 1,
                merged_pr_count: 1,
            }
        );
        Ok(())
    }

    #[test]
    fn test_data_survives_reopen() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("reviewers.db");
        {
            let store = SqliteStore::open(&path)?;
            store.run_sync(&OpContext::new(), |uow| uow.create_team("persisted"))?;
        }
        let store = SqliteStore::open(&path)?;
        let team = store.run_sync(&OpContext::new(), |uow| uow.get_team_by_name("persisted"))?;
        assert_eq!(team.name, "persisted");
        Ok(())
    }

    #[tokio::test]
    async fn test_async_run_commits() -> anyhow::Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let team = store
            .run(&OpContext::new(), |uow| uow.create_team("async"))
            .await?;
        assert!(team.id > 0);
        Ok(())
    }
}
