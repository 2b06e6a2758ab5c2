//! Reviewer assignment: teams, pull requests, and the engine that picks
//! reviewers for them.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐  HTTP  ┌───────────────────────────────────────────────────┐
//! │  Client  │ ─────> │  server.rs  (Router, TraceLayer, shutdown)        │
//! └──────────┘        │    └─ api.rs  (handlers, AppState, ApiError)      │
//!                     │         │                                         │
//!                     │         v                                         │
//!                     │  engine.rs     directory.rs     stats.rs          │
//!                     │  (create/merge/ (teams, users)  (report)          │
//!                     │   reassign)                                       │
//!                     │         │ TransactionManager::run(ctx, |uow| ..)  │
//!                     │         v                                         │
//!                     │  store.rs  (capability traits, OpContext)         │
//!                     │     ├─ sqlite.rs  (rusqlite, IMMEDIATE tx)        │
//!                     │     └─ memory.rs  (snapshot/commit fake)          │
//!                     └───────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module      | Responsibility                                            |
//! |-------------|-----------------------------------------------------------|
//! | `models`    | `Team`, `User`, `PullRequest`, `PrStatus`, response views |
//! | `selection` | Random candidate selection behind `RandomSource`          |
//!
//! ## Reassign Flow
//!
//! 1. `POST /pullRequest/reassign` → `api::reassign_reviewer()` builds an
//!    `OpContext` with the request deadline and holds its drop guard.
//! 2. `ReviewerEngine::reassign_reviewer()` runs one unit of work: load the
//!    pull request (rejecting MERGED), load the author's active teammates,
//!    exclude the author and every current reviewer, pick one at random.
//! 3. `PullRequestStore::swap_reviewer()` deletes the old edge and inserts the
//!    new one atomically. A concurrent reassign of the same reviewer finds
//!    the old edge gone and fails with `NotAssigned`.

pub mod api;
pub mod directory;
pub mod engine;
pub mod memory;
pub mod models;
pub mod selection;
pub mod server;
pub mod sqlite;
pub mod stats;
pub mod store;
