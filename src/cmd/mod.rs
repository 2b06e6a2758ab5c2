//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `serve`   | `Serve`          |
//! | `init_db` | `InitDb`         |

pub mod init_db;
pub mod serve;

pub use init_db::cmd_init_db;
pub use serve::{ServeArgs, cmd_serve};
