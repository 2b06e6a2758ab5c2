use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "reviewer-assign")]
#[command(version, about = "Pull-request reviewer assignment service")]
pub struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP service
    Serve {
        /// Path to a TOML config file (defaults to $REVIEWER_ASSIGN_CONFIG)
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        port: Option<u16>,

        #[arg(long)]
        host: Option<String>,

        /// Path to the SQLite database
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable permissive CORS
        #[arg(long)]
        dev: bool,
    },
    /// Create the database and run migrations, then exit
    InitDb {
        /// Path to the SQLite database
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            port,
            host,
            db_path,
            dev,
        } => {
            cmd::cmd_serve(cmd::ServeArgs {
                config,
                port,
                host,
                db_path,
                dev,
                verbose: cli.verbose,
            })
            .await
        }
        Commands::InitDb { db_path } => cmd::cmd_init_db(db_path, cli.verbose),
    }
}
