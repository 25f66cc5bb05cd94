//! # Shelf Sync CLI (`shelf`)
//!
//! ## Usage
//!
//! ```bash
//! shelf --config ./config/shelf.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `shelf init` | Create the SQLite catalogue |
//! | `shelf import <file>` | Add books from a JSON file |
//! | `shelf fields` | List field policies |
//! | `shelf refresh` | Refresh books from the lookup service |
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `shelf_sync=warn`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shelf_sync::models::Field;
use shelf_sync::progress::ProgressMode;
use shelf_sync::refresh::RefreshOptions;
use shelf_sync::{config, fields, import, migrate, refresh};

/// Shelf Sync: refresh a local book catalogue from a lookup service.
#[derive(Parser)]
#[command(name = "shelf", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/shelf.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run more than once.
    Init,

    /// Add books from a JSON array file.
    Import { path: PathBuf },

    /// List every refreshable field with its configured mode.
    Fields,

    /// Look up and merge details for every book.
    Refresh {
        /// Only refresh these fields (comma separated).
        #[arg(long, value_delimiter = ',')]
        fields: Option<Vec<Field>>,

        /// Only visit these book ids.
        #[arg(long, value_delimiter = ',')]
        only: Vec<i64>,

        /// Stop after this many books.
        #[arg(long)]
        limit: Option<usize>,

        /// Select fields and report, without lookups or writes.
        #[arg(long)]
        dry_run: bool,

        /// Progress output: off, human, json. Defaults to human on a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "shelf_sync=warn".into()),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { path } => {
            import::run_import(&cfg, &path).await?;
        }
        Commands::Fields => {
            fields::list_fields(&cfg)?;
        }
        Commands::Refresh {
            fields,
            only,
            limit,
            dry_run,
            progress,
        } => {
            let options = RefreshOptions {
                only,
                limit,
                dry_run,
            };
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            refresh::run_refresh(&cfg, fields, options, progress).await?;
        }
    }

    Ok(())
}
