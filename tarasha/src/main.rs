//! Tarasha CLI: administration entry point for the data store.
//!
//! Every subcommand opens the database selected by `--database-url`, or by
//! the `TARASHA_DB_URL` / `TARASHA_DB_PATH` environment variables, and runs
//! one unit of work against it:
//!
//! - `migrate` / `status`: apply or inspect schema migrations.
//! - `seed`: fill empty settings tables with their defaults.
//! - `copy`: copy every table from one database to another.
//! - `groups`, `settings`: inspect and edit company groups and settings.
//! - `smoke`: run the group-membership scenario and print each stage.

use clap::{Parser, Subcommand};
use tarasha_store::copy::DEFAULT_BATCH_SIZE;
use tarasha_store::membership::DEFAULT_GROUP_TYPE;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

mod commands;

/// Top-level CLI arguments.
#[derive(Parser)]
#[command(name = "tarasha", about = "Administration tools for the Tarasha data store")]
struct Cli {
    /// Database URL (`sqlite:<path>` or `postgres://...`). Defaults to the
    /// environment configuration.
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations and print the schema version.
    Migrate,
    /// Show the backend and the expected and recorded schema versions.
    Status,
    /// Insert default settings into empty settings tables.
    Seed,
    /// Copy every table from one database into another.
    Copy {
        /// Source database URL.
        #[arg(long)]
        from: String,
        /// Target database URL. Migrated before copying.
        #[arg(long)]
        to: String,
        /// Rows per batch upsert.
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        /// Empty the target tables first.
        #[arg(long)]
        truncate: bool,
    },
    /// Manage company groups.
    Groups {
        #[command(subcommand)]
        action: GroupAction,
    },
    /// Read and write admin settings.
    Settings {
        #[command(subcommand)]
        kind: SettingsKind,
    },
    /// Run the group-membership smoke scenario, printing each stage as JSON.
    Smoke {
        /// Commit the scenario's writes instead of rolling them back.
        #[arg(long)]
        commit: bool,
    },
}

#[derive(Subcommand)]
enum GroupAction {
    /// List groups with their member counts.
    List {
        #[arg(long)]
        group_type: Option<String>,
    },
    /// Show the members of a group.
    Show {
        name: String,
        #[arg(long, default_value = DEFAULT_GROUP_TYPE)]
        group_type: String,
    },
    /// Create a group if it does not exist.
    Create {
        name: String,
        #[arg(long, default_value = DEFAULT_GROUP_TYPE)]
        group_type: String,
    },
    /// Add companies, by ticker, to a group.
    Add {
        name: String,
        #[arg(required = true)]
        tickers: Vec<String>,
        #[arg(long, default_value = DEFAULT_GROUP_TYPE)]
        group_type: String,
    },
    /// Remove companies, by ticker, from a group.
    Remove {
        name: String,
        #[arg(required = true)]
        tickers: Vec<String>,
        #[arg(long, default_value = DEFAULT_GROUP_TYPE)]
        group_type: String,
    },
    /// Delete a group and its memberships.
    Delete {
        name: String,
        #[arg(long, default_value = DEFAULT_GROUP_TYPE)]
        group_type: String,
    },
}

#[derive(Subcommand)]
enum SettingsKind {
    /// Risk-free rates by year.
    RiskFreeRate {
        #[command(subcommand)]
        action: RateAction,
    },
}

#[derive(Subcommand)]
enum RateAction {
    Get {
        year: i32,
    },
    Set {
        year: i32,
        usa: f64,
        india: f64,
        china: f64,
        japan: f64,
    },
}

/// Error type for CLI operations.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Store(#[from] tarasha_store::StoreError),

    #[error("group {name:?} ({group_type}) not found")]
    GroupNotFound { name: String, group_type: String },

    #[error("no company with ticker {0:?}")]
    UnknownTicker(String),

    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let url = cli.database_url;

    match cli.command {
        Commands::Migrate => commands::migrate(url).await?,
        Commands::Status => commands::status(url).await?,
        Commands::Seed => commands::seed(url).await?,
        Commands::Copy {
            from,
            to,
            batch_size,
            truncate,
        } => commands::copy(from, to, batch_size, truncate).await?,
        Commands::Groups { action } => commands::groups(url, action).await?,
        Commands::Settings { kind } => match kind {
            SettingsKind::RiskFreeRate { action } => commands::risk_free_rate(url, action).await?,
        },
        Commands::Smoke { commit } => commands::smoke(url, commit).await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_copy() {
        let cli = Cli::parse_from([
            "tarasha",
            "copy",
            "--from",
            "sqlite:app.db",
            "--to",
            "postgres://localhost/tarasha",
            "--truncate",
        ]);
        match cli.command {
            Commands::Copy {
                batch_size,
                truncate,
                ..
            } => {
                assert_eq!(batch_size, DEFAULT_BATCH_SIZE);
                assert!(truncate);
            }
            _ => panic!("expected copy"),
        }
    }

    #[test]
    fn test_parse_group_add_requires_tickers() {
        assert!(Cli::try_parse_from(["tarasha", "groups", "add", "Tech"]).is_err());
        let cli = Cli::try_parse_from(["tarasha", "groups", "add", "Tech", "AAPL", "MSFT"]).unwrap();
        match cli.command {
            Commands::Groups {
                action:
                    GroupAction::Add {
                        tickers,
                        group_type,
                        ..
                    },
            } => {
                assert_eq!(tickers, ["AAPL", "MSFT"]);
                assert_eq!(group_type, DEFAULT_GROUP_TYPE);
            }
            _ => panic!("expected groups add"),
        }
    }
}
