//! Bistro CLI
//!
//! Command-line tools for a Bistro journal.
//!
//! # Commands
//!
//! - `inspect` - List databases, versions, stores and record counts
//! - `queue` - List writes waiting in the offline queue
//! - `replay` - Send queued writes to the API
//! - `fetch` - Warm the cache from the API
//! - `compact` - Rewrite the journal as one snapshot per database

mod commands;

use bistro_offline::{DEFAULT_BASE_URL, DEFAULT_DB_NAME};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Bistro offline store tools.
#[derive(Parser)]
#[command(name = "bistro")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the journal file
    #[arg(global = true, short, long)]
    journal: Option<PathBuf>,

    /// Database name
    #[arg(global = true, long, default_value = DEFAULT_DB_NAME)]
    db: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List databases, versions, stores and record counts
    Inspect {
        /// Show index details
        #[arg(short, long)]
        indexes: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List writes waiting in the offline queue
    Queue {
        /// Only show writes for this restaurant
        #[arg(short, long)]
        restaurant: Option<i64>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Send queued writes to the API, oldest first
    Replay {
        /// API base URL
        #[arg(short, long, default_value = DEFAULT_BASE_URL)]
        base_url: String,

        /// Per-request timeout in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,

        /// Stop after this many records
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Warm the cache from the API
    Fetch {
        /// API base URL
        #[arg(short, long, default_value = DEFAULT_BASE_URL)]
        base_url: String,

        /// Also fetch reviews for every restaurant
        #[arg(short, long)]
        reviews: bool,
    },

    /// Rewrite the journal as one snapshot per database
    Compact,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { indexes, format } => {
            let journal = cli.journal.ok_or("Journal path required for inspect")?;
            commands::inspect::run(&journal, indexes, &format).await?;
        }
        Commands::Queue { restaurant, format } => {
            let journal = cli.journal.ok_or("Journal path required for queue")?;
            commands::queue::run(&journal, &cli.db, restaurant, &format).await?;
        }
        Commands::Replay {
            base_url,
            timeout,
            limit,
        } => {
            let journal = cli.journal.ok_or("Journal path required for replay")?;
            commands::replay::run(&journal, &cli.db, &base_url, timeout, limit).await?;
        }
        Commands::Fetch { base_url, reviews } => {
            let journal = cli.journal.ok_or("Journal path required for fetch")?;
            commands::fetch::run(&journal, &cli.db, &base_url, reviews).await?;
        }
        Commands::Compact => {
            let journal = cli.journal.ok_or("Journal path required for compact")?;
            commands::compact::run(&journal).await?;
        }
        Commands::Version => {
            println!("Bistro CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from(["bistro", "queue", "--journal", "q.journal", "-r", "7"]).unwrap();
        assert_eq!(cli.journal, Some(PathBuf::from("q.journal")));
        assert_eq!(cli.db, DEFAULT_DB_NAME);
        assert!(matches!(cli.command, Commands::Queue { restaurant: Some(7), .. }));
    }

    #[test]
    fn compact_takes_the_journal_path() {
        let cli = Cli::try_parse_from(["bistro", "-j", "b.journal", "compact"]).unwrap();
        assert_eq!(cli.journal, Some(PathBuf::from("b.journal")));
        assert!(matches!(cli.command, Commands::Compact));
    }
}
