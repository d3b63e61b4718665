//! tablesync CLI
//!
//! Command-line tools for inspecting and maintaining a tablesync replica.
//!
//! # Commands
//!
//! - `inspect` - Display replica metadata and table summaries
//! - `dump-outbox` - List operations waiting for acknowledgement
//! - `settings` - Show or change the persisted sync settings
//! - `sync` - Run one sync cycle (requires the `http` feature)
//! - `compact` - Rewrite the journal as a snapshot
//! - `reset` - Drop local tables, cursor and pending operations

mod commands;

use clap::{Parser, Subcommand};
use commands::settings::SettingsUpdate;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// tablesync replica tools.
#[derive(Parser)]
#[command(name = "tablesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    store: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display replica metadata and table summaries
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List operations waiting for acknowledgement
    DumpOutbox {
        /// Maximum number of operations to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show or change the persisted sync settings
    Settings {
        /// Server base URL; an empty value clears it
        #[arg(long)]
        server_url: Option<String>,

        /// Enable or disable automatic sync
        #[arg(long)]
        auto_sync: Option<bool>,
    },

    /// Run one sync cycle
    Sync {
        /// Server base URL for this run
        #[arg(long)]
        server_url: Option<String>,
    },

    /// Rewrite the journal as a snapshot
    Compact,

    /// Drop local tables, cursor and pending operations
    Reset {
        /// Discard operations that have not been synced
        #[arg(short, long)]
        yes: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let path = cli.store.ok_or("store path required (--store <dir>)")?;
    match cli.command {
        Commands::Inspect { format } => commands::inspect::run(&path, &format)?,
        Commands::DumpOutbox { limit, format } => {
            commands::dump_outbox::run(&path, limit, &format)?
        }
        Commands::Settings {
            server_url,
            auto_sync,
        } => commands::settings::run(
            &path,
            SettingsUpdate {
                server_url,
                auto_sync,
            },
        )?,
        Commands::Sync { server_url } => commands::sync::run(&path, server_url)?,
        Commands::Compact => commands::compact::run(&path)?,
        Commands::Reset { yes } => commands::reset::run(&path, yes)?,
    }

    Ok(())
}
