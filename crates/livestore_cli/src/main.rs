//! LiveStore CLI
//!
//! Command-line tools for operating LiveStore.
//!
//! # Commands
//!
//! - `serve` - Run the coordination server for the network channel
//! - `tables` - List the table allow-list
//! - `inspect` - Show per-table counts of a fallback document
//! - `dump` - Print the records of one table
//! - `watch` - Print invalidation events seen on a coordination server

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// LiveStore command-line tools.
#[derive(Parser)]
#[command(name = "livestore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the fallback JSON document
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// SQLite file used as the primary backend
    #[arg(global = true, long)]
    sqlite: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordination server
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:4870")]
        bind: SocketAddr,

        /// Maximum concurrent sessions
        #[arg(long, default_value = "1000")]
        max_connections: usize,
    },

    /// List the tables the engine accepts
    Tables {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show per-table counts of a fallback document
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the records of one table
    Dump {
        /// Table name
        table: String,

        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print invalidation events relayed by a coordination server
    Watch {
        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:4870")]
        server: String,

        /// Only print these tables
        #[arg(short, long)]
        table: Vec<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

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
        Commands::Serve {
            bind,
            max_connections,
        } => {
            commands::serve::run(bind, max_connections).await?;
        }
        Commands::Tables { format } => {
            commands::tables::run(&format)?;
        }
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Fallback path required for inspect")?;
            commands::inspect::run(&path, &format).await?;
        }
        Commands::Dump {
            table,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Fallback path required for dump")?;
            commands::dump::run(&path, cli.sqlite.as_deref(), &table, limit, &format).await?;
        }
        Commands::Watch {
            server,
            table,
            format,
        } => {
            commands::watch::run(&server, &table, &format).await?;
        }
        Commands::Version => {
            println!("LiveStore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Tables: {}", livestore_core::Table::ALL.len());
        }
    }

    Ok(())
}
