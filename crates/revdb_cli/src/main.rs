//! RevDB CLI
//!
//! Command-line tools for RevDB datastores.
//!
//! # Commands
//!
//! - `inspect` - Display datastore statistics and indexes
//! - `conflicts` - List conflicted documents, optionally resolving them
//! - `find` - Run a query and print matching documents
//! - `replicate` - Replicate between two datastores under the same root

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// RevDB command-line datastore tools.
#[derive(Parser)]
#[command(name = "revdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the datastores
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display datastore statistics
    Inspect {
        /// Datastore to inspect (all datastores if omitted)
        name: Option<String>,

        /// Show index definitions
        #[arg(short, long)]
        indexes: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List conflicted documents
    Conflicts {
        /// Datastore name
        name: String,

        /// Resolve every conflict in favour of the current winner
        #[arg(long)]
        keep_current: bool,
    },

    /// Run a query and print matching documents as JSON lines
    Find {
        /// Datastore name
        name: String,

        /// Query: a selector, or an object with selector/sort/skip/limit/fields
        query: String,
    },

    /// Replicate between two datastores under the same root
    Replicate {
        /// Local datastore
        source: String,

        /// Peer datastore
        target: String,

        /// Direction (push, pull, both)
        #[arg(short, long, default_value = "push")]
        direction: String,

        /// Changed documents per batch
        #[arg(short, long, default_value = "100")]
        batch_size: usize,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect {
            name,
            indexes,
            format,
        } => {
            let path = cli.path.ok_or("Datastore root required for inspect")?;
            commands::inspect::run(&path, name.as_deref(), indexes, &format)?;
        }
        Commands::Conflicts { name, keep_current } => {
            let path = cli.path.ok_or("Datastore root required for conflicts")?;
            commands::conflicts::run(&path, &name, keep_current)?;
        }
        Commands::Find { name, query } => {
            let path = cli.path.ok_or("Datastore root required for find")?;
            commands::find::run(&path, &name, &query)?;
        }
        Commands::Replicate {
            source,
            target,
            direction,
            batch_size,
        } => {
            let path = cli.path.ok_or("Datastore root required for replicate")?;
            commands::replicate::run(&path, &source, &target, &direction, batch_size)?;
        }
        Commands::Version => {
            println!("RevDB CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
