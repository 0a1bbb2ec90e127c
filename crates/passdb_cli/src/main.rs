//! passdb CLI
//!
//! Command-line tools for KDB and KDBX password databases.
//!
//! # Commands
//!
//! - `create` - Create an empty database
//! - `inspect` - Display header facts and, with credentials, content counts
//! - `verify` - Decrypt a database and check its structure
//! - `export` - Write the database as plain-text XML
//! - `empty-trash` - Permanently remove everything in the trash

mod commands;

use clap::{Parser, Subcommand};
use passdb_codec::Credentials;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// passdb command-line database tools.
#[derive(Parser)]
#[command(name = "passdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Master password
    #[arg(global = true, long)]
    password: Option<String>,

    /// Key file
    #[arg(global = true, short, long)]
    key_file: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty database
    Create {
        /// Write the legacy KDB layout instead of KDBX
        #[arg(long)]
        kdb: bool,

        /// Key transformation rounds
        #[arg(short, long)]
        rounds: Option<u64>,
    },

    /// Display header facts and, with credentials, content counts
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Decrypt a database and check its structure
    Verify,

    /// Write the database as plain-text XML
    Export {
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Permanently remove everything in the trash and save
    EmptyTrash {
        /// Also drop attachments no entry references
        #[arg(short, long)]
        compact: bool,
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

    let credentials = credentials(cli.password, cli.key_file.as_deref())?;

    match cli.command {
        Commands::Create { kdb, rounds } => {
            let path = cli.path.ok_or("Database path required for create")?;
            commands::create::run(&path, &credentials, kdb, rounds)?;
        }
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Database path required for inspect")?;
            commands::inspect::run(&path, &credentials, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Database path required for verify")?;
            commands::verify::run(&path, &credentials)?;
        }
        Commands::Export { output } => {
            let path = cli.path.ok_or("Database path required for export")?;
            commands::export::run(&path, &credentials, &output)?;
        }
        Commands::EmptyTrash { compact } => {
            let path = cli.path.ok_or("Database path required for empty-trash")?;
            commands::empty_trash::run(&path, &credentials, compact)?;
        }
        Commands::Version => {
            println!("passdb CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn credentials(
    password: Option<String>,
    key_file: Option<&std::path::Path>,
) -> Result<Credentials, Box<dyn std::error::Error>> {
    let mut credentials = Credentials::new();
    if let Some(password) = password {
        credentials = credentials.with_password(password);
    }
    if let Some(path) = key_file {
        credentials = credentials.with_key_file(path)?;
    }
    Ok(credentials)
}
