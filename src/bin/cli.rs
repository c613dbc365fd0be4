//! jsonlkv CLI
//!
//! Command-line interface for inspecting and editing a single store.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use jsonlkv::log::encode_line;
use jsonlkv::{Config, Engine, KeyPolicy, Records};
use serde_json::Value;
use tracing_subscriber::{fmt, EnvFilter};

/// jsonlkv CLI
#[derive(Parser, Debug)]
#[command(name = "jsonlkv")]
#[command(about = "Inspect and edit a key-indexed JSON-lines store")]
#[command(version)]
struct Args {
    /// Log file of the store (the index lives next to it)
    log: PathBuf,

    /// How keys are decoded on read
    #[arg(short, long, value_enum, default_value = "sniff")]
    key_policy: PolicyArg,

    /// Do not take the cross-process writer lock
    #[arg(long)]
    no_lock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print every live record
    Load,

    /// Print records in an inclusive key range
    Select {
        /// Lower bound (inclusive); smallest key if omitted
        #[arg(short, long)]
        lower: Option<String>,

        /// Upper bound (inclusive); largest key if omitted
        #[arg(short, long)]
        upper: Option<String>,
    },

    /// Print the value of one key
    Get {
        /// The key to get
        key: String,
    },

    /// Insert or replace one record
    Put {
        /// The key to set
        key: String,

        /// The value, as JSON
        value: String,
    },

    /// Delete keys
    Delete {
        /// The keys to delete
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Delete every key in an inclusive range
    DeleteRange {
        /// Lower bound (inclusive)
        lower: String,

        /// Upper bound (inclusive)
        upper: String,
    },

    /// Rewrite the log in key order without tombstones
    Compact,

    /// Rebuild the index from the log
    Reindex,

    /// Print size, record count and key range
    Stats,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    Sniff,
    Text,
    Timestamp,
}

impl From<PolicyArg> for KeyPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Sniff => KeyPolicy::Sniff,
            PolicyArg::Text => KeyPolicy::Text,
            PolicyArg::Timestamp => KeyPolicy::Timestamp,
        }
    }
}

fn main() -> ExitCode {
    // Logs go to stderr; stdout carries records
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,jsonlkv=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::builder()
        .log_path(&args.log)
        .key_policy(args.key_policy.into())
        .advisory_lock(!args.no_lock)
        .build();

    let engine = Engine::open(config)?;

    match args.command {
        Commands::Load => print_records(&engine.load()?)?,
        Commands::Select { lower, upper } => print_records(&engine.select(lower, upper)?)?,
        Commands::Get { key } => match engine.get(key.as_str())? {
            Some(value) => println!("{}", value),
            None => {
                tracing::warn!(key = key.as_str(), "key not found");
            }
        },
        Commands::Put { key, value } => {
            let value: Value = serde_json::from_str(&value)?;
            let report = engine.put(key, value)?;
            tracing::info!(?report, "record written");
        }
        Commands::Delete { keys } => {
            let report = engine.delete(keys)?;
            tracing::info!(deleted = report.deleted, missing = report.missing, "keys deleted");
        }
        Commands::DeleteRange { lower, upper } => {
            let report = engine.delete_range(Some(lower), Some(upper))?;
            tracing::info!(deleted = report.deleted, "key range deleted");
        }
        Commands::Compact => {
            let stats = engine.compact()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Reindex => {
            let report = engine.reindex()?;
            tracing::info!(
                keys = report.records_indexed,
                corrupt = report.corrupt_lines,
                "index rebuilt"
            );
        }
        Commands::Stats => {
            println!("{}", serde_json::to_string_pretty(&engine.stats()?)?);
        }
    }

    Ok(())
}

/// Print records in the log's own line format
fn print_records(records: &Records) -> Result<(), Box<dyn std::error::Error>> {
    use std::io::Write;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for (key, value) in records {
        out.write_all(&encode_line(&key.canonical(), value)?)?;
    }
    out.flush()?;
    Ok(())
}
