//! HashKV Manager
//!
//! Command-line tool to create, seed and inspect a database file.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use hashkv::{Config, Database, HashKvError};
use tracing_subscriber::{fmt, EnvFilter};

/// HashKV manager
#[derive(Parser, Debug)]
#[command(name = "hashkv-mgr")]
#[command(about = "Create, seed and inspect HashKV database files")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an empty database file
    Create {
        /// Database file
        path: PathBuf,

        /// Number of hash buckets
        #[arg(short, long, default_value_t = hashkv::config::DEFAULT_BUCKET_COUNT)]
        buckets: u64,
    },

    /// Set a key-value pair
    Set {
        path: PathBuf,
        key: String,
        value: String,
    },

    /// Append to a value (creates the record if missing)
    Append {
        path: PathBuf,
        key: String,
        value: String,
    },

    /// Print a value
    Get { path: PathBuf, key: String },

    /// Remove a key
    Remove { path: PathBuf, key: String },

    /// Print every record as key<TAB>value
    List {
        path: PathBuf,

        /// Print keys only
        #[arg(short, long)]
        keys: bool,
    },

    /// Print the number of records
    Count { path: PathBuf },

    /// Remove every record
    Clear { path: PathBuf },

    /// Check the file structure and print a report
    Verify { path: PathBuf },
}

fn main() -> ExitCode {
    // Logs go to stderr so they never mix with command output
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("hashkv-mgr: {} ({})", e, e.code());
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<(), HashKvError> {
    match command {
        Commands::Create { path, buckets } => {
            let config = Config::builder().path(path).bucket_count(buckets).build();
            Database::open(config)?.close()
        }
        Commands::Set { path, key, value } => {
            with_db(path, |db| db.set(key.as_bytes(), value.as_bytes()))
        }
        Commands::Append { path, key, value } => {
            with_db(path, |db| db.append(key.as_bytes(), value.as_bytes()))
        }
        Commands::Get { path, key } => with_db(path, |db| {
            let value = db.get(key.as_bytes())?;
            println!("{}", String::from_utf8_lossy(&value));
            Ok(())
        }),
        Commands::Remove { path, key } => with_db(path, |db| {
            if db.remove(key.as_bytes())? {
                Ok(())
            } else {
                Err(HashKvError::NotFound)
            }
        }),
        Commands::List { path, keys } => with_db(path, |db| {
            if keys {
                for key in db.keys() {
                    println!("{}", String::from_utf8_lossy(&key?));
                }
            } else {
                for record in db.iter() {
                    let (key, value) = record?;
                    println!(
                        "{}\t{}",
                        String::from_utf8_lossy(&key),
                        String::from_utf8_lossy(&value)
                    );
                }
            }
            Ok(())
        }),
        Commands::Count { path } => with_db(path, |db| {
            println!("{}", db.count()?);
            Ok(())
        }),
        Commands::Clear { path } => with_db(path, |db| db.clear()),
        Commands::Verify { path } => with_db(path, |db| {
            let report = db.verify()?;
            println!("records: {}", report.live_records);
            println!("live bytes: {}", report.live_bytes);
            println!("free slots: {}", report.free_slots);
            println!("free bytes: {}", report.free_bytes);
            println!("header bytes: {}", report.header_bytes);
            println!("file size: {}", report.file_size);
            println!("longest chain: {}", report.longest_chain);
            Ok(())
        }),
    }
}

/// Open an existing file, run `f`, and close even when `f` fails
fn with_db<F>(path: PathBuf, f: F) -> Result<(), HashKvError>
where
    F: FnOnce(&Database) -> Result<(), HashKvError>,
{
    let config = Config::builder()
        .path(path)
        .create_if_missing(false)
        .build();
    let db = Database::open(config)?;
    let result = f(&db);
    let closed = db.close();
    result.and(closed)
}
