use clap::{Args, Parser, Subcommand};
use config::{LedgerConfig, UnknownBookPolicy, WriteMode};
use pipeline::{make_rng, rebuild_balances, run_into_csv, run_into_store};
use std::path::PathBuf;
use store::LedgerStore;

mod compute;
mod config;
mod data;
mod pipeline;
mod query;
mod read;
mod registry;
mod store;
mod synth;
mod write;

#[derive(Parser, Debug)]
#[command(name = "ledgersynth")]
#[command(about = "Synthesize a multi-book ledger and roll up its daily balances")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate books and journal, then roll up balances
    Generate {
        #[command(flatten)]
        overrides: Overrides,
        /// SQLite database to write to
        #[arg(long, default_value = "ledger.db", conflicts_with = "csv_dir")]
        db: PathBuf,
        /// Write books.csv, journal.csv and balances.csv here instead of SQLite
        #[arg(long)]
        csv_dir: Option<PathBuf>,
    },
    /// Rebuild the balances of an existing database from its journal
    Rollup {
        #[command(flatten)]
        overrides: Overrides,
        #[arg(long, default_value = "ledger.db")]
        db: PathBuf,
    },
    /// Run a read-only SQL query and print the result as JSON
    Query {
        #[arg(long, default_value = "ledger.db")]
        db: PathBuf,
        sql: String,
    },
    /// Print tables, columns and journal vocabularies
    Schema {
        #[arg(long, default_value = "ledger.db")]
        db: PathBuf,
    },
}

/// Command line settings applied on top of the configuration file.
#[derive(Args, Debug)]
struct Overrides {
    /// TOML configuration file
    #[arg(long, env = "LEDGERSYNTH_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    books: Option<u32>,
    /// First day of the journal (yyyy-mm-dd)
    #[arg(long)]
    start: Option<chrono::NaiveDate>,
    /// Last day of the journal (yyyy-mm-dd)
    #[arg(long)]
    end: Option<chrono::NaiveDate>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    chunk_size: Option<usize>,
    #[arg(long, value_enum)]
    unknown_books: Option<UnknownBookPolicy>,
    #[arg(long)]
    first_document: Option<u64>,
    /// Clear existing books, journal and balances first
    #[arg(long)]
    replace: bool,
}

impl Overrides {
    fn resolve(self) -> anyhow::Result<LedgerConfig> {
        let mut config = match &self.config {
            Some(path) => LedgerConfig::load(path)?,
            None => LedgerConfig::default(),
        };
        config.seed = self.seed.or(config.seed);
        if let Some(books) = self.books {
            config.registry.books = books;
        }
        if let Some(start) = self.start {
            config.journal.start_date = start;
        }
        if let Some(end) = self.end {
            config.journal.end_date = end;
        }
        if let Some(batch_size) = self.batch_size {
            config.journal.batch_size = batch_size;
        }
        if let Some(first_document) = self.first_document {
            config.journal.first_document = first_document;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.rollup.chunk_size = chunk_size;
        }
        if let Some(policy) = self.unknown_books {
            config.rollup.unknown_books = policy;
        }
        if self.replace {
            config.storage.mode = WriteMode::Replace;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ledgersynth=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Generate {
            overrides,
            db,
            csv_dir,
        } => {
            let config = overrides.resolve()?;
            let mut rng = make_rng(config.seed);
            let summary = match csv_dir {
                Some(dir) => run_into_csv(&config, &dir, &mut rng)?,
                None => run_into_store(&config, &mut LedgerStore::open(&db)?, &mut rng)?,
            };
            println!(
                "{} books, {} journal entries, {} balance snapshots; next document number {}",
                summary.books, summary.entries, summary.snapshots, summary.next_document
            );
        }
        Command::Rollup { overrides, db } => {
            let config = overrides.resolve()?;
            let snapshots = rebuild_balances(&mut LedgerStore::open(&db)?, &config.rollup)?;
            println!("{snapshots} balance snapshots");
        }
        Command::Query { db, sql } => {
            let store = LedgerStore::open(&db)?;
            println!("{}", query::run_query(store.connection(), &sql));
        }
        Command::Schema { db } => {
            let store = LedgerStore::open(&db)?;
            print!("{}", query::schema_info(store.connection())?);
        }
    }
    Ok(())
}
