use crate::{
    compute::{reconcile, Rollup},
    config::{LedgerConfig, RollupConfig, WriteMode},
    data::BookId,
    read::read_journal,
    registry::generate_books,
    store::{LedgerStore, StoreUnit},
    synth::{in_batches, DocumentCounter, JournalSynthesizer, SynthesisModel},
    write::{write_table, CsvSink, BALANCE_HEADER, BOOK_HEADER, JOURNAL_HEADER},
};
use anyhow::{Context, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use std::{
    collections::HashMap,
    fs::{self, File},
    path::{Path, PathBuf},
};
use tracing::{debug, info};

pub(crate) const BOOKS_FILE: &str = "books.csv";
pub(crate) const JOURNAL_FILE: &str = "journal.csv";
pub(crate) const BALANCES_FILE: &str = "balances.csv";
const TMP_SUFFIX: &str = "tmp";

/// Random source of a run: reproducible when seeded, OS entropy otherwise.
pub(crate) fn make_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunSummary {
    pub books: usize,
    pub entries: u64,
    pub snapshots: usize,
    /// First document number a follow-up run may use.
    pub next_document: u64,
}

/// Rolls the journal of `unit` up into fresh balances and checks them
/// against the journal totals. Returns (entries read, snapshots written).
fn roll_up(unit: &StoreUnit<'_>, rollup: &RollupConfig) -> Result<(u64, usize)> {
    let books = unit.load_books()?;
    let mut aggregator = Rollup::new(&books, rollup.unknown_books);
    let entries = unit.scan_journal(rollup.chunk_size, &mut aggregator)?;
    debug!(groups = aggregator.pending_groups(), "journal scanned");
    let snapshots = aggregator.finish();
    reconcile(&books, &unit.journal_totals()?, &snapshots)?;
    unit.replace_balances(&snapshots)?;
    Ok((entries, snapshots.len()))
}

/// One full run against the SQLite store: registry, journal synthesis in
/// batches, chunked rollup, reconciliation. Nothing is visible in the store
/// unless every step succeeded.
pub(crate) fn run_into_store<R: Rng>(
    config: &LedgerConfig,
    store: &mut LedgerStore,
    rng: &mut R,
) -> Result<RunSummary> {
    config.validate()?;
    let generated = generate_books(&config.registry, rng)?;
    let model = SynthesisModel::new(&config.journal)?;
    let mut counter = DocumentCounter::starting_at(config.journal.first_document);
    info!(books = generated.len(), "book registry generated");

    let unit = store.begin()?;
    if config.storage.mode == WriteMode::Replace {
        unit.clear()?;
    }
    // books stored by an earlier run keep their attributes
    let books = unit.upsert_books(&generated)?;
    let synthesizer = JournalSynthesizer::new(&books, &model, &mut counter, rng);
    for (n, batch) in in_batches(synthesizer, config.journal.batch_size).enumerate() {
        let batch = batch.into_iter().collect::<Result<Vec<_>, _>>()?;
        unit.insert_journal(&batch)?;
        debug!(batch = n, entries = batch.len(), "journal batch written");
    }
    let (entries, snapshots) = roll_up(&unit, &config.rollup)?;
    unit.commit()?;

    let summary = RunSummary {
        books: books.len(),
        entries,
        snapshots,
        next_document: counter.peek(),
    };
    info!(?summary, "run committed");
    Ok(summary)
}

/// Recomputes the balances of an existing store from its journal.
pub(crate) fn rebuild_balances(store: &mut LedgerStore, rollup: &RollupConfig) -> Result<usize> {
    let unit = store.begin()?;
    let (entries, snapshots) = roll_up(&unit, rollup)?;
    unit.commit()?;
    info!(entries, snapshots, "balances rebuilt");
    Ok(snapshots)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

fn write_csv_files<R: Rng>(
    config: &LedgerConfig,
    dir: &Path,
    rng: &mut R,
) -> Result<RunSummary> {
    let books = generate_books(&config.registry, rng)?;
    let model = SynthesisModel::new(&config.journal)?;
    let mut counter = DocumentCounter::starting_at(config.journal.first_document);
    info!(books = books.len(), "book registry generated");
    write_table(
        File::create(tmp_path(&dir.join(BOOKS_FILE)))?,
        &BOOK_HEADER,
        &books,
    )?;

    let journal_path = tmp_path(&dir.join(JOURNAL_FILE));
    let mut totals: HashMap<BookId, Decimal> = HashMap::new();
    let mut journal = CsvSink::new(File::create(&journal_path)?, &JOURNAL_HEADER)?;
    let synthesizer = JournalSynthesizer::new(&books, &model, &mut counter, rng);
    for batch in in_batches(synthesizer, config.journal.batch_size) {
        let batch = batch.into_iter().collect::<Result<Vec<_>, _>>()?;
        for entry in &batch {
            *totals.entry(entry.book_id.clone()).or_default() += entry.value;
        }
        journal.write_rows(&batch)?;
    }
    journal.finish()?;

    let mut aggregator = Rollup::new(&books, config.rollup.unknown_books);
    let entries = read_journal(
        File::open(&journal_path)?,
        config.rollup.chunk_size,
        &mut aggregator,
    )?;
    let snapshots = aggregator.finish();
    reconcile(&books, &totals, &snapshots)?;
    write_table(
        File::create(tmp_path(&dir.join(BALANCES_FILE)))?,
        &BALANCE_HEADER,
        &snapshots,
    )?;

    Ok(RunSummary {
        books: books.len(),
        entries,
        snapshots: snapshots.len(),
        next_document: counter.peek(),
    })
}

/// Moves the temporary files into place, in order. When a move fails, the
/// temporary files still pending are removed; files already moved stay, since
/// the directory has no way to swap all three at once.
fn publish(files: &[PathBuf]) -> Result<()> {
    for (i, file) in files.iter().enumerate() {
        if let Err(e) = fs::rename(tmp_path(file), file) {
            for pending in &files[i..] {
                let _ = fs::remove_file(tmp_path(pending));
            }
            return Err(e).with_context(|| format!("Failed to move {} into place", file.display()));
        }
    }
    Ok(())
}

/// One full run against the CSV sink. The three files are written under a
/// temporary name and only moved into place once the rollup reconciled.
pub(crate) fn run_into_csv<R: Rng>(
    config: &LedgerConfig,
    dir: &Path,
    rng: &mut R,
) -> Result<RunSummary> {
    config.validate()?;
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let files = [BOOKS_FILE, JOURNAL_FILE, BALANCES_FILE].map(|f| dir.join(f));
    match write_csv_files(config, dir, rng) {
        Ok(summary) => {
            publish(&files)?;
            info!(?summary, dir = %dir.display(), "csv run written");
            Ok(summary)
        }
        Err(e) => {
            for file in &files {
                // the file may not have been created yet
                let _ = fs::remove_file(tmp_path(file));
            }
            Err(e)
        }
    }
}
