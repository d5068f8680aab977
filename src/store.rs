//! SQLite sink for the three ledger datasets.
//!
//! Everything a run writes goes through one `StoreUnit`, i.e. one SQLite
//! transaction: a run either commits books, journal and balances together, or
//! leaves the database as it found it.

use crate::{
    data::{timestamp, BalanceSnapshot, Book, BookId, Error, JournalEntry},
    read::EntryUser,
};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, ErrorCode, Row, Transaction};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use std::{collections::HashMap, path::Path};
use tracing::{debug, info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS books (
    book_id TEXT PRIMARY KEY,
    book_name TEXT NOT NULL,
    cost_center TEXT NOT NULL,
    system_entity TEXT NOT NULL,
    system TEXT NOT NULL,
    opening_balance INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS journal (
    book_id TEXT NOT NULL,
    book_name TEXT NOT NULL,
    cost_center TEXT NOT NULL,
    currency TEXT NOT NULL,
    value INTEGER NOT NULL,
    entry_date TEXT NOT NULL,
    posting_date TEXT NOT NULL,
    username TEXT NOT NULL,
    document_number TEXT PRIMARY KEY,
    transaction_type TEXT NOT NULL,
    posted_by TEXT NOT NULL,
    approved_by TEXT,
    created_ts TEXT NOT NULL,
    updated_ts TEXT NOT NULL,
    source_system TEXT NOT NULL,
    remarks TEXT NOT NULL
);

-- (book_id, date) is unique by construction, the index only serves lookups
CREATE TABLE IF NOT EXISTS balances (
    book_id TEXT NOT NULL,
    date TEXT NOT NULL,
    balance INTEGER NOT NULL,
    daily_change INTEGER NOT NULL,
    total_journals INTEGER NOT NULL,
    last_updated_by TEXT
);

CREATE INDEX IF NOT EXISTS idx_journal_book_date ON journal(book_id, entry_date);
CREATE INDEX IF NOT EXISTS idx_balances_book_date ON balances(book_id, date);
"#;

const DATE_FORMAT: &str = "%Y-%m-%d";

const JOURNAL_COLUMNS: &str = "book_id, book_name, cost_center, currency, value, entry_date, \
    posting_date, username, document_number, transaction_type, posted_by, approved_by, \
    created_ts, updated_ts, source_system, remarks";

/// Converts an amount to the whole-unit integer stored in SQLite.
pub(crate) fn to_storage(amount: Decimal) -> Result<i64, Error> {
    if !amount.fract().is_zero() {
        return Err(Error::FractionalAmount(amount));
    }
    amount.to_i64().ok_or(Error::AmountOutOfRange(amount))
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).with_context(|| format!("Malformed date {raw:?}"))
}

fn book_from_row(row: &Row) -> Result<Book> {
    Ok(Book {
        book_id: row.get(0)?,
        book_name: row.get(1)?,
        cost_center: row.get(2)?,
        system_entity: row.get(3)?,
        system: row.get(4)?,
        opening_balance: Decimal::from(row.get::<_, i64>(5)?),
    })
}

fn entry_from_row(row: &Row) -> Result<JournalEntry> {
    Ok(JournalEntry {
        book_id: row.get(0)?,
        book_name: row.get(1)?,
        cost_center: row.get(2)?,
        currency: row.get(3)?,
        value: Decimal::from(row.get::<_, i64>(4)?),
        entry_date: parse_date(&row.get::<_, String>(5)?)?,
        posting_date: parse_date(&row.get::<_, String>(6)?)?,
        username: row.get(7)?,
        document_number: row.get::<_, String>(8)?.parse()?,
        transaction_type: row.get::<_, String>(9)?.parse()?,
        posted_by: row.get(10)?,
        approved_by: row.get(11)?,
        created_ts: timestamp::parse(&row.get::<_, String>(12)?)?,
        updated_ts: timestamp::parse(&row.get::<_, String>(13)?)?,
        source_system: row.get(14)?,
        remarks: row.get(15)?,
    })
}

/// Durable tabular store holding `books`, `journal` and `balances`.
pub(crate) struct LedgerStore {
    conn: Connection,
}

impl LedgerStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        let store = Self::init(conn)?;
        info!("ledger database ready at {}", path.display());
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;
        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        if journal_mode != "wal" && journal_mode != "memory" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }
        Ok(Self { conn })
    }

    /// Read-only access for the query surface.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Starts the single committed unit of a run. Dropping the unit without
    /// calling `commit` rolls everything back.
    pub fn begin(&mut self) -> Result<StoreUnit<'_>> {
        let tx = self
            .conn
            .transaction()
            .context("Failed to start a transaction")?;
        Ok(StoreUnit { tx })
    }
}

pub(crate) struct StoreUnit<'c> {
    tx: Transaction<'c>,
}

impl StoreUnit<'_> {
    /// Empties all three tables, for replace-all runs.
    pub fn clear(&self) -> Result<()> {
        self.tx
            .execute_batch("DELETE FROM balances; DELETE FROM journal; DELETE FROM books;")
            .context("Failed to clear ledger tables")?;
        Ok(())
    }

    /// Inserts books not stored yet. A stored book is read-only: its row is
    /// left as is, so journal rows keep matching its name and cost center.
    /// Returns the stored row of every given book, in input order.
    pub fn upsert_books(&self, books: &[Book]) -> Result<Vec<Book>> {
        let mut stmt = self.tx.prepare_cached(
            "INSERT INTO books (book_id, book_name, cost_center, system_entity, system, opening_balance)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(book_id) DO NOTHING",
        )?;
        let mut select = self.tx.prepare_cached(
            "SELECT book_id, book_name, cost_center, system_entity, system, opening_balance
             FROM books WHERE book_id = ?1",
        )?;
        let mut stored = Vec::with_capacity(books.len());
        for book in books {
            stmt.execute(params![
                book.book_id,
                book.book_name,
                book.cost_center,
                book.system_entity,
                book.system,
                to_storage(book.opening_balance)?,
            ])
            .with_context(|| format!("Failed to upsert book {}", book.book_id))?;
            let mut rows = select.query([&book.book_id])?;
            let row = rows
                .next()?
                .with_context(|| format!("Book {} vanished after insert", book.book_id))?;
            stored.push(book_from_row(row)?);
        }
        Ok(stored)
    }

    pub fn load_books(&self) -> Result<Vec<Book>> {
        let mut stmt = self.tx.prepare_cached(
            "SELECT book_id, book_name, cost_center, system_entity, system, opening_balance
             FROM books ORDER BY book_id",
        )?;
        let mut rows = stmt.query([])?;
        let mut books = Vec::new();
        while let Some(row) = rows.next()? {
            books.push(book_from_row(row)?);
        }
        Ok(books)
    }

    /// Appends journal entries. A document number that is already stored is
    /// fatal (`Error::DuplicateDocument`): entries are never replaced.
    pub fn insert_journal(&self, entries: &[JournalEntry]) -> Result<()> {
        let mut stmt = self.tx.prepare_cached(&format!(
            "INSERT INTO journal ({JOURNAL_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
        ))?;
        for entry in entries {
            let document = entry.document_number.to_string();
            stmt.execute(params![
                entry.book_id,
                entry.book_name,
                entry.cost_center,
                entry.currency,
                to_storage(entry.value)?,
                format_date(entry.entry_date),
                format_date(entry.posting_date),
                entry.username,
                document,
                entry.transaction_type.as_str(),
                entry.posted_by,
                entry.approved_by.as_deref(),
                timestamp::format(&entry.created_ts),
                timestamp::format(&entry.updated_ts),
                entry.source_system,
                entry.remarks,
            ])
            .map_err(|e| match e.sqlite_error_code() {
                Some(ErrorCode::ConstraintViolation) => {
                    anyhow::Error::new(Error::DuplicateDocument(document.clone()))
                }
                _ => anyhow::Error::new(e).context(format!("Failed to insert journal entry {document}")),
            })?;
        }
        Ok(())
    }

    /// Streams the whole journal to `user` in chunks of at most `chunk_size`
    /// rows, in insertion order. Returns the number of entries read.
    pub fn scan_journal<U: EntryUser>(&self, chunk_size: usize, user: &mut U) -> Result<u64> {
        let chunk_size = chunk_size.max(1);
        let limit = i64::try_from(chunk_size).unwrap_or(i64::MAX);
        let mut stmt = self.tx.prepare_cached(&format!(
            "SELECT {JOURNAL_COLUMNS}, rowid FROM journal WHERE rowid > ?1 ORDER BY rowid LIMIT ?2"
        ))?;
        let mut last_rowid = 0i64;
        let mut count = 0u64;
        for n in 0.. {
            let mut chunk = Vec::new();
            let mut rows = stmt.query(params![last_rowid, limit])?;
            while let Some(row) = rows.next()? {
                chunk.push(entry_from_row(row)?);
                last_rowid = row.get(16)?;
            }
            if chunk.is_empty() {
                break;
            }
            user.use_chunk(&chunk)?;
            count += chunk.len() as u64;
            debug!(chunk = n, entries = chunk.len(), "journal chunk scanned");
            if chunk.len() < chunk_size {
                break;
            }
        }
        Ok(count)
    }

    /// Per-book sum of journal values, computed by SQLite independently of the
    /// rollup.
    pub fn journal_totals(&self) -> Result<HashMap<BookId, Decimal>> {
        let mut stmt = self
            .tx
            .prepare_cached("SELECT book_id, SUM(value) FROM journal GROUP BY book_id")?;
        let totals = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, Decimal::from(row.get::<_, i64>(1)?)))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(totals)
    }

    /// Balances are derived data: the previous set is dropped and the freshly
    /// rolled up snapshots are appended.
    pub fn replace_balances(&self, snapshots: &[BalanceSnapshot]) -> Result<()> {
        self.tx.execute("DELETE FROM balances", [])?;
        let mut stmt = self.tx.prepare_cached(
            "INSERT INTO balances (book_id, date, balance, daily_change, total_journals, last_updated_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for snapshot in snapshots {
            stmt.execute(params![
                snapshot.book_id,
                format_date(snapshot.date),
                to_storage(snapshot.balance)?,
                to_storage(snapshot.daily_change)?,
                i64::try_from(snapshot.total_journals)?,
                snapshot.last_updated_by,
            ])?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn load_balances(&self) -> Result<Vec<BalanceSnapshot>> {
        let mut stmt = self.tx.prepare_cached(
            "SELECT book_id, date, balance, daily_change, total_journals, last_updated_by
             FROM balances ORDER BY book_id, date",
        )?;
        let mut rows = stmt.query([])?;
        let mut snapshots = Vec::new();
        while let Some(row) = rows.next()? {
            snapshots.push(BalanceSnapshot {
                book_id: row.get(0)?,
                date: parse_date(&row.get::<_, String>(1)?)?,
                balance: Decimal::from(row.get::<_, i64>(2)?),
                daily_change: Decimal::from(row.get::<_, i64>(3)?),
                total_journals: u64::try_from(row.get::<_, i64>(4)?)?,
                last_updated_by: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            });
        }
        Ok(snapshots)
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit().context("Failed to commit the run")?;
        Ok(())
    }
}
