use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

pub type BookId = String;

pub const BOOK_ID_PREFIX: &str = "SAPB";
pub const DOCUMENT_PREFIX: &str = "DOC";
const DOCUMENT_DATE_FORMAT: &str = "%Y%m%d";

/// A ledger book. The opening balance is set once by the registry and is
/// never written again, not even by a registry upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Book {
    pub book_id: BookId,
    pub book_name: String,
    pub cost_center: String,
    pub system_entity: String,
    pub system: String,
    pub opening_balance: Decimal,
}

/// Document number of a journal entry, rendered as `DOC<yyyymmdd><seq>` with the
/// sequence zero-padded to at least three digits. The sequence comes from the
/// run's `DocumentCounter`, so ordering on it follows emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub(crate) struct DocumentNumber {
    pub seq: u64,
    pub date: NaiveDate,
}

impl DocumentNumber {
    pub fn new(date: NaiveDate, seq: u64) -> Self {
        Self { seq, date }
    }
}

impl fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{DOCUMENT_PREFIX}{}{:03}",
            self.date.format(DOCUMENT_DATE_FORMAT),
            self.seq
        )
    }
}

impl FromStr for DocumentNumber {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || Error::MalformedDocument(s.to_string());
        let rest = s.strip_prefix(DOCUMENT_PREFIX).ok_or_else(malformed)?;
        // the date part is always 8 digits, whatever is left is the sequence
        if rest.len() <= 8 || !rest.is_char_boundary(8) {
            return Err(malformed());
        }
        let (date, seq) = rest.split_at(8);
        let date = NaiveDate::parse_from_str(date, DOCUMENT_DATE_FORMAT).map_err(|_| malformed())?;
        if !seq.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let parsed: u64 = seq.parse().map_err(|_| malformed())?;
        // only the canonical padding is accepted, so text and value round trip
        if format!("{parsed:03}") != seq {
            return Err(malformed());
        }
        Ok(Self { seq: parsed, date })
    }
}

impl TryFrom<String> for DocumentNumber {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DocumentNumber> for String {
    fn from(doc: DocumentNumber) -> Self {
        doc.to_string()
    }
}

/// Different kinds of journal postings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) enum TransactionType {
    Manual,
    #[serde(rename = "Auto-post")]
    AutoPost,
    Reversal,
    Accrual,
}

impl TransactionType {
    pub const ALL: [TransactionType; 4] = [
        TransactionType::Manual,
        TransactionType::AutoPost,
        TransactionType::Reversal,
        TransactionType::Accrual,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Manual => "Manual",
            TransactionType::AutoPost => "Auto-post",
            TransactionType::Reversal => "Reversal",
            TransactionType::Accrual => "Accrual",
        }
    }
}

impl FromStr for TransactionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::UnknownTransactionType(s.to_string()))
    }
}

/// One immutable journal posting. Book name and cost center are denormalized
/// copies of the owning book, as in the persisted `journal` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct JournalEntry {
    pub book_id: BookId,
    pub book_name: String,
    pub cost_center: String,
    pub currency: String,
    pub value: Decimal,
    pub entry_date: NaiveDate,
    pub posting_date: NaiveDate,
    pub username: String,
    pub document_number: DocumentNumber,
    pub transaction_type: TransactionType,
    pub posted_by: String,
    pub approved_by: Option<String>,
    #[serde(with = "timestamp")]
    pub created_ts: NaiveDateTime,
    #[serde(with = "timestamp")]
    pub updated_ts: NaiveDateTime,
    pub source_system: String,
    pub remarks: String,
}

/// Running balance of a book at the end of a day, together with that day's
/// aggregate statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct BalanceSnapshot {
    pub book_id: BookId,
    pub date: NaiveDate,
    pub balance: Decimal,
    pub daily_change: Decimal,
    pub total_journals: u64,
    pub last_updated_by: String,
}

/// `yyyy-mm-dd hh:mm:ss` timestamps, used both for CSV and SQLite columns.
pub(crate) mod timestamp {
    use super::Error;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn format(ts: &NaiveDateTime) -> String {
        ts.format(FORMAT).to_string()
    }

    pub fn parse(raw: &str) -> Result<NaiveDateTime, Error> {
        NaiveDateTime::parse_from_str(raw, FORMAT)
            .map_err(|_| Error::MalformedTimestamp(raw.to_string()))
    }

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&ts.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Ledger error handling: configuration faults are detected before anything is
/// generated, integrity faults abort the current run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid configuration for `{param}`: {reason}")]
    Config { param: &'static str, reason: String },
    #[error("Duplicate document number {0}")]
    DuplicateDocument(String),
    #[error("Document {document} follows {previous} out of sequence")]
    DocumentOutOfOrder { previous: String, document: String },
    #[error("Document counter exhausted after sequence {0}")]
    CounterExhausted(u64),
    #[error("Journal entry {document} references unknown book {book}")]
    UnknownBook { book: BookId, document: String },
    #[error("Balance of book {book} drifted from its journal (expected {expected}, rolled up {actual})")]
    BalanceDrift {
        book: BookId,
        expected: Decimal,
        actual: Decimal,
    },
    #[error("Amount {0} is not a whole number of currency units")]
    FractionalAmount(Decimal),
    #[error("Amount {0} does not fit into a storage integer")]
    AmountOutOfRange(Decimal),
    #[error("Malformed document number {0:?}")]
    MalformedDocument(String),
    #[error("Unknown transaction type {0:?}")]
    UnknownTransactionType(String),
    #[error("Malformed timestamp {0:?}")]
    MalformedTimestamp(String),
}

#[cfg(test)]
mod tests {
    use super::{DocumentNumber, Error, TransactionType};
    use chrono::NaiveDate;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn document_number_format() {
        assert_eq!(
            DocumentNumber::new(day(2023, 1, 2), 7).to_string(),
            "DOC20230102007"
        );
        assert_eq!(
            DocumentNumber::new(day(2023, 1, 2), 12345).to_string(),
            "DOC2023010212345"
        );
    }

    #[test]
    fn document_number_parse() {
        assert_eq!(
            "DOC2023010212345".parse::<DocumentNumber>(),
            Ok(DocumentNumber::new(day(2023, 1, 2), 12345))
        );
        for bad in [
            "DOC20230102",
            "XYZ20230102001",
            "DOC2023130200a",
            "DOC20231302001",
            "DOC202301020001",
            "DOC2023010201",
        ] {
            assert_eq!(
                bad.parse::<DocumentNumber>(),
                Err(Error::MalformedDocument(bad.to_string()))
            );
        }
    }

    #[test]
    fn document_number_text_round_trips() {
        for text in ["DOC20240101000", "DOC20240101001", "DOC20240101999", "DOC202401011000"] {
            assert_eq!(text.parse::<DocumentNumber>().unwrap().to_string(), text);
        }
    }

    #[test]
    fn document_number_orders_by_sequence() {
        let early = DocumentNumber::new(day(2024, 5, 1), 999);
        let late = DocumentNumber::new(day(2023, 1, 2), 1000);
        assert!(early < late);
    }

    #[test]
    fn transaction_type_names() {
        for t in TransactionType::ALL {
            assert_eq!(t.as_str().parse::<TransactionType>(), Ok(t));
        }
        assert_eq!(
            "Auto-Post".parse::<TransactionType>(),
            Err(Error::UnknownTransactionType("Auto-Post".into()))
        );
    }
}
