use crate::{
    config::UnknownBookPolicy,
    data::{BalanceSnapshot, Book, BookId, DocumentNumber, Error, JournalEntry},
    read::EntryUser,
};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

/// Partial aggregate of one (book, day) group. Partials survive chunk
/// boundaries and are only turned into snapshots by `Rollup::finish`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct DayGroup {
    change: Decimal,
    count: u64,
    last: Option<LastPosting>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LastPosting {
    created_ts: NaiveDateTime,
    document: DocumentNumber,
    posted_by: String,
}

impl DayGroup {
    fn add(&mut self, entry: &JournalEntry) {
        self.change += entry.value;
        self.count += 1;
        let later = match &self.last {
            None => true,
            Some(last) => {
                (entry.created_ts, entry.document_number) > (last.created_ts, last.document)
            }
        };
        if later {
            self.last = Some(LastPosting {
                created_ts: entry.created_ts,
                document: entry.document_number,
                posted_by: entry.posted_by.clone(),
            });
        }
    }
}

/// This is where balances are rolled up. Opening balances are loaded from the
/// registry, entries are accumulated per (book, day) whatever the chunking of
/// the input, and the running balance of each book is only advanced when the
/// stream is complete.
///
/// Entries must arrive in emission order. Document sequences then strictly
/// increase, so only the last document is kept to catch duplicates.
#[derive(Debug)]
pub(crate) struct Rollup {
    opening: HashMap<BookId, Decimal>,
    groups: BTreeMap<(BookId, NaiveDate), DayGroup>,
    last_document: Option<DocumentNumber>,
    policy: UnknownBookPolicy,
}

impl Rollup {
    pub fn new<'b>(books: impl IntoIterator<Item = &'b Book>, policy: UnknownBookPolicy) -> Self {
        Self {
            opening: books
                .into_iter()
                .map(|book| (book.book_id.clone(), book.opening_balance))
                .collect(),
            groups: BTreeMap::new(),
            last_document: None,
            policy,
        }
    }

    /// Number of (book, day) groups seen so far.
    pub fn pending_groups(&self) -> usize {
        self.groups.len()
    }

    /// Finalizes every group, books in id order and days in ascending order,
    /// carrying each book's running balance forward from its opening balance.
    /// Books without entries produce no snapshot.
    pub fn finish(self) -> Vec<BalanceSnapshot> {
        let mut running = self.opening;
        self.groups
            .into_iter()
            .map(|((book_id, date), group)| {
                let balance = running.entry(book_id.clone()).or_default();
                *balance += group.change;
                BalanceSnapshot {
                    balance: *balance,
                    book_id,
                    date,
                    daily_change: group.change,
                    total_journals: group.count,
                    last_updated_by: group.last.map(|l| l.posted_by).unwrap_or_default(),
                }
            })
            .collect()
    }
}

impl EntryUser for Rollup {
    fn use_entry(&mut self, entry: &JournalEntry) -> Result<(), Error> {
        if !self.opening.contains_key(&entry.book_id) {
            match self.policy {
                UnknownBookPolicy::Reject => {
                    return Err(Error::UnknownBook {
                        book: entry.book_id.clone(),
                        document: entry.document_number.to_string(),
                    })
                }
                UnknownBookPolicy::AutoRegister => {
                    tracing::warn!(book = %entry.book_id, document = %entry.document_number,
                        "registering unknown book with a zero opening balance");
                    self.opening.insert(entry.book_id.clone(), Decimal::ZERO);
                }
            }
        }
        if let Some(previous) = self.last_document {
            if entry.document_number == previous {
                return Err(Error::DuplicateDocument(previous.to_string()));
            }
            if entry.document_number.seq <= previous.seq {
                return Err(Error::DocumentOutOfOrder {
                    previous: previous.to_string(),
                    document: entry.document_number.to_string(),
                });
            }
        }
        self.last_document = Some(entry.document_number);
        self.groups
            .entry((entry.book_id.clone(), entry.entry_date))
            .or_default()
            .add(entry);
        Ok(())
    }
}

/// Checks that the closing balance of every book equals its opening balance
/// plus the sum of its journal, as computed independently by the sink.
pub(crate) fn reconcile<'b>(
    books: impl IntoIterator<Item = &'b Book>,
    journal_totals: &HashMap<BookId, Decimal>,
    snapshots: &[BalanceSnapshot],
) -> Result<(), Error> {
    let opening: HashMap<&str, Decimal> = books
        .into_iter()
        .map(|book| (book.book_id.as_str(), book.opening_balance))
        .collect();
    let mut closing: BTreeMap<&str, Decimal> = opening.iter().map(|(k, v)| (*k, *v)).collect();
    for book in journal_totals.keys() {
        closing.entry(book.as_str()).or_default();
    }
    // snapshots are ordered by day within a book, the last one wins
    for snapshot in snapshots {
        closing.insert(&snapshot.book_id, snapshot.balance);
    }
    for (book, actual) in closing {
        let expected = opening.get(book).copied().unwrap_or_default()
            + journal_totals.get(book).copied().unwrap_or_default();
        if expected != actual {
            return Err(Error::BalanceDrift {
                book: book.to_string(),
                expected,
                actual,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{reconcile, Rollup};
    use crate::{
        config::{JournalConfig, RegistryConfig, UnknownBookPolicy},
        data::{BalanceSnapshot, Book, DocumentNumber, Error, JournalEntry, TransactionType},
        read::EntryUser,
        registry::generate_books,
        synth::{in_batches, DocumentCounter, JournalSynthesizer, SynthesisModel},
    };
    use chrono::{NaiveDate, NaiveDateTime};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn book(id: &str, opening: Decimal) -> Book {
        Book {
            book_id: id.into(),
            book_name: format!("Book {id}"),
            cost_center: "CC100".into(),
            system_entity: "SAP".into(),
            system: "SYSTEM1".into(),
            opening_balance: opening,
        }
    }

    fn entry(book: &str, date: NaiveDate, seq: u64, value: Decimal, minute: u32, poster: &str) -> JournalEntry {
        let created_ts: NaiveDateTime = date.and_hms_opt(9, minute, 0).unwrap();
        JournalEntry {
            book_id: book.into(),
            book_name: format!("Book {book}"),
            cost_center: "CC100".into(),
            currency: "USD".into(),
            value,
            entry_date: date,
            posting_date: date,
            username: "user_1".into(),
            document_number: DocumentNumber::new(date, seq),
            transaction_type: TransactionType::Manual,
            posted_by: poster.into(),
            approved_by: None,
            created_ts,
            updated_ts: created_ts,
            source_system: "SAP-FI".into(),
            remarks: "Audit correction".into(),
        }
    }

    fn rollup_chunked(books: &[Book], entries: &[JournalEntry], chunk_size: usize) -> Vec<BalanceSnapshot> {
        let mut rollup = Rollup::new(books, UnknownBookPolicy::Reject);
        for chunk in entries.chunks(chunk_size) {
            rollup.use_chunk(chunk).unwrap();
        }
        rollup.finish()
    }

    #[test]
    fn two_books_scenario() {
        let books = [book("book1", dec!(1000)), book("book2", dec!(2000))];
        let entries = [
            entry("book1", day(1), 1, dec!(50), 0, "user_1"),
            entry("book1", day(1), 2, dec!(-20), 5, "user_2"),
            entry("book2", day(2), 3, dec!(5), 0, "user_3"),
        ];
        assert_eq!(
            rollup_chunked(&books, &entries, usize::MAX),
            [
                BalanceSnapshot {
                    book_id: "book1".into(),
                    date: day(1),
                    balance: dec!(1030),
                    daily_change: dec!(30),
                    total_journals: 2,
                    last_updated_by: "user_2".into(),
                },
                BalanceSnapshot {
                    book_id: "book2".into(),
                    date: day(2),
                    balance: dec!(2005),
                    daily_change: dec!(5),
                    total_journals: 1,
                    last_updated_by: "user_3".into(),
                },
            ]
        );
    }

    #[test]
    fn group_split_across_chunks() {
        let books = [book("b", dec!(100))];
        let entries = [
            entry("b", day(1), 1, dec!(10), 0, "user_1"),
            entry("b", day(2), 2, dec!(1), 0, "user_1"),
            entry("b", day(2), 3, dec!(2), 1, "user_2"),
            entry("b", day(2), 4, dec!(4), 2, "user_3"),
            entry("b", day(3), 5, dec!(-7), 0, "user_4"),
        ];
        // chunk size 2 cuts day 2 into [1] + [2, 4]
        let snapshots = rollup_chunked(&books, &entries, 2);
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[1].date, day(2));
        assert_eq!(snapshots[1].daily_change, dec!(7));
        assert_eq!(snapshots[1].total_journals, 3);
        assert_eq!(snapshots[1].balance, dec!(117));
        assert_eq!(snapshots[1].last_updated_by, "user_3");
        assert_eq!(snapshots[2].balance, dec!(110));
    }

    #[test]
    fn interleaved_groups_are_merged() {
        let books = [book("a", dec!(0)), book("b", dec!(0))];
        let entries = [
            entry("b", day(2), 1, dec!(3), 0, "user_1"),
            entry("a", day(1), 2, dec!(1), 0, "user_1"),
            entry("b", day(1), 3, dec!(5), 0, "user_1"),
            entry("b", day(2), 4, dec!(3), 0, "user_1"),
        ];
        let snapshots = rollup_chunked(&books, &entries, 1);
        let keys: Vec<_> = snapshots
            .iter()
            .map(|s| (s.book_id.as_str(), s.date, s.balance))
            .collect();
        assert_eq!(
            keys,
            [
                ("a", day(1), dec!(1)),
                ("b", day(1), dec!(5)),
                ("b", day(2), dec!(11)),
            ]
        );
    }

    #[test]
    fn chunk_size_does_not_change_balances() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let registry = RegistryConfig {
            books: 3,
            ..RegistryConfig::default()
        };
        let journal = JournalConfig {
            start_date: day(1),
            end_date: day(6),
            entries_per_day_mean: 5.0,
            entries_per_day_std_dev: 3.0,
            ..JournalConfig::default()
        };
        let books = generate_books(&registry, &mut rng).unwrap();
        let model = SynthesisModel::new(&journal).unwrap();
        let mut counter = DocumentCounter::starting_at(1);
        let entries: Vec<_> = JournalSynthesizer::new(&books, &model, &mut counter, &mut rng)
            .collect::<Result<_, _>>()
            .unwrap();

        let unbounded = rollup_chunked(&books, &entries, usize::MAX);
        assert_eq!(rollup_chunked(&books, &entries, 1), unbounded);
        assert_eq!(rollup_chunked(&books, &entries, 7), unbounded);
        let mut batched = Rollup::new(&books, UnknownBookPolicy::Reject);
        for batch in in_batches(entries.iter().cloned(), 13) {
            batched.use_chunk(&batch).unwrap();
        }
        assert_eq!(batched.finish(), unbounded);

        for book in &books {
            let total: Decimal = entries
                .iter()
                .filter(|e| e.book_id == book.book_id)
                .map(|e| e.value)
                .sum();
            let last = unbounded.iter().rev().find(|s| s.book_id == book.book_id).unwrap();
            assert_eq!(last.balance, book.opening_balance + total);
        }
        let count: u64 = unbounded.iter().map(|s| s.total_journals).sum();
        assert_eq!(count, entries.len() as u64);
    }

    #[test]
    fn last_poster_tie_breaks_on_document_number() {
        let books = [book("b", dec!(0))];
        let entries = [
            entry("b", day(1), 4, dec!(1), 30, "late_low"),
            entry("b", day(1), 9, dec!(1), 30, "late_high"),
            entry("b", day(1), 12, dec!(1), 10, "early"),
        ];
        let snapshots = rollup_chunked(&books, &entries, 1);
        assert_eq!(snapshots[0].last_updated_by, "late_high");
    }

    #[test]
    fn book_without_entries_has_no_snapshot() {
        let books = [book("busy", dec!(1)), book("idle", dec!(2))];
        let entries = [entry("busy", day(1), 1, dec!(1), 0, "user_1")];
        let snapshots = rollup_chunked(&books, &entries, 10);
        assert!(snapshots.iter().all(|s| s.book_id == "busy"));
    }

    #[test]
    fn unknown_book_rejected() {
        let books = [book("known", dec!(1))];
        let mut rollup = Rollup::new(&books, UnknownBookPolicy::Reject);
        assert_eq!(
            rollup.use_entry(&entry("ghost", day(1), 1, dec!(5), 0, "user_1")),
            Err(Error::UnknownBook {
                book: "ghost".into(),
                document: "DOC20240101001".into(),
            })
        );
        assert_eq!(rollup.pending_groups(), 0);
    }

    #[test]
    fn unknown_book_auto_registered() {
        let books = [book("known", dec!(1))];
        let mut rollup = Rollup::new(&books, UnknownBookPolicy::AutoRegister);
        rollup
            .use_entry(&entry("ghost", day(1), 1, dec!(5), 0, "user_1"))
            .unwrap();
        let snapshots = rollup.finish();
        assert_eq!(snapshots[0].book_id, "ghost");
        assert_eq!(snapshots[0].balance, dec!(5));
    }

    #[test]
    fn duplicate_document_rejected() {
        let books = [book("b", dec!(0))];
        let mut rollup = Rollup::new(&books, UnknownBookPolicy::Reject);
        rollup
            .use_entry(&entry("b", day(1), 1, dec!(5), 0, "user_1"))
            .unwrap();
        assert_eq!(
            rollup.use_entry(&entry("b", day(1), 1, dec!(5), 0, "user_1")),
            Err(Error::DuplicateDocument("DOC20240101001".into()))
        );
    }

    #[test]
    fn reused_sequence_rejected() {
        let books = [book("b", dec!(0))];
        let mut rollup = Rollup::new(&books, UnknownBookPolicy::Reject);
        rollup
            .use_entry(&entry("b", day(2), 5, dec!(5), 0, "user_1"))
            .unwrap();
        assert_eq!(
            rollup.use_entry(&entry("b", day(1), 5, dec!(5), 0, "user_1")),
            Err(Error::DocumentOutOfOrder {
                previous: "DOC20240102005".into(),
                document: "DOC20240101005".into(),
            })
        );
        assert_eq!(
            rollup.use_entry(&entry("b", day(3), 3, dec!(5), 0, "user_1")),
            Err(Error::DocumentOutOfOrder {
                previous: "DOC20240102005".into(),
                document: "DOC20240103003".into(),
            })
        );
    }

    #[test]
    fn reconcile_detects_drift() {
        let books = [book("a", dec!(100)), book("b", dec!(50)), book("c", dec!(7))];
        let entries = [
            entry("a", day(1), 1, dec!(10), 0, "user_1"),
            entry("a", day(2), 2, dec!(-3), 0, "user_1"),
            entry("b", day(1), 3, dec!(1), 0, "user_1"),
        ];
        let snapshots = rollup_chunked(&books, &entries, 2);
        let mut totals = HashMap::from([("a".to_string(), dec!(7)), ("b".to_string(), dec!(1))]);
        assert_eq!(reconcile(&books, &totals, &snapshots), Ok(()));

        totals.insert("b".into(), dec!(2));
        assert_eq!(
            reconcile(&books, &totals, &snapshots),
            Err(Error::BalanceDrift {
                book: "b".into(),
                expected: dec!(52),
                actual: dec!(51),
            })
        );
    }
}
