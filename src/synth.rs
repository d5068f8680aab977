use crate::{
    config::JournalConfig,
    data::{Book, DocumentNumber, Error, JournalEntry, TransactionType},
};
use chrono::{Duration, NaiveDate, NaiveTime};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rust_decimal::Decimal;

/// Document counter owned by one run. Every journal entry takes exactly one
/// number, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DocumentCounter {
    next: u64,
}

impl DocumentCounter {
    pub fn starting_at(first: u64) -> Self {
        Self { next: first }
    }

    /// Number the next issued document will get.
    pub fn peek(&self) -> u64 {
        self.next
    }

    pub fn issue(&mut self) -> Result<u64, Error> {
        let seq = self.next;
        self.next = seq.checked_add(1).ok_or(Error::CounterExhausted(seq))?;
        Ok(seq)
    }
}

/// Random model of the journal: entries per day, daily volatility, and the
/// vocabularies every entry draws from.
#[derive(Debug, Clone)]
pub(crate) struct SynthesisModel<'c> {
    config: &'c JournalConfig,
    entries_per_day: Normal<f64>,
    volatility: Normal<f64>,
}

impl<'c> SynthesisModel<'c> {
    pub fn new(config: &'c JournalConfig) -> Result<Self, Error> {
        config.validate()?;
        let entries_per_day = Normal::new(config.entries_per_day_mean, config.entries_per_day_std_dev)
            .map_err(|e| Error::Config {
                param: "journal.entries_per_day_std_dev",
                reason: e.to_string(),
            })?;
        let volatility = Normal::new(config.volatility_mean, config.volatility_std_dev).map_err(|e| {
            Error::Config {
                param: "journal.volatility_std_dev",
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            config,
            entries_per_day,
            volatility,
        })
    }

    fn entries_per_day<R: Rng>(&self, rng: &mut R) -> usize {
        (self.entries_per_day.sample(rng) as i64).max(1) as usize
    }

    fn pick<'v, R: Rng>(vocabulary: &'v [String], rng: &mut R) -> &'v str {
        &vocabulary[rng.gen_range(0..vocabulary.len())]
    }

    fn entry<R: Rng>(
        &self,
        book: &Book,
        date: NaiveDate,
        volatility: f64,
        seq: u64,
        rng: &mut R,
    ) -> JournalEntry {
        let config = self.config;
        let value = rng.gen_range(config.value_min..config.value_max) * volatility;
        let created_ts = date.and_time(NaiveTime::MIN)
            + Duration::minutes(rng.gen_range(0..=23) * 60 + rng.gen_range(0..=59));
        let updated_ts = created_ts + Duration::minutes(rng.gen_range(1..=90));
        JournalEntry {
            book_id: book.book_id.clone(),
            book_name: book.book_name.clone(),
            cost_center: book.cost_center.clone(),
            currency: config.currency.clone(),
            value: Decimal::from(value.trunc() as i64),
            entry_date: date,
            posting_date: date + Duration::days(rng.gen_range(0..=2)),
            username: format!("user_{}", rng.gen_range(1..=50)),
            document_number: DocumentNumber::new(date, seq),
            transaction_type: TransactionType::ALL[rng.gen_range(0..TransactionType::ALL.len())],
            posted_by: format!("user_{}", rng.gen_range(1..=20)),
            approved_by: if rng.gen_bool(config.unapproved_ratio) {
                None
            } else {
                Some(format!("manager_{}", rng.gen_range(1..=5)))
            },
            created_ts,
            updated_ts,
            source_system: Self::pick(&config.source_systems, rng).to_string(),
            remarks: Self::pick(&config.remarks, rng).to_string(),
        }
    }
}

/// Lazy journal stream: every book, then every day of the range, then every
/// entry of that day. The sequence is finite and can't be restarted; a second
/// pass needs a fresh counter and random state. An exhausted counter ends the
/// stream with its error.
pub(crate) struct JournalSynthesizer<'a, R> {
    books: &'a [Book],
    model: &'a SynthesisModel<'a>,
    counter: &'a mut DocumentCounter,
    rng: &'a mut R,
    day: Option<(usize, NaiveDate)>,
    remaining: usize,
    volatility: f64,
    done: bool,
}

impl<'a, R: Rng> JournalSynthesizer<'a, R> {
    pub fn new(
        books: &'a [Book],
        model: &'a SynthesisModel<'a>,
        counter: &'a mut DocumentCounter,
        rng: &'a mut R,
    ) -> Self {
        Self {
            books,
            model,
            counter,
            rng,
            day: None,
            remaining: 0,
            volatility: 1.0,
            done: false,
        }
    }

    fn next_day(&self) -> Option<(usize, NaiveDate)> {
        let (start, end) = (self.model.config.start_date, self.model.config.end_date);
        let (book, date) = match self.day {
            None => (0, start),
            Some((book, date)) => match date.succ_opt() {
                Some(next) if next <= end => (book, next),
                _ => (book + 1, start),
            },
        };
        (book < self.books.len() && date <= end).then_some((book, date))
    }
}

impl<'a, R: Rng> Iterator for JournalSynthesizer<'a, R> {
    type Item = Result<JournalEntry, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining == 0 {
            if self.done {
                return None;
            }
            match self.next_day() {
                Some(day) => {
                    self.day = Some(day);
                    self.remaining = self.model.entries_per_day(self.rng);
                    self.volatility = self.model.volatility.sample(self.rng);
                }
                None => self.done = true,
            }
        }
        let (book, date) = self.day?;
        self.remaining -= 1;
        let seq = match self.counter.issue() {
            Ok(seq) => seq,
            Err(e) => {
                self.remaining = 0;
                self.done = true;
                return Some(Err(e));
            }
        };
        Some(Ok(self
            .model
            .entry(&self.books[book], date, self.volatility, seq, self.rng)))
    }
}

/// Splits a stream into vectors of at most `size` items, so that only one
/// batch is held in memory at a time.
pub(crate) fn in_batches<I: Iterator>(mut iter: I, size: usize) -> impl Iterator<Item = Vec<I::Item>> {
    let size = size.max(1);
    std::iter::from_fn(move || {
        let batch: Vec<_> = iter.by_ref().take(size).collect();
        (!batch.is_empty()).then_some(batch)
    })
}
