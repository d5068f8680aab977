use crate::data::Error;
use anyhow::Context;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::Path;

/// Full configuration of a generation run. Every section falls back to the
/// defaults below, so an empty TOML file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct LedgerConfig {
    pub registry: RegistryConfig,
    pub journal: JournalConfig,
    pub rollup: RollupConfig,
    pub storage: StorageConfig,
    /// Seed of the random model; `None` draws one from OS entropy.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct RegistryConfig {
    pub books: u32,
    pub system_entities: Vec<String>,
    pub systems: Vec<String>,
    /// Opening balances are drawn from `[min, max)`.
    pub opening_balance_min: i64,
    pub opening_balance_max: i64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            books: 100,
            system_entities: ["SAP", "Oracle", "NetSuite", "Dynamics", "QuickBooks"]
                .map(String::from)
                .to_vec(),
            systems: ["SYSTEM1", "SYSTEM2", "SYSTEM3", "SYSTEM4", "SYSTEM5"]
                .map(String::from)
                .to_vec(),
            opening_balance_min: 5_000_000,
            opening_balance_max: 10_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct JournalConfig {
    /// First day of the range, inclusive.
    pub start_date: NaiveDate,
    /// Last day of the range, inclusive.
    pub end_date: NaiveDate,
    pub entries_per_day_mean: f64,
    pub entries_per_day_std_dev: f64,
    pub volatility_mean: f64,
    pub volatility_std_dev: f64,
    /// Entry values are drawn from `[min, max)` before the volatility scaling.
    pub value_min: f64,
    pub value_max: f64,
    pub currency: String,
    /// Probability that an entry carries no approver.
    pub unapproved_ratio: f64,
    pub source_systems: Vec<String>,
    pub remarks: Vec<String>,
    /// Number of entries written to the sink at once.
    pub batch_size: usize,
    /// Value of the first document counter; set it past the last number of a
    /// previous run to keep document numbers unique across runs.
    pub first_document: u64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            start_date: NaiveDate::from_ymd_opt(2023, 1, 2).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2025, 6, 5).unwrap_or_default(),
            entries_per_day_mean: 25.0,
            entries_per_day_std_dev: 25.0,
            volatility_mean: 1.0,
            volatility_std_dev: 0.05,
            value_min: -50_000.0,
            value_max: 50_000.0,
            currency: "USD".into(),
            unapproved_ratio: 0.3,
            source_systems: ["SAP-FI", "SAP-CO", "Manual Entry"]
                .map(String::from)
                .to_vec(),
            remarks: [
                "Year-end adjustment",
                "Reversal of DOC000123",
                "Cost center reallocation",
                "Audit correction",
            ]
            .map(String::from)
            .to_vec(),
            batch_size: 10_000,
            first_document: 1,
        }
    }
}

/// What to do with a journal entry whose book is not in the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum UnknownBookPolicy {
    /// Fail the run with `Error::UnknownBook`.
    #[default]
    Reject,
    /// Register the book on the fly with a zero opening balance.
    AutoRegister,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct RollupConfig {
    /// Number of journal entries read back per aggregation chunk.
    pub chunk_size: usize,
    pub unknown_books: UnknownBookPolicy,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100_000,
            unknown_books: UnknownBookPolicy::default(),
        }
    }
}

/// How a run treats rows already present in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum WriteMode {
    /// Keep existing rows: books are upserted, journal rows are appended.
    #[default]
    Upsert,
    /// Clear books, journal and balances before writing.
    Replace,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct StorageConfig {
    pub mode: WriteMode,
}

fn invalid(param: &'static str, reason: impl Into<String>) -> Error {
    Error::Config {
        param,
        reason: reason.into(),
    }
}

fn check_std_dev(param: &'static str, value: f64) -> Result<(), Error> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(param, format!("{value} is not a valid standard deviation")));
    }
    Ok(())
}

impl LedgerConfig {
    /// Reads a TOML configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse configuration {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.registry.validate()?;
        self.journal.validate()?;
        if self.rollup.chunk_size == 0 {
            return Err(invalid("rollup.chunk_size", "must be at least 1"));
        }
        Ok(())
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.books == 0 {
            return Err(invalid("registry.books", "must be at least 1"));
        }
        if self.opening_balance_min >= self.opening_balance_max {
            return Err(invalid(
                "registry.opening_balance_min",
                format!(
                    "range [{}, {}) is empty",
                    self.opening_balance_min, self.opening_balance_max
                ),
            ));
        }
        if self.system_entities.is_empty() {
            return Err(invalid("registry.system_entities", "vocabulary is empty"));
        }
        if self.systems.is_empty() {
            return Err(invalid("registry.systems", "vocabulary is empty"));
        }
        Ok(())
    }
}

impl JournalConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.end_date < self.start_date {
            return Err(invalid(
                "journal.end_date",
                format!("{} is before start date {}", self.end_date, self.start_date),
            ));
        }
        if !self.entries_per_day_mean.is_finite() {
            return Err(invalid("journal.entries_per_day_mean", "must be finite"));
        }
        check_std_dev("journal.entries_per_day_std_dev", self.entries_per_day_std_dev)?;
        if !self.volatility_mean.is_finite() {
            return Err(invalid("journal.volatility_mean", "must be finite"));
        }
        check_std_dev("journal.volatility_std_dev", self.volatility_std_dev)?;
        if !(self.value_min.is_finite() && self.value_max.is_finite())
            || self.value_min >= self.value_max
        {
            return Err(invalid(
                "journal.value_min",
                format!("range [{}, {}) is empty", self.value_min, self.value_max),
            ));
        }
        if !(0.0..=1.0).contains(&self.unapproved_ratio) {
            return Err(invalid("journal.unapproved_ratio", "must be within [0, 1]"));
        }
        if self.source_systems.is_empty() {
            return Err(invalid("journal.source_systems", "vocabulary is empty"));
        }
        if self.remarks.is_empty() {
            return Err(invalid("journal.remarks", "vocabulary is empty"));
        }
        if self.currency.is_empty() {
            return Err(invalid("journal.currency", "must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(invalid("journal.batch_size", "must be at least 1"));
        }
        if self.first_document == u64::MAX {
            return Err(invalid("journal.first_document", "leaves no room for a document"));
        }
        Ok(())
    }
}
