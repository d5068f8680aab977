use serde::Serialize;

pub(crate) const BOOK_HEADER: [&str; 6] = [
    "book_id",
    "book_name",
    "cost_center",
    "system_entity",
    "system",
    "opening_balance",
];

pub(crate) const JOURNAL_HEADER: [&str; 16] = [
    "book_id",
    "book_name",
    "cost_center",
    "currency",
    "value",
    "entry_date",
    "posting_date",
    "username",
    "document_number",
    "transaction_type",
    "posted_by",
    "approved_by",
    "created_ts",
    "updated_ts",
    "source_system",
    "remarks",
];

pub(crate) const BALANCE_HEADER: [&str; 6] = [
    "book_id",
    "date",
    "balance",
    "daily_change",
    "total_journals",
    "last_updated_by",
];

/// Basic CSV exporter. The header is written up front so that an empty table
/// still gets one, and fields are never quoted: values must not contain commas.
pub(crate) struct CsvSink<W: std::io::Write> {
    wtr: csv::Writer<W>,
}

impl<W: std::io::Write> CsvSink<W> {
    pub fn new(writer: W, header: &[&str]) -> Result<Self, anyhow::Error> {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .quote_style(csv::QuoteStyle::Never)
            .from_writer(writer);
        wtr.write_record(header)?;
        Ok(Self { wtr })
    }

    pub fn write_rows<'a, T: Serialize + 'a>(
        &mut self,
        rows: impl IntoIterator<Item = &'a T>,
    ) -> Result<(), anyhow::Error> {
        for row in rows {
            self.wtr.serialize(row)?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), anyhow::Error> {
        self.wtr.flush()?;
        Ok(())
    }
}

/// Writes a whole table in one go.
pub(crate) fn write_table<W: std::io::Write, T: Serialize>(
    writer: W,
    header: &[&str],
    rows: &[T],
) -> Result<(), anyhow::Error> {
    let mut sink = CsvSink::new(writer, header)?;
    sink.write_rows(rows)?;
    sink.finish()
}
