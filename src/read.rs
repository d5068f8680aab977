use crate::{
    data::{Book, Error, JournalEntry},
    synth::in_batches,
};
use anyhow::Context;

/// Trait for doing something with `JournalEntry`s read back from a sink (CSV
/// file or SQLite table). Used by the rollup to aggregate entries, but also by
/// mock tests to check what a reader delivers and in which chunks.
pub(crate) trait EntryUser {
    fn use_entry(&mut self, entry: &JournalEntry) -> Result<(), Error>;

    /// Receives one chunk of the stream; chunk boundaries carry no meaning
    /// beyond memory usage.
    fn use_chunk(&mut self, chunk: &[JournalEntry]) -> Result<(), Error> {
        chunk.iter().try_for_each(|entry| self.use_entry(entry))
    }
}

/// CSV importer for the journal, delivering entries in chunks of at most
/// `chunk_size`. Returns the number of entries read.
pub(crate) fn read_journal<R: std::io::Read, U: EntryUser>(
    reader: R,
    chunk_size: usize,
    user: &mut U,
) -> Result<u64, anyhow::Error> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut count = 0;
    for (n, chunk) in in_batches(rdr.deserialize::<JournalEntry>(), chunk_size).enumerate() {
        let chunk = chunk
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Malformed journal row in chunk {n}"))?;
        user.use_chunk(&chunk)?;
        count += chunk.len() as u64;
        tracing::debug!(chunk = n, entries = chunk.len(), "journal chunk read");
    }
    Ok(count)
}

/// CSV importer for the book registry.
pub(crate) fn read_books<R: std::io::Read>(reader: R) -> Result<Vec<Book>, anyhow::Error> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let books = rdr
        .deserialize()
        .collect::<Result<Vec<Book>, _>>()
        .context("Malformed book row")?;
    Ok(books)
}
