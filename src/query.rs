//! Read-only query surface over the ledger store, for reporting tools that
//! only see the finished tables.

use anyhow::{bail, Result};
use rusqlite::{types::ValueRef, Connection};
use serde_json::{json, Value};

pub(crate) const NO_RESULTS: &str = "The query returned no results.";

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::from(b.to_vec()),
    }
}

fn fetch(conn: &Connection, sql: &str) -> Result<Option<Value>> {
    let mut stmt = conn.prepare(sql)?;
    if !stmt.readonly() {
        bail!("only read-only statements are accepted");
    }
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query([])?;
    let mut data = Vec::new();
    while let Some(row) = rows.next()? {
        let values = (0..columns.len())
            .map(|i| row.get_ref(i).map(to_json))
            .collect::<Result<Vec<_>, _>>()?;
        data.push(Value::Array(values));
    }
    if data.is_empty() {
        return Ok(None);
    }
    Ok(Some(json!({ "columns": columns, "data": data })))
}

/// Runs `sql` and returns `{"columns": [...], "data": [[...], ...]}`, the
/// string `NO_RESULTS` when no row matched, or `{"error", "query"}` when the
/// statement failed.
pub(crate) fn run_query(conn: &Connection, sql: &str) -> Value {
    match fetch(conn, sql) {
        Ok(Some(frame)) => frame,
        Ok(None) => Value::from(NO_RESULTS),
        Err(e) => {
            tracing::debug!(query = sql, "query failed: {e:#}");
            json!({ "error": format!("{e:#}"), "query": sql })
        }
    }
}

fn strings(conn: &Connection, sql: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let values = stmt
        .query_map([], |row| row.get::<_, Option<String>>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(values.into_iter().flatten().collect())
}

/// Describes every table with its columns, followed by the transaction
/// types, currencies and years present in the journal.
pub(crate) fn schema_info(conn: &Connection) -> Result<String> {
    let tables = strings(
        conn,
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let mut info = String::new();
    let mut columns_stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1)")?;
    for table in &tables {
        let columns = columns_stmt
            .query_map([table], |row| {
                Ok(format!("{}: {}", row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        info.push_str(&format!("Table {table} Schema: Columns: {}\n", columns.join(", ")));
    }
    let transaction_types = strings(conn, "SELECT DISTINCT transaction_type FROM journal ORDER BY 1")?;
    let currencies = strings(conn, "SELECT DISTINCT currency FROM journal ORDER BY 1")?;
    let years = strings(conn, "SELECT DISTINCT substr(entry_date, 1, 4) FROM journal ORDER BY 1")?;
    info.push_str(&format!("Transaction Types: {}\n", transaction_types.join(", ")));
    info.push_str(&format!("Currencies: {}\n", currencies.join(", ")));
    info.push_str(&format!("Years: {}\n", years.join(", ")));
    Ok(info)
}
