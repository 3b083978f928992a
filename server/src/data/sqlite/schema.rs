//! SQLite schema definitions
//!
//! Every collection is a table of `(id, time, size, document)`. Capping is an
//! `AFTER INSERT` trigger with the limits baked in at creation, and the
//! collections table remembers those limits so a repeated create is a no-op.

use crate::core::constants::SQLITE_COLLECTIONS_TABLE;
use crate::data::types::CappedLimits;

/// Metadata table recording the options every collection was created with
pub fn collections_table_sql() -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS {SQLITE_COLLECTIONS_TABLE} (
    name TEXT PRIMARY KEY,
    capped INTEGER NOT NULL,
    size INTEGER,
    max INTEGER,
    options TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
)"#
    )
}

pub fn select_limits_sql() -> String {
    format!("SELECT size, max FROM {SQLITE_COLLECTIONS_TABLE} WHERE name = ?")
}

pub fn insert_collection_sql() -> String {
    format!(
        "INSERT OR IGNORE INTO {SQLITE_COLLECTIONS_TABLE} (name, capped, size, max, options) \
         VALUES (?, ?, ?, ?, ?)"
    )
}

/// Quote an identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Table holding one collection's documents
pub fn create_collection_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    time INTEGER,
    size INTEGER NOT NULL,
    document TEXT NOT NULL
)"
    )
}

/// Trigger evicting the oldest rows beyond `max` documents or `size` bytes
///
/// Returns `None` when the collection has no limits.
pub fn capped_trigger_sql(collection: &str, limits: &CappedLimits) -> Option<String> {
    let table = quote_ident(collection);
    let mut body = Vec::new();

    if let Some(max) = limits.max {
        body.push(format!(
            "DELETE FROM {table} WHERE id <= NEW.id - {};",
            clamp_i64(max)
        ));
    }
    if let Some(size) = limits.size {
        body.push(format!(
            "DELETE FROM {table} WHERE id IN (\
             SELECT id FROM (SELECT id, SUM(size) OVER (ORDER BY id DESC) AS running FROM {table}) \
             WHERE running > {});",
            clamp_i64(size)
        ));
    }
    if body.is_empty() {
        return None;
    }

    let trigger = quote_ident(&format!("{collection}__capped"));
    Some(format!(
        "CREATE TRIGGER IF NOT EXISTS {trigger} AFTER INSERT ON {table} BEGIN {} END",
        body.join(" ")
    ))
}

pub fn insert_document_sql(table: &str) -> String {
    format!("INSERT INTO {table} (time, size, document) VALUES (?, ?, ?)")
}

/// SQLite integers are signed 64-bit
pub fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
