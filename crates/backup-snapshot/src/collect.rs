//! Relational-store collection
//!
//! Dumps every configured domain table via a dynamic `SELECT *`,
//! converting rows to flat JSON records. Each table is collected
//! independently; a failing table degrades to an empty set so one broken
//! table cannot sink the whole snapshot.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tracing::{debug, warn};

use backup_core::{JsonMap, DOMAIN_TABLES};

/// Collect every domain table into the snapshot data map.
pub async fn collect_tables(pool: &SqlitePool, warnings: &mut Vec<String>) -> JsonMap {
    let mut data = JsonMap::new();
    for table in DOMAIN_TABLES {
        match dump_table(pool, table).await {
            Ok(records) => {
                debug!(table, records = records.len(), "table collected");
                data.insert(table.to_string(), Value::Array(records));
            }
            Err(err) => {
                warn!(table, error = %err, "table collection failed, storing empty set");
                warnings.push(format!("table {table} could not be read: {err}"));
                data.insert(table.to_string(), Value::Array(Vec::new()));
            }
        }
    }
    data
}

async fn dump_table(pool: &SqlitePool, table: &str) -> Result<Vec<Value>, sqlx::Error> {
    // Table names come from the fixed domain list, never from input.
    let sql = format!("SELECT * FROM {table}");
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    Ok(rows.iter().map(row_to_json).collect())
}

/// Convert one row into a flat JSON record.
pub fn row_to_json(row: &SqliteRow) -> Value {
    let mut record = Map::new();
    for column in row.columns() {
        record.insert(
            column.name().to_string(),
            column_to_json(row, column.ordinal()),
        );
    }
    Value::Object(record)
}

/// Decode one column by its declared type, with a fallback chain for
/// loosely typed columns. BLOBs become base64 text so the record stays
/// valid JSON.
fn column_to_json(row: &SqliteRow, ordinal: usize) -> Value {
    let type_name = match row.try_get_raw(ordinal) {
        Ok(raw) => {
            if raw.is_null() {
                return Value::Null;
            }
            raw.type_info().name().to_ascii_uppercase()
        }
        Err(_) => return Value::Null,
    };

    match type_name.as_str() {
        "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => row
            .try_get::<i64, _>(ordinal)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" | "DOUBLE" | "FLOAT" => row
            .try_get::<f64, _>(ordinal)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "TEXT" | "DATETIME" | "DATE" => row
            .try_get::<String, _>(ordinal)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(ordinal)
            .map(|bytes| Value::String(BASE64.encode(bytes)))
            .unwrap_or(Value::Null),
        // NUMERIC and anything else: integer, float, then text.
        _ => row
            .try_get::<i64, _>(ordinal)
            .map(Value::from)
            .or_else(|_| row.try_get::<f64, _>(ordinal).map(Value::from))
            .or_else(|_| row.try_get::<String, _>(ordinal).map(Value::from))
            .unwrap_or(Value::Null),
    }
}
