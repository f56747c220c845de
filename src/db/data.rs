//! Row insertion into known tables.

use crate::error::{SchemaError, SchemaResult};
use crate::models::{Table, TableRef};
use crate::schema::types::is_valid_type;
use crate::schema::{CanonicalSchemaModel, quote_ident, quote_qualified};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::PgConnection;
use tracing::{debug, warn};

/// A single JSON object per row, keyed by column name.
pub type JsonRow = Map<String, Value>;

/// Result of an insert batch. Rows are independent: one failing row does not
/// stop the others.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InsertOutcome {
    pub rows_inserted: u64,
    pub errors: Vec<RowError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    /// Zero-based position of the row in the input.
    pub row: usize,
    pub message: String,
}

/// Insert JSON rows into `table`.
///
/// The table and every column used by any row must exist in `model`; those
/// checks run before anything is sent to the database. Values are sent as
/// text bind parameters and cast to the column's declared type server-side.
pub async fn insert_rows(
    conn: &mut PgConnection,
    model: &CanonicalSchemaModel,
    table: &TableRef,
    rows: Vec<JsonRow>,
) -> SchemaResult<InsertOutcome> {
    let target = model
        .table(table)
        .ok_or_else(|| SchemaError::not_found(format!("Table '{}' does not exist", table)))?;

    for row in &rows {
        if row.is_empty() {
            return Err(SchemaError::invalid_input("Rows must contain at least one column"));
        }
        if let Some(unknown) = row.keys().find(|k| !target.has_column(k)) {
            return Err(SchemaError::invalid_input(format!(
                "Column '{}' does not exist in table '{}'",
                unknown, table
            )));
        }
    }

    let mut outcome = InsertOutcome::default();
    for (index, row) in rows.iter().enumerate() {
        let (sql, values) = insert_statement(target, row);
        let mut query = sqlx::query(&sql);
        for value in values {
            query = query.bind(value);
        }
        match query.execute(&mut *conn).await {
            Ok(result) => outcome.rows_inserted += result.rows_affected(),
            Err(e) => {
                let err = SchemaError::from(e);
                warn!(table = %table, row = index, error = %err, "Row insert failed");
                outcome.errors.push(RowError {
                    row: index,
                    message: err.to_string(),
                });
            }
        }
    }

    debug!(
        table = %table,
        inserted = outcome.rows_inserted,
        failed = outcome.errors.len(),
        "Inserted rows"
    );
    Ok(outcome)
}

/// Build the parameterized INSERT for one row.
fn insert_statement(table: &Table, row: &JsonRow) -> (String, Vec<Option<String>>) {
    let mut columns = Vec::with_capacity(row.len());
    let mut placeholders = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());

    for (position, (name, value)) in row.iter().enumerate() {
        let placeholder = format!("${}", position + 1);
        let data_type = table.column(name).map(|c| c.data_type.as_str());
        placeholders.push(match data_type {
            Some(t) if is_valid_type(t) => format!("CAST({} AS {})", placeholder, t),
            _ => placeholder,
        });
        columns.push(quote_ident(name));
        values.push(json_to_text(value));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_qualified(&table.schema, &table.name),
        columns.join(", "),
        placeholders.join(", ")
    );
    (sql, values)
}

/// Text form of a JSON value, `None` for null.
fn json_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}
