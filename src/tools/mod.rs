//! Operator-facing tools built on the schema model.
//!
//! - `sql_validator`: allowlist validation and normalization of free-form SQL

pub mod sql_validator;

pub use sql_validator::{
    StatementKind, ValidatedSql, ValidatedStatement, validate_and_normalize_sql,
};
