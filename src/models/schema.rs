//! Schema-related data models.
//!
//! Plain data shared by the schema model, the introspector and the API
//! projection. Invariants between these values are enforced by
//! [`CanonicalSchemaModel`](crate::schema::CanonicalSchemaModel), not here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Schema used when a table name arrives without one.
pub const DEFAULT_SCHEMA: &str = "public";

pub(crate) fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

/// Identity of a table: the `(schema, name)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// A table in the default `public` schema.
    pub fn public(name: impl Into<String>) -> Self {
        Self::new(DEFAULT_SCHEMA, name)
    }

    /// Parse user input of the form `schema.name` or `name`.
    ///
    /// # Examples
    ///
    /// ```
    /// use schemasense_core::models::TableRef;
    ///
    /// assert_eq!(TableRef::parse("sales.orders"), TableRef::new("sales", "orders"));
    /// assert_eq!(TableRef::parse("orders"), TableRef::public("orders"));
    /// ```
    pub fn parse(qualified: &str) -> Self {
        match qualified.split_once('.') {
            Some((schema, name)) => Self::new(schema, name),
            None => Self::public(qualified),
        }
    }

    /// The `schema.name` string form.
    pub fn qualified_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

fn default_nullable() -> bool {
    true
}

/// A column as the schema model tracks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub is_pk: bool,
    #[serde(default)]
    pub is_fk: bool,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

impl Column {
    /// A nullable, non-key column.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_pk: false,
            is_fk: false,
            nullable: true,
        }
    }

    /// Mark the column as part of the primary key.
    pub fn primary_key(mut self) -> Self {
        self.is_pk = true;
        self
    }

    /// Mark the column `NOT NULL`.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub schema: String,
    pub name: String,
    /// Declaration order; drives DDL column order.
    pub columns: Vec<Column>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<i64>,
}

impl Table {
    pub fn new(table: &TableRef, columns: Vec<Column>) -> Self {
        Self {
            schema: table.schema.clone(),
            name: table.name.clone(),
            columns,
            row_count: None,
        }
    }

    pub fn table_ref(&self) -> TableRef {
        TableRef::new(&self.schema, &self.name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Primary key column names in declaration order.
    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_pk)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// A single-column foreign key edge between two tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Relationship {
    pub from: TableRef,
    pub from_column: String,
    pub to: TableRef,
    pub to_column: String,
}

impl Relationship {
    pub fn new(
        from: TableRef,
        from_column: impl Into<String>,
        to: TableRef,
        to_column: impl Into<String>,
    ) -> Self {
        Self {
            from,
            from_column: from_column.into(),
            to,
            to_column: to_column.into(),
        }
    }

    /// Constraint name used in generated DDL: `<table>_<column>_fkey`.
    pub fn constraint_name(&self) -> String {
        format!("{}_{}_fkey", self.from.name, self.from_column)
    }

    pub fn touches_table(&self, table: &TableRef) -> bool {
        self.from == *table || self.to == *table
    }

    pub fn touches_column(&self, table: &TableRef, column: &str) -> bool {
        (self.from == *table && self.from_column == column)
            || (self.to == *table && self.to_column == column)
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.from, self.from_column, self.to, self.to_column
        )
    }
}

// =============================================================================
// API document
// =============================================================================

/// Flat projection of the schema for external consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDocument {
    pub tables: Vec<TableDocument>,
    pub relationships: Vec<RelationshipDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDocument {
    pub schema: String,
    pub name: String,
    pub columns: Vec<Column>,
    pub row_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDocument {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

impl From<&Relationship> for RelationshipDocument {
    fn from(rel: &Relationship) -> Self {
        Self {
            from_table: rel.from.qualified_name(),
            from_column: rel.from_column.clone(),
            to_table: rel.to.qualified_name(),
            to_column: rel.to_column.clone(),
        }
    }
}

// =============================================================================
// Introspection facts
// =============================================================================

/// One row of column facts, in ordinal position order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFact {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub data_type: String,
    /// Catalog nullability string, `YES` or `NO`.
    pub is_nullable: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKeyFact {
    pub schema: String,
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyFact {
    pub from_schema: String,
    pub from_table: String,
    pub from_column: String,
    pub to_schema: String,
    pub to_table: String,
    pub to_column: String,
}

/// Raw catalog facts as read by the introspector.
#[derive(Debug, Clone, Default)]
pub struct IntrospectionFacts {
    pub columns: Vec<ColumnFact>,
    pub primary_keys: Vec<PrimaryKeyFact>,
    pub foreign_keys: Vec<ForeignKeyFact>,
    pub row_counts: Option<HashMap<TableRef, i64>>,
}
