//! Data models for the schema core.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod provision;
pub mod schema;

// Re-export commonly used types
pub use connection::{ConnectionDescriptor, DEFAULT_PG_HOST, DEFAULT_PG_PORT, redact_dsn};
pub use provision::{
    NewProvisionRecord, ProvisionMode, ProvisionStatus, ProvisionedDatabase, RecordLookup,
};
pub use schema::{
    Column, ColumnFact, DEFAULT_SCHEMA, ForeignKeyFact, IntrospectionFacts, PrimaryKeyFact,
    Relationship, RelationshipDocument, SchemaDocument, Table, TableDocument, TableRef,
};
