//! schemasense core library
//!
//! A canonical model of a PostgreSQL schema, an allowlist SQL validator, a
//! transactional DDL executor and a quota-checked tenant provisioner.
//!
//! - [`schema`]: the model, its DDL round-trip, edit actions and cache
//! - [`tools`]: SQL validation and normalization
//! - [`db`]: introspection, DDL execution, row insertion
//! - [`provision`]: tenant databases, roles and credential rotation

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod provision;
pub mod schema;
pub mod tools;

pub use config::Config;
pub use error::{SchemaError, SchemaResult};
pub use schema::{CanonicalSchemaModel, SchemaCache};
