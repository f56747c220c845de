//! Database access.
//!
//! This module provides:
//! - Catalog introspection
//! - DDL generation and transactional execution
//! - Row insertion
//! - The active connection context

pub mod context;
pub mod data;
pub mod ddl;
pub mod introspect;

pub use context::DatabaseContext;
pub use data::{InsertOutcome, JsonRow, RowError, insert_rows};
pub use ddl::{
    AppliedChange, apply_ddl_script, apply_edit_actions, execute_ddl_statements, execute_ddl_text,
    generate_ddl_from_action, plan_edit_actions,
};
pub use introspect::{CatalogIntrospector, CatalogSource};
