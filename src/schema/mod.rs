//! Canonical schema model and everything that builds, edits or caches it.

pub mod cache;
mod ddl_parser;
pub mod edit;
pub mod ident;
pub mod model;
pub mod types;

pub use cache::SchemaCache;
pub use edit::{
    AddColumn, AddTable, DropColumn, DropTable, EditAction, RelationshipEndpoints, RenameColumn,
    RenameTable,
};
pub use ident::{display_ident, quote_ident, quote_qualified};
pub use model::CanonicalSchemaModel;
