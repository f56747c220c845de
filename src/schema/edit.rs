//! Structural edit actions.
//!
//! Each variant carries its own parameter struct. The same value drives the
//! model mutation ([`EditAction::apply`]) and DDL generation
//! ([`generate_ddl_from_action`](crate::db::ddl::generate_ddl_from_action)),
//! so the in-memory model and the executed DDL cannot drift apart.
//!
//! Actions deserialize from tagged JSON:
//!
//! ```
//! use schemasense_core::schema::EditAction;
//!
//! let action: EditAction = serde_json::from_str(
//!     r#"{"type": "rename_column", "table": "users", "old_name": "mail", "new_name": "email"}"#,
//! )
//! .unwrap();
//! assert_eq!(action.kind(), "rename_column");
//! ```

use crate::error::SchemaResult;
use crate::models::schema::default_schema;
use crate::models::{Column, TableRef};
use crate::schema::model::CanonicalSchemaModel;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTable {
    pub name: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default)]
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameTable {
    pub old_name: String,
    pub new_name: String,
    #[serde(default = "default_schema")]
    pub schema: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropTable {
    pub name: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddColumn {
    pub table: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    pub column: Column,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameColumn {
    pub table: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropColumn {
    pub table: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    pub column: String,
    #[serde(default)]
    pub force: bool,
}

/// Endpoints of a relationship, used by both add and remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipEndpoints {
    pub from_table: String,
    #[serde(default = "default_schema")]
    pub from_schema: String,
    pub from_column: String,
    pub to_table: String,
    #[serde(default = "default_schema")]
    pub to_schema: String,
    pub to_column: String,
}

impl RelationshipEndpoints {
    pub fn from_ref(&self) -> TableRef {
        TableRef::new(&self.from_schema, &self.from_table)
    }

    pub fn to_ref(&self) -> TableRef {
        TableRef::new(&self.to_schema, &self.to_table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EditAction {
    AddTable(AddTable),
    RenameTable(RenameTable),
    DropTable(DropTable),
    AddColumn(AddColumn),
    RenameColumn(RenameColumn),
    DropColumn(DropColumn),
    AddRelationship(RelationshipEndpoints),
    RemoveRelationship(RelationshipEndpoints),
}

impl EditAction {
    /// The action's tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AddTable(_) => "add_table",
            Self::RenameTable(_) => "rename_table",
            Self::DropTable(_) => "drop_table",
            Self::AddColumn(_) => "add_column",
            Self::RenameColumn(_) => "rename_column",
            Self::DropColumn(_) => "drop_column",
            Self::AddRelationship(_) => "add_relationship",
            Self::RemoveRelationship(_) => "remove_relationship",
        }
    }

    /// Apply the action to a model through the mutation API.
    pub fn apply(&self, model: &mut CanonicalSchemaModel) -> SchemaResult<()> {
        match self {
            Self::AddTable(p) => {
                model.add_table(TableRef::new(&p.schema, &p.name), p.columns.clone())
            }
            Self::RenameTable(p) => {
                model.rename_table(&TableRef::new(&p.schema, &p.old_name), &p.new_name)
            }
            Self::DropTable(p) => model.drop_table(&TableRef::new(&p.schema, &p.name), p.force),
            Self::AddColumn(p) => {
                model.add_column(&TableRef::new(&p.schema, &p.table), p.column.clone())
            }
            Self::RenameColumn(p) => model.rename_column(
                &TableRef::new(&p.schema, &p.table),
                &p.old_name,
                &p.new_name,
            ),
            Self::DropColumn(p) => {
                model.drop_column(&TableRef::new(&p.schema, &p.table), &p.column, p.force)
            }
            Self::AddRelationship(p) => {
                model.add_relationship(&p.from_ref(), &p.from_column, &p.to_ref(), &p.to_column)
            }
            Self::RemoveRelationship(p) => model.remove_relationship(
                &p.from_ref(),
                &p.from_column,
                &p.to_ref(),
                &p.to_column,
            ),
        }
    }
}
