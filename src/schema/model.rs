//! The canonical schema model.
//!
//! [`CanonicalSchemaModel`] is the single owner of tables and relationships.
//! Every mutation validates first and only then touches state, so a failed
//! call leaves the model exactly as it was.

use crate::error::{SchemaError, SchemaResult};
use crate::models::{
    Column, IntrospectionFacts, Relationship, RelationshipDocument, SchemaDocument, Table,
    TableDocument, TableRef,
};
use crate::schema::ddl_parser;
use crate::schema::ident::display_ident;
use crate::schema::types::validate_type;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalSchemaModel {
    tables: BTreeMap<TableRef, Table>,
    relationships: Vec<Relationship>,
}

impl CanonicalSchemaModel {
    /// An empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a model from raw catalog facts.
    ///
    /// Facts are trusted as-is: relationships are taken from the catalog
    /// without re-running the mutation API checks.
    pub fn from_introspection(facts: &IntrospectionFacts) -> Self {
        let primary_keys: HashSet<(TableRef, &str)> = facts
            .primary_keys
            .iter()
            .map(|pk| (TableRef::new(&pk.schema, &pk.table), pk.column.as_str()))
            .collect();
        let foreign_keys: HashSet<(TableRef, &str)> = facts
            .foreign_keys
            .iter()
            .map(|fk| (TableRef::new(&fk.from_schema, &fk.from_table), fk.from_column.as_str()))
            .collect();

        let mut tables: BTreeMap<TableRef, Table> = BTreeMap::new();
        for fact in &facts.columns {
            let table_ref = TableRef::new(&fact.schema, &fact.table);
            let key = (table_ref.clone(), fact.column.as_str());
            let column = Column {
                name: fact.column.clone(),
                data_type: fact.data_type.clone(),
                is_pk: primary_keys.contains(&key),
                is_fk: foreign_keys.contains(&key),
                nullable: fact.is_nullable.eq_ignore_ascii_case("YES"),
            };
            tables
                .entry(table_ref)
                .or_insert_with_key(|t| Table::new(t, Vec::new()))
                .columns
                .push(column);
        }

        if let Some(row_counts) = &facts.row_counts {
            for (table_ref, count) in row_counts {
                if let Some(table) = tables.get_mut(table_ref) {
                    table.row_count = Some(*count);
                }
            }
        }

        let relationships = facts
            .foreign_keys
            .iter()
            .map(|fk| {
                Relationship::new(
                    TableRef::new(&fk.from_schema, &fk.from_table),
                    &fk.from_column,
                    TableRef::new(&fk.to_schema, &fk.to_table),
                    &fk.to_column,
                )
            })
            .collect();

        Self {
            tables,
            relationships,
        }
    }

    /// Parse a batch of `CREATE SCHEMA` / `CREATE TABLE` / `ALTER TABLE`
    /// statements into a model.
    ///
    /// # Examples
    ///
    /// ```
    /// use schemasense_core::schema::CanonicalSchemaModel;
    ///
    /// let model = CanonicalSchemaModel::from_ddl(
    ///     "CREATE TABLE users (id integer NOT NULL, CONSTRAINT users_pkey PRIMARY KEY (id));",
    /// )
    /// .unwrap();
    /// assert_eq!(model.table_count(), 1);
    /// ```
    pub fn from_ddl(text: &str) -> SchemaResult<Self> {
        ddl_parser::parse_ddl(text)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn table(&self, table: &TableRef) -> Option<&Table> {
        self.tables.get(table)
    }

    pub fn has_table(&self, table: &TableRef) -> bool {
        self.tables.contains_key(table)
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    // =========================================================================
    // Serialization
    // =========================================================================

    /// Flat projection for external consumers.
    pub fn to_dict_for_api(&self) -> SchemaDocument {
        SchemaDocument {
            tables: self
                .tables
                .values()
                .map(|t| TableDocument {
                    schema: t.schema.clone(),
                    name: t.name.clone(),
                    columns: t.columns.clone(),
                    row_count: t.row_count,
                })
                .collect(),
            relationships: self
                .relationships
                .iter()
                .map(RelationshipDocument::from)
                .collect(),
        }
    }

    /// Emit the model as DDL.
    ///
    /// Tables come in fully-qualified-name order, then one `ALTER TABLE` per
    /// relationship grouped by source table. Re-parsing the output and
    /// emitting again yields identical text.
    pub fn to_ddl(&self) -> String {
        let mut tables: Vec<&Table> = self.tables.values().collect();
        tables.sort_by_cached_key(|t| t.table_ref().qualified_name());

        let mut statements: Vec<String> = tables.into_iter().map(create_table_ddl).collect();

        let mut relationships: Vec<&Relationship> = self.relationships.iter().collect();
        relationships.sort_by_cached_key(|r| r.from.qualified_name());
        statements.extend(relationships.into_iter().map(foreign_key_ddl));

        statements.join("\n\n")
    }

    // =========================================================================
    // Table mutations
    // =========================================================================

    pub fn add_table(&mut self, table: TableRef, columns: Vec<Column>) -> SchemaResult<()> {
        if table.name.trim().is_empty() {
            return Err(SchemaError::schema_validation("Table name cannot be empty"));
        }
        if self.tables.contains_key(&table) {
            return Err(SchemaError::schema_validation(format!(
                "Table '{}' already exists",
                table
            )));
        }

        let mut seen = HashSet::new();
        for column in &columns {
            validate_column(column)?;
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaError::schema_validation(format!(
                    "Duplicate column '{}' in table '{}'",
                    column.name, table
                )));
            }
        }

        let columns = columns
            .into_iter()
            .map(|c| Column { is_fk: false, ..c })
            .collect();
        debug!(table = %table, "Adding table to schema model");
        self.tables
            .insert(table.clone(), Table::new(&table, columns));
        Ok(())
    }

    /// Rename a table within its schema, cascading into relationships.
    pub fn rename_table(&mut self, old: &TableRef, new_name: &str) -> SchemaResult<()> {
        if new_name.trim().is_empty() {
            return Err(SchemaError::schema_validation("Table name cannot be empty"));
        }
        let renamed = TableRef::new(&old.schema, new_name);
        self.require_table(old)?;
        if renamed == *old {
            return Ok(());
        }
        if self.tables.contains_key(&renamed) {
            return Err(SchemaError::schema_validation(format!(
                "Table '{}' already exists",
                renamed
            )));
        }

        if let Some(mut table) = self.tables.remove(old) {
            table.name = renamed.name.clone();
            self.tables.insert(renamed.clone(), table);
        }
        for rel in &mut self.relationships {
            if rel.from == *old {
                rel.from = renamed.clone();
            }
            if rel.to == *old {
                rel.to = renamed.clone();
            }
        }
        Ok(())
    }

    /// Drop a table.
    ///
    /// Without `force`, fails while another table still references it.
    /// With `force`, every relationship touching the table goes too.
    pub fn drop_table(&mut self, table: &TableRef, force: bool) -> SchemaResult<()> {
        self.require_table(table)?;

        let incoming: Vec<&Relationship> = self
            .relationships
            .iter()
            .filter(|r| r.to == *table && r.from != *table)
            .collect();
        if !force && !incoming.is_empty() {
            let refs: Vec<String> = incoming
                .iter()
                .map(|r| format!("{}.{}", r.from, r.from_column))
                .collect();
            return Err(SchemaError::schema_validation(format!(
                "Cannot drop table '{}': referenced by {}",
                table,
                refs.join(", ")
            )));
        }

        let (removed, kept): (Vec<Relationship>, Vec<Relationship>) = self
            .relationships
            .drain(..)
            .partition(|r| r.touches_table(table));
        self.relationships = kept;
        self.tables.remove(table);
        self.refresh_fk_flags(&removed);
        Ok(())
    }

    // =========================================================================
    // Column mutations
    // =========================================================================

    pub fn add_column(&mut self, table: &TableRef, column: Column) -> SchemaResult<()> {
        validate_column(&column)?;
        let entry = self.require_table_mut(table)?;
        if entry.has_column(&column.name) {
            return Err(SchemaError::schema_validation(format!(
                "Column '{}' already exists in table '{}'",
                column.name, table
            )));
        }
        entry.columns.push(Column {
            is_fk: false,
            ..column
        });
        Ok(())
    }

    pub fn rename_column(
        &mut self,
        table: &TableRef,
        old_name: &str,
        new_name: &str,
    ) -> SchemaResult<()> {
        if new_name.trim().is_empty() {
            return Err(SchemaError::schema_validation("Column name cannot be empty"));
        }
        let entry = self.require_table_mut(table)?;
        if !entry.has_column(old_name) {
            return Err(missing_column(old_name, table));
        }
        if old_name == new_name {
            return Ok(());
        }
        if entry.has_column(new_name) {
            return Err(SchemaError::schema_validation(format!(
                "Column '{}' already exists in table '{}'",
                new_name, table
            )));
        }
        if let Some(column) = entry.column_mut(old_name) {
            column.name = new_name.to_string();
        }

        for rel in &mut self.relationships {
            if rel.from == *table && rel.from_column == old_name {
                rel.from_column = new_name.to_string();
            }
            if rel.to == *table && rel.to_column == old_name {
                rel.to_column = new_name.to_string();
            }
        }
        Ok(())
    }

    /// Drop a column.
    ///
    /// Without `force`, fails if the column is either end of a relationship.
    pub fn drop_column(&mut self, table: &TableRef, column: &str, force: bool) -> SchemaResult<()> {
        let entry = self.require_table(table)?;
        if !entry.has_column(column) {
            return Err(missing_column(column, table));
        }

        let touching: Vec<&Relationship> = self
            .relationships
            .iter()
            .filter(|r| r.touches_column(table, column))
            .collect();
        if !force && !touching.is_empty() {
            let refs: Vec<String> = touching.iter().map(|r| r.to_string()).collect();
            return Err(SchemaError::schema_validation(format!(
                "Cannot drop column '{}.{}': used by relationships {}",
                table,
                column,
                refs.join(", ")
            )));
        }

        let (removed, kept): (Vec<Relationship>, Vec<Relationship>) = self
            .relationships
            .drain(..)
            .partition(|r| r.touches_column(table, column));
        self.relationships = kept;
        if let Some(entry) = self.tables.get_mut(table) {
            entry.columns.retain(|c| c.name != column);
        }
        self.refresh_fk_flags(&removed);
        Ok(())
    }

    // =========================================================================
    // Relationship mutations
    // =========================================================================

    pub fn add_relationship(
        &mut self,
        from: &TableRef,
        from_column: &str,
        to: &TableRef,
        to_column: &str,
    ) -> SchemaResult<()> {
        let source = self.require_table(from)?;
        if !source.has_column(from_column) {
            return Err(missing_column(from_column, from));
        }
        let target = self.require_table(to)?;
        match target.column(to_column) {
            None => return Err(missing_column(to_column, to)),
            Some(col) if !col.is_pk => {
                return Err(SchemaError::schema_validation(format!(
                    "Target column '{}.{}' must be a primary key",
                    to, to_column
                )));
            }
            Some(_) => {}
        }

        let rel = Relationship::new(from.clone(), from_column, to.clone(), to_column);
        if self.relationships.contains(&rel) {
            return Err(SchemaError::schema_validation(format!(
                "Relationship {} already exists",
                rel
            )));
        }

        if let Some(col) = self
            .tables
            .get_mut(from)
            .and_then(|t| t.column_mut(from_column))
        {
            col.is_fk = true;
        }
        self.relationships.push(rel);
        Ok(())
    }

    pub fn remove_relationship(
        &mut self,
        from: &TableRef,
        from_column: &str,
        to: &TableRef,
        to_column: &str,
    ) -> SchemaResult<()> {
        let rel = Relationship::new(from.clone(), from_column, to.clone(), to_column);
        let Some(pos) = self.relationships.iter().position(|r| *r == rel) else {
            return Err(SchemaError::schema_validation(format!(
                "Relationship {} does not exist",
                rel
            )));
        };
        let removed = self.relationships.remove(pos);
        self.refresh_fk_flags(std::slice::from_ref(&removed));
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn require_table(&self, table: &TableRef) -> SchemaResult<&Table> {
        self.tables.get(table).ok_or_else(|| missing_table(table))
    }

    fn require_table_mut(&mut self, table: &TableRef) -> SchemaResult<&mut Table> {
        self.tables.get_mut(table).ok_or_else(|| missing_table(table))
    }

    /// Recompute `is_fk` for the source columns of removed relationships.
    fn refresh_fk_flags(&mut self, removed: &[Relationship]) {
        for rel in removed {
            let still_referencing = self
                .relationships
                .iter()
                .any(|r| r.from == rel.from && r.from_column == rel.from_column);
            if let Some(col) = self
                .tables
                .get_mut(&rel.from)
                .and_then(|t| t.column_mut(&rel.from_column))
            {
                col.is_fk = still_referencing;
            }
        }
    }
}

fn validate_column(column: &Column) -> SchemaResult<()> {
    if column.name.trim().is_empty() {
        return Err(SchemaError::schema_validation("Column name cannot be empty"));
    }
    validate_type(&column.data_type)
}

fn missing_table(table: &TableRef) -> SchemaError {
    SchemaError::schema_validation(format!("Table '{}' does not exist", table))
}

fn missing_column(column: &str, table: &TableRef) -> SchemaError {
    SchemaError::schema_validation(format!(
        "Column '{}' does not exist in table '{}'",
        column, table
    ))
}

fn display_table(table: &TableRef) -> String {
    format!(
        "{}.{}",
        display_ident(&table.schema),
        display_ident(&table.name)
    )
}

fn create_table_ddl(table: &Table) -> String {
    let mut lines: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let mut line = format!("    {} {}", display_ident(&c.name), c.data_type);
            if !c.nullable {
                line.push_str(" NOT NULL");
            }
            line
        })
        .collect();

    let pk = table.primary_key_columns();
    if !pk.is_empty() {
        let cols: Vec<String> = pk.iter().map(|c| display_ident(c)).collect();
        lines.push(format!(
            "    CONSTRAINT {} PRIMARY KEY ({})",
            display_ident(&format!("{}_pkey", table.name)),
            cols.join(", ")
        ));
    }

    format!(
        "CREATE TABLE {} (\n{}\n);",
        display_table(&table.table_ref()),
        lines.join(",\n")
    )
}

fn foreign_key_ddl(rel: &Relationship) -> String {
    format!(
        "ALTER TABLE {}\n    ADD CONSTRAINT {}\n    FOREIGN KEY ({})\n    REFERENCES {} ({});",
        display_table(&rel.from),
        display_ident(&rel.constraint_name()),
        display_ident(&rel.from_column),
        display_table(&rel.to),
        display_ident(&rel.to_column)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnFact, ForeignKeyFact, PrimaryKeyFact};

    fn users() -> TableRef {
        TableRef::public("users")
    }

    fn orders() -> TableRef {
        TableRef::public("orders")
    }

    fn users_orders() -> CanonicalSchemaModel {
        let mut model = CanonicalSchemaModel::new();
        model
            .add_table(
                users(),
                vec![
                    Column::new("id", "integer").primary_key().not_null(),
                    Column::new("name", "text").not_null(),
                ],
            )
            .unwrap();
        model
            .add_table(
                orders(),
                vec![
                    Column::new("id", "integer").primary_key().not_null(),
                    Column::new("user_id", "integer").not_null(),
                ],
            )
            .unwrap();
        model
            .add_relationship(&orders(), "user_id", &users(), "id")
            .unwrap();
        model
    }

    #[test]
    fn test_empty_model_ddl() {
        assert_eq!(CanonicalSchemaModel::new().to_ddl(), "");
    }

    #[test]
    fn test_to_ddl_format() {
        let ddl = users_orders().to_ddl();
        let expected = "CREATE TABLE public.orders (\n    id integer NOT NULL,\n    user_id integer NOT NULL,\n    CONSTRAINT orders_pkey PRIMARY KEY (id)\n);\n\n\
CREATE TABLE public.users (\n    id integer NOT NULL,\n    name text NOT NULL,\n    CONSTRAINT users_pkey PRIMARY KEY (id)\n);\n\n\
ALTER TABLE public.orders\n    ADD CONSTRAINT orders_user_id_fkey\n    FOREIGN KEY (user_id)\n    REFERENCES public.users (id);";
        assert_eq!(ddl, expected);
    }

    #[test]
    fn test_to_ddl_nullable_column() {
        let mut model = CanonicalSchemaModel::new();
        model
            .add_table(TableRef::public("logs"), vec![Column::new("msg", "text")])
            .unwrap();
        assert_eq!(model.to_ddl(), "CREATE TABLE public.logs (\n    msg text\n);");
    }

    #[test]
    fn test_add_duplicate_table() {
        let mut model = users_orders();
        let err = model.add_table(users(), vec![]).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_add_table_invalid_type_leaves_model_unchanged() {
        let mut model = users_orders();
        let before = model.clone();
        let err = model
            .add_table(TableRef::public("bad"), vec![Column::new("x", "blob")])
            .unwrap_err();
        assert!(err.to_string().contains("Invalid PostgreSQL type"));
        assert_eq!(model, before);
    }

    #[test]
    fn test_rename_table_cascades() {
        let mut model = users_orders();
        model.rename_table(&users(), "customers").unwrap();
        assert!(model.has_table(&TableRef::public("customers")));
        assert!(!model.has_table(&users()));
        assert_eq!(model.relationships()[0].to, TableRef::public("customers"));
    }

    #[test]
    fn test_rename_table_conflict() {
        let mut model = users_orders();
        let err = model.rename_table(&users(), "orders").unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_drop_referenced_table_requires_force() {
        let mut model = users_orders();
        let err = model.drop_table(&users(), false).unwrap_err();
        assert!(err.to_string().contains("public.orders.user_id"));
        model.drop_table(&users(), true).unwrap();
        assert_eq!(model.relationship_count(), 0);
        let orders_table = model.table(&orders()).unwrap();
        assert!(!orders_table.column("user_id").unwrap().is_fk);
    }

    #[test]
    fn test_drop_referencing_table_without_force() {
        let mut model = users_orders();
        model.drop_table(&orders(), false).unwrap();
        assert_eq!(model.relationship_count(), 0);
    }

    #[test]
    fn test_rename_column_cascades_both_sides() {
        let mut model = users_orders();
        model.rename_column(&users(), "id", "user_pk").unwrap();
        model.rename_column(&orders(), "user_id", "owner_id").unwrap();
        let rel = &model.relationships()[0];
        assert_eq!(rel.to_column, "user_pk");
        assert_eq!(rel.from_column, "owner_id");
    }

    #[test]
    fn test_add_relationship_requires_pk_target() {
        let mut model = users_orders();
        let err = model
            .add_relationship(&orders(), "id", &users(), "name")
            .unwrap_err();
        assert!(matches!(err, SchemaError::SchemaValidation { .. }));
    }

    #[test]
    fn test_duplicate_relationship_rejected() {
        let mut model = users_orders();
        assert!(
            model
                .add_relationship(&orders(), "user_id", &users(), "id")
                .is_err()
        );
    }

    #[test]
    fn test_remove_relationship_keeps_flag_while_other_remains() {
        let mut model = users_orders();
        model
            .add_table(
                TableRef::public("accounts"),
                vec![Column::new("id", "integer").primary_key()],
            )
            .unwrap();
        model
            .add_relationship(&orders(), "user_id", &TableRef::public("accounts"), "id")
            .unwrap();
        model
            .remove_relationship(&orders(), "user_id", &users(), "id")
            .unwrap();
        assert!(model.table(&orders()).unwrap().column("user_id").unwrap().is_fk);
        model
            .remove_relationship(&orders(), "user_id", &TableRef::public("accounts"), "id")
            .unwrap();
        assert!(!model.table(&orders()).unwrap().column("user_id").unwrap().is_fk);
    }

    #[test]
    fn test_remove_missing_relationship() {
        let mut model = users_orders();
        assert!(
            model
                .remove_relationship(&users(), "id", &orders(), "id")
                .is_err()
        );
    }

    #[test]
    fn test_from_introspection() {
        let col = |t: &str, c: &str, ty: &str, n: &str| ColumnFact {
            schema: "public".into(),
            table: t.into(),
            column: c.into(),
            data_type: ty.into(),
            is_nullable: n.into(),
        };
        let facts = IntrospectionFacts {
            columns: vec![
                col("users", "id", "integer", "NO"),
                col("users", "email", "text", "YES"),
                col("orders", "id", "integer", "NO"),
                col("orders", "user_id", "integer", "YES"),
            ],
            primary_keys: vec![
                PrimaryKeyFact {
                    schema: "public".into(),
                    table: "users".into(),
                    column: "id".into(),
                },
                PrimaryKeyFact {
                    schema: "public".into(),
                    table: "orders".into(),
                    column: "id".into(),
                },
            ],
            foreign_keys: vec![ForeignKeyFact {
                from_schema: "public".into(),
                from_table: "orders".into(),
                from_column: "user_id".into(),
                to_schema: "public".into(),
                to_table: "users".into(),
                to_column: "id".into(),
            }],
            row_counts: None,
        };

        let model = CanonicalSchemaModel::from_introspection(&facts);
        assert_eq!(model.table_count(), 2);
        let users_table = model.table(&users()).unwrap();
        assert_eq!(users_table.columns[0].name, "id");
        assert!(users_table.columns[0].is_pk);
        assert!(!users_table.columns[0].nullable);
        assert!(users_table.columns[1].nullable);
        assert!(model.table(&orders()).unwrap().column("user_id").unwrap().is_fk);
        assert_eq!(model.relationship_count(), 1);
    }

    #[test]
    fn test_api_document_shape() {
        let doc = serde_json::to_value(users_orders().to_dict_for_api()).unwrap();
        assert_eq!(doc["tables"].as_array().unwrap().len(), 2);
        assert_eq!(doc["relationships"][0]["from_table"], "public.orders");
        assert_eq!(doc["relationships"][0]["to_column"], "id");
        assert_eq!(doc["tables"][0]["columns"][0]["type"], "integer");
    }
}
