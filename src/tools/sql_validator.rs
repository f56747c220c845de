//! SQL statement validation against an operation allowlist.
//!
//! Free-form SQL is parsed with [sqlparser](https://docs.rs/sqlparser/) using
//! the PostgreSQL dialect, then checked in three layers:
//!
//! 1. Every statement, including statements nested in CTEs, is walked for
//!    destructive constructs (`DROP`, `DELETE`, `UPDATE`, `TRUNCATE`,
//!    `MERGE`, and `ALTER TABLE` actions other than add column / rename).
//!    Any hit rejects the whole batch.
//! 2. The remaining statement kinds must be on the allowlist: queries,
//!    `INSERT`, `CREATE TABLE`, `CREATE SCHEMA` and the permitted
//!    `ALTER TABLE` subset.
//! 3. Table and column references in queries and inserts are checked against
//!    a working copy of the catalog. Unknown names become warnings.
//!
//! The working copy is updated as the batch is walked, so a statement can
//! refer to a table created earlier in the same batch. The caller's model is
//! never touched.

use crate::error::{SchemaError, SchemaResult};
use crate::models::{DEFAULT_SCHEMA, TableRef};
use crate::schema::CanonicalSchemaModel;
use sqlparser::ast::{
    AlterTableOperation, Expr, Ident, ObjectName, ObjectNamePart, OnConflict, OnConflictAction,
    OnInsert, Query, SelectItem, SetExpr, Statement, TableFactor, TableObject, Visit, Visitor,
    visit_statements,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use tracing::debug;

/// Error messages for rejected input.
mod error_messages {
    pub const EMPTY: &str = "No SQL statement provided.";
    pub const PARSE_ERROR: &str = "SQL parsing failed:";
    pub const DESTRUCTIVE: &str = "Destructive statements are not permitted.";
    pub const NOT_ALLOWED: &str = "Only SELECT, INSERT, CREATE TABLE, CREATE SCHEMA and ALTER TABLE ... ADD COLUMN / RENAME statements are allowed.";
}

/// Kind of an accepted statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// SELECT, set operations, WITH, VALUES
    Query,
    Insert,
    CreateTable,
    CreateSchema,
    /// ALTER TABLE limited to ADD COLUMN, RENAME COLUMN and RENAME TO
    AlterTable,
}

impl StatementKind {
    pub fn is_ddl(&self) -> bool {
        matches!(
            self,
            Self::CreateTable | Self::CreateSchema | Self::AlterTable
        )
    }
}

/// One accepted statement in canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedStatement {
    pub kind: StatementKind,
    pub sql: String,
}

/// Result of validating a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSql {
    pub statements: Vec<ValidatedStatement>,
    /// Unknown table or column references. Non-empty means "do not execute".
    pub warnings: Vec<String>,
}

impl ValidatedSql {
    /// The normalized batch, one statement per line.
    pub fn normalized_sql(&self) -> String {
        self.statements
            .iter()
            .map(|s| s.sql.as_str())
            .collect::<Vec<_>>()
            .join(";\n")
    }

    pub fn is_executable(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn is_ddl_only(&self) -> bool {
        self.statements.iter().all(|s| s.kind.is_ddl())
    }
}

/// Validate and normalize a batch of SQL against the schema model.
///
/// Fatal problems (parse failure, destructive construct, statement kind not
/// on the allowlist) return [`SchemaError::SqlValidation`] for the whole
/// batch. Unknown table or column references are returned as warnings.
///
/// # Examples
///
/// ```
/// use schemasense_core::schema::CanonicalSchemaModel;
/// use schemasense_core::tools::sql_validator::validate_and_normalize_sql;
///
/// let model = CanonicalSchemaModel::new();
/// let result = validate_and_normalize_sql("select 1", &model).unwrap();
/// assert_eq!(result.normalized_sql(), "SELECT 1");
/// assert!(result.warnings.is_empty());
///
/// assert!(validate_and_normalize_sql("DROP TABLE users", &model).is_err());
/// ```
pub fn validate_and_normalize_sql(
    sql: &str,
    model: &CanonicalSchemaModel,
) -> SchemaResult<ValidatedSql> {
    if sql.trim().is_empty() {
        return Err(SchemaError::sql_validation(error_messages::EMPTY));
    }

    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql).map_err(|e| {
        SchemaError::sql_validation(format!("{} {}", error_messages::PARSE_ERROR, e))
    })?;
    if statements.is_empty() {
        return Err(SchemaError::sql_validation(error_messages::EMPTY));
    }

    // Reject the batch before looking at any references.
    let mut kinds = Vec::with_capacity(statements.len());
    for stmt in &statements {
        reject_destructive(stmt)?;
        kinds.push(classify_statement(stmt)?);
    }

    let mut catalog = WorkingCatalog::from_model(model);
    let mut warnings = Vec::new();
    let mut validated = Vec::with_capacity(statements.len());

    for (stmt, kind) in statements.iter().zip(kinds) {
        let stmt_warnings = match kind {
            StatementKind::Query | StatementKind::Insert => check_references(stmt, &catalog),
            StatementKind::CreateTable | StatementKind::AlterTable => catalog.apply(stmt),
            StatementKind::CreateSchema => Vec::new(),
        };
        for warning in stmt_warnings {
            if !warnings.contains(&warning) {
                warnings.push(warning);
            }
        }
        validated.push(ValidatedStatement {
            kind,
            sql: stmt.to_string(),
        });
    }

    debug!(
        statements = validated.len(),
        warnings = warnings.len(),
        "Validated SQL batch"
    );

    Ok(ValidatedSql {
        statements: validated,
        warnings,
    })
}

// =============================================================================
// Destructive construct scan
// =============================================================================

fn reject_destructive(stmt: &Statement) -> SchemaResult<()> {
    let found = visit_statements(stmt, |s| match destructive_operation(s) {
        Some(op) => ControlFlow::Break(op),
        None => ControlFlow::Continue(()),
    });
    match found {
        ControlFlow::Break(op) => Err(SchemaError::sql_validation(format!(
            "Disallowed operation: {}. {}",
            op,
            error_messages::DESTRUCTIVE
        ))),
        ControlFlow::Continue(()) => Ok(()),
    }
}

/// Name of the destructive construct a statement represents, if any.
fn destructive_operation(stmt: &Statement) -> Option<String> {
    match stmt {
        Statement::Drop { .. }
        | Statement::DropFunction { .. }
        | Statement::DropProcedure { .. }
        | Statement::DropTrigger { .. }
        | Statement::DropPolicy { .. } => Some("DROP".to_string()),
        Statement::Delete(_) => Some("DELETE".to_string()),
        Statement::Update { .. } => Some("UPDATE".to_string()),
        Statement::Truncate { .. } => Some("TRUNCATE".to_string()),
        Statement::Merge { .. } => Some("MERGE".to_string()),
        Statement::AlterTable(alter_table) => alter_table
            .operations
            .iter()
            .find(|op| !is_permitted_alter(op))
            .map(|op| format!("ALTER TABLE {}", op)),
        Statement::Insert(insert) => match &insert.on {
            Some(OnInsert::OnConflict(OnConflict {
                action: OnConflictAction::DoUpdate(_),
                ..
            })) => Some("INSERT ... ON CONFLICT DO UPDATE".to_string()),
            _ => None,
        },
        _ => None,
    }
}

fn is_permitted_alter(op: &AlterTableOperation) -> bool {
    matches!(
        op,
        AlterTableOperation::AddColumn { .. }
            | AlterTableOperation::RenameColumn { .. }
            | AlterTableOperation::RenameTable { .. }
    )
}

// =============================================================================
// Allowlist
// =============================================================================

fn classify_statement(stmt: &Statement) -> SchemaResult<StatementKind> {
    match stmt {
        Statement::Query(_) => Ok(StatementKind::Query),
        Statement::Insert(_) => Ok(StatementKind::Insert),
        Statement::CreateTable { .. } => Ok(StatementKind::CreateTable),
        Statement::CreateSchema { .. } => Ok(StatementKind::CreateSchema),
        Statement::AlterTable { .. } => Ok(StatementKind::AlterTable),
        other => Err(SchemaError::sql_validation(format!(
            "Operation not allowed: {}. {}",
            statement_label(other),
            error_messages::NOT_ALLOWED
        ))),
    }
}

/// Leading keywords of a statement, e.g. `CREATE VIEW`.
fn statement_label(stmt: &Statement) -> String {
    stmt.to_string()
        .split_whitespace()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ")
}

// =============================================================================
// Working catalog
// =============================================================================

#[derive(Debug, Clone)]
struct WorkingTable {
    columns: Vec<String>,
    /// False for tables created from a query; their columns are unknown.
    columns_known: bool,
}

/// Batch-scoped copy of the catalog with lower-cased names.
#[derive(Debug, Clone, Default)]
struct WorkingCatalog {
    tables: HashMap<TableRef, WorkingTable>,
}

impl WorkingCatalog {
    fn from_model(model: &CanonicalSchemaModel) -> Self {
        let tables = model
            .tables()
            .map(|t| {
                (
                    TableRef::new(t.schema.to_lowercase(), t.name.to_lowercase()),
                    WorkingTable {
                        columns: t.columns.iter().map(|c| c.name.to_lowercase()).collect(),
                        columns_known: true,
                    },
                )
            })
            .collect();
        Self { tables }
    }

    /// Resolve a possibly unqualified name; bare names prefer `public`.
    fn resolve(&self, schema: Option<&str>, name: &str) -> Option<TableRef> {
        match schema {
            Some(schema) => {
                let table = TableRef::new(schema, name);
                self.tables.contains_key(&table).then_some(table)
            }
            None => {
                let public = TableRef::public(name);
                if self.tables.contains_key(&public) {
                    return Some(public);
                }
                let mut matches: Vec<&TableRef> =
                    self.tables.keys().filter(|t| t.name == name).collect();
                matches.sort();
                matches.first().map(|t| (*t).clone())
            }
        }
    }

    fn table(&self, table: &TableRef) -> Option<&WorkingTable> {
        self.tables.get(table)
    }

    /// Apply a permitted CREATE TABLE or ALTER TABLE, returning warnings.
    fn apply(&mut self, stmt: &Statement) -> Vec<String> {
        let mut warnings = Vec::new();
        match stmt {
            Statement::CreateTable(create) => {
                let (schema, name) = split_object_name(&create.name);
                let table = TableRef::new(schema.unwrap_or_else(|| DEFAULT_SCHEMA.into()), name);
                let columns = create
                    .columns
                    .iter()
                    .map(|c| ident_key(&c.name))
                    .collect();
                self.tables.insert(
                    table,
                    WorkingTable {
                        columns,
                        columns_known: create.query.is_none(),
                    },
                );
            }
            Statement::AlterTable(alter_table) => {
                let (schema, name) = split_object_name(&alter_table.name);
                let Some(mut table) = self.resolve(schema.as_deref(), &name) else {
                    warnings.push(format!("Table '{}' not found in schema", name));
                    return warnings;
                };
                for op in &alter_table.operations {
                    match op {
                        AlterTableOperation::AddColumn { column_def, .. } => {
                            if let Some(entry) = self.tables.get_mut(&table) {
                                entry.columns.push(ident_key(&column_def.name));
                            }
                        }
                        AlterTableOperation::RenameColumn {
                            old_column_name,
                            new_column_name,
                        } => {
                            let old = ident_key(old_column_name);
                            if let Some(entry) = self.tables.get_mut(&table) {
                                match entry.columns.iter_mut().find(|c| **c == old) {
                                    Some(col) => *col = ident_key(new_column_name),
                                    None if entry.columns_known => warnings.push(format!(
                                        "Column '{}' not found in table '{}'",
                                        old, table.name
                                    )),
                                    None => {}
                                }
                            }
                        }
                        AlterTableOperation::RenameTable { table_name } => {
                            let new_name = rename_target(&table_name.to_string());
                            if let Some(entry) = self.tables.remove(&table) {
                                let renamed = TableRef::new(&table.schema, new_name);
                                self.tables.insert(renamed.clone(), entry);
                                table = renamed;
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        warnings
    }
}

/// Lower-cased comparison key for an identifier.
fn ident_key(ident: &Ident) -> String {
    ident.value.to_lowercase()
}

fn name_part(part: &ObjectNamePart) -> String {
    match part {
        ObjectNamePart::Identifier(ident) => ident_key(ident),
        other => unquote_key(&other.to_string()),
    }
}

/// `(schema, name)` of an object name; longer names keep the last two parts.
fn split_object_name(name: &ObjectName) -> (Option<String>, String) {
    let mut parts: Vec<String> = name.0.iter().map(name_part).collect();
    let table = parts.pop().unwrap_or_default();
    (parts.pop(), table)
}

/// Key from printed SQL text: last dotted segment, quotes removed.
fn unquote_key(text: &str) -> String {
    let last = text.rsplit('.').next().unwrap_or(text).trim();
    last.trim_matches('"').to_lowercase()
}

/// New table name from a printed `RENAME TO` target.
fn rename_target(printed: &str) -> String {
    let trimmed = printed.trim();
    let without_keyword = trimmed
        .strip_prefix("TO ")
        .or_else(|| trimmed.strip_prefix("AS "))
        .unwrap_or(trimmed);
    unquote_key(without_keyword)
}

// =============================================================================
// Reference checks
// =============================================================================

#[derive(Debug)]
struct TableReference {
    schema: Option<String>,
    name: String,
    alias: Option<String>,
}

#[derive(Debug)]
struct ColumnReference {
    qualifier: Option<String>,
    name: String,
}

/// Collects table and column identifiers from a statement tree.
#[derive(Debug, Default)]
struct ReferenceCollector {
    tables: Vec<TableReference>,
    columns: Vec<ColumnReference>,
    /// CTE names and derived-table aliases: relations with unknown columns.
    opaque: HashSet<String>,
    /// A FROM item whose columns cannot be known, aliased or not.
    opaque_source: bool,
    /// Projection aliases, usable in ORDER BY and the like.
    output_aliases: HashSet<String>,
}

impl Visitor for ReferenceCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.opaque.insert(ident_key(&cte.alias.name));
            }
        }
        if let SetExpr::Select(select) = query.body.as_ref() {
            for item in &select.projection {
                if let SelectItem::ExprWithAlias { alias, .. } = item {
                    self.output_aliases.insert(ident_key(alias));
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, table_factor: &TableFactor) -> ControlFlow<Self::Break> {
        match table_factor {
            // Set-returning calls such as generate_series(1, 3) AS g(n).
            TableFactor::Table {
                alias, args: Some(_), ..
            }
            | TableFactor::Function { alias, .. }
            | TableFactor::UNNEST { alias, .. }
            | TableFactor::TableFunction { alias, .. } => {
                self.opaque_source = true;
                if let Some(alias) = alias {
                    self.opaque.insert(ident_key(&alias.name));
                }
            }
            TableFactor::Table { name, alias, .. } => {
                let (schema, table) = split_object_name(name);
                if schema.is_none() && self.opaque.contains(&table) {
                    return ControlFlow::Continue(());
                }
                self.tables.push(TableReference {
                    schema,
                    name: table,
                    alias: alias.as_ref().map(|a| ident_key(&a.name)),
                });
            }
            TableFactor::Derived {
                alias: Some(alias), ..
            } => {
                self.opaque.insert(ident_key(&alias.name));
            }
            TableFactor::NestedJoin { .. } => {}
            _ => self.opaque_source = true,
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Identifier(ident) => self.columns.push(ColumnReference {
                qualifier: None,
                name: ident_key(ident),
            }),
            Expr::CompoundIdentifier(parts) => {
                // schema.table.column keeps the table part only
                if let Some((column, [.., qualifier])) = parts.split_last() {
                    self.columns.push(ColumnReference {
                        qualifier: Some(ident_key(qualifier)),
                        name: ident_key(column),
                    });
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

fn check_references(stmt: &Statement, catalog: &WorkingCatalog) -> Vec<String> {
    let mut collector = ReferenceCollector::default();
    let _ = stmt.visit(&mut collector);

    let mut warnings = Vec::new();
    let mut insert_target: Option<(TableReference, Vec<String>)> = None;

    if let Statement::Insert(insert) = stmt {
        if let TableObject::TableName(name) = &insert.table {
            let (schema, table) = split_object_name(name);
            let columns = insert
                .columns
                .iter()
                .map(|c| unquote_key(&c.to_string()))
                .collect();
            insert_target = Some((
                TableReference {
                    schema,
                    name: table,
                    alias: None,
                },
                columns,
            ));
        }
    }

    // Qualifier (alias, bare name or schema-less name) -> resolved table
    let mut qualifiers: HashMap<String, Option<TableRef>> = HashMap::new();
    let mut resolved: Vec<TableRef> = Vec::new();
    let mut any_unresolved = false;

    let references = collector
        .tables
        .iter()
        .chain(insert_target.as_ref().map(|(t, _)| t));
    for reference in references {
        let found = catalog.resolve(reference.schema.as_deref(), &reference.name);
        match &found {
            Some(table) => resolved.push(table.clone()),
            None => {
                any_unresolved = true;
                warnings.push(format!("Table '{}' not found in schema", reference.name));
            }
        }
        qualifiers.insert(reference.name.clone(), found.clone());
        if let Some(alias) = &reference.alias {
            qualifiers.insert(alias.clone(), found);
        }
    }

    if let Some((target, columns)) = &insert_target {
        if let Some(table) = catalog.resolve(target.schema.as_deref(), &target.name) {
            if let Some(entry) = catalog.table(&table).filter(|e| e.columns_known) {
                for column in columns {
                    if !entry.columns.contains(column) {
                        warnings.push(format!(
                            "Column '{}' not found in table '{}'",
                            column, table.name
                        ));
                    }
                }
            }
        }
    }

    let all_known = !any_unresolved
        && !collector.opaque_source
        && collector.opaque.is_empty()
        && resolved
            .iter()
            .all(|t| catalog.table(t).is_some_and(|e| e.columns_known));

    for column in &collector.columns {
        match &column.qualifier {
            Some(qualifier) => {
                if collector.opaque.contains(qualifier) {
                    continue;
                }
                let Some(Some(table)) = qualifiers.get(qualifier) else {
                    continue;
                };
                let Some(entry) = catalog.table(table).filter(|e| e.columns_known) else {
                    continue;
                };
                if !entry.columns.contains(&column.name) {
                    warnings.push(format!(
                        "Column '{}' not found in table '{}'",
                        column.name, table.name
                    ));
                }
            }
            None => {
                if collector.output_aliases.contains(&column.name)
                    || resolved.is_empty()
                    || !all_known
                {
                    continue;
                }
                let found = resolved.iter().any(|t| {
                    catalog
                        .table(t)
                        .is_some_and(|e| e.columns.contains(&column.name))
                });
                if !found {
                    warnings.push(format!(
                        "Column '{}' not found in any referenced tables",
                        column.name
                    ));
                }
            }
        }
    }

    warnings
}
