//! DDL generation and transactional execution.
//!
//! [`generate_ddl_from_action`] turns one [`EditAction`] into the exact
//! statement the database runs. Identifiers always go through
//! [`quote_ident`]; column types are checked against the accepted type
//! catalog before they are written into the statement text.
//!
//! Execution wraps a batch in one transaction. Either every statement
//! commits or none does; the schema cache is refreshed only after a commit.

use crate::db::introspect::CatalogSource;
use crate::error::{SchemaError, SchemaResult};
use crate::models::{Column, Relationship, TableRef};
use crate::schema::types::validate_type;
use crate::schema::{CanonicalSchemaModel, EditAction, SchemaCache, quote_ident, quote_qualified};
use crate::tools::sql_validator::validate_and_normalize_sql;
use sqlx::{Connection, Executor, PgConnection};
use std::sync::Arc;
use tracing::{debug, info, warn};

// =============================================================================
// Generation
// =============================================================================

/// Build the DDL statement for a single edit action.
///
/// This is pure: it does not consult a model, so it cannot tell whether the
/// referenced objects exist. Pair it with [`EditAction::apply`] (see
/// [`plan_edit_actions`]) to validate first.
///
/// # Examples
///
/// ```
/// use schemasense_core::db::ddl::generate_ddl_from_action;
/// use schemasense_core::schema::{EditAction, RenameColumn};
///
/// let action = EditAction::RenameColumn(RenameColumn {
///     table: "users".into(),
///     schema: "public".into(),
///     old_name: "mail".into(),
///     new_name: "email".into(),
/// });
/// assert_eq!(
///     generate_ddl_from_action(&action).unwrap(),
///     r#"ALTER TABLE "public"."users" RENAME COLUMN "mail" TO "email""#
/// );
/// ```
pub fn generate_ddl_from_action(action: &EditAction) -> SchemaResult<String> {
    let ddl = match action {
        EditAction::AddTable(p) => create_table(&TableRef::new(&p.schema, &p.name), &p.columns)?,
        EditAction::RenameTable(p) => {
            require_name(&p.new_name, "Table")?;
            format!(
                "ALTER TABLE {} RENAME TO {}",
                quote_qualified(&p.schema, &p.old_name),
                quote_ident(&p.new_name)
            )
        }
        EditAction::DropTable(p) => format!(
            "DROP TABLE {}{}",
            quote_qualified(&p.schema, &p.name),
            cascade(p.force)
        ),
        EditAction::AddColumn(p) => format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_qualified(&p.schema, &p.table),
            column_definition(&p.column)?
        ),
        EditAction::RenameColumn(p) => {
            require_name(&p.new_name, "Column")?;
            format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                quote_qualified(&p.schema, &p.table),
                quote_ident(&p.old_name),
                quote_ident(&p.new_name)
            )
        }
        EditAction::DropColumn(p) => format!(
            "ALTER TABLE {} DROP COLUMN {}{}",
            quote_qualified(&p.schema, &p.table),
            quote_ident(&p.column),
            cascade(p.force)
        ),
        EditAction::AddRelationship(p) => {
            let rel = Relationship::new(p.from_ref(), &p.from_column, p.to_ref(), &p.to_column);
            format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                quote_qualified(&rel.from.schema, &rel.from.name),
                quote_ident(&rel.constraint_name()),
                quote_ident(&rel.from_column),
                quote_qualified(&rel.to.schema, &rel.to.name),
                quote_ident(&rel.to_column)
            )
        }
        EditAction::RemoveRelationship(p) => {
            let rel = Relationship::new(p.from_ref(), &p.from_column, p.to_ref(), &p.to_column);
            format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                quote_qualified(&rel.from.schema, &rel.from.name),
                quote_ident(&rel.constraint_name())
            )
        }
    };
    Ok(ddl)
}

fn create_table(table: &TableRef, columns: &[Column]) -> SchemaResult<String> {
    require_name(&table.name, "Table")?;
    let mut elements = columns
        .iter()
        .map(column_definition)
        .collect::<SchemaResult<Vec<_>>>()?;

    let pk: Vec<String> = columns
        .iter()
        .filter(|c| c.is_pk)
        .map(|c| quote_ident(&c.name))
        .collect();
    if !pk.is_empty() {
        elements.push(format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            quote_ident(&format!("{}_pkey", table.name)),
            pk.join(", ")
        ));
    }

    Ok(format!(
        "CREATE TABLE {} ({})",
        quote_qualified(&table.schema, &table.name),
        elements.join(", ")
    ))
}

/// `"name" type [NOT NULL]`; primary key columns are always NOT NULL.
fn column_definition(column: &Column) -> SchemaResult<String> {
    require_name(&column.name, "Column")?;
    validate_type(&column.data_type)?;
    let not_null = if column.is_pk || !column.nullable {
        " NOT NULL"
    } else {
        ""
    };
    Ok(format!(
        "{} {}{}",
        quote_ident(&column.name),
        column.data_type.trim(),
        not_null
    ))
}

fn require_name(name: &str, what: &str) -> SchemaResult<()> {
    if name.trim().is_empty() {
        return Err(SchemaError::schema_validation(format!(
            "{} name cannot be empty",
            what
        )));
    }
    Ok(())
}

fn cascade(force: bool) -> &'static str {
    if force { " CASCADE" } else { "" }
}

/// Validate a list of actions against a copy of `model` and generate their DDL.
///
/// Returns the edited model and one statement per action. The input model is
/// not modified, and the first invalid action aborts the whole plan.
pub fn plan_edit_actions(
    model: &CanonicalSchemaModel,
    actions: &[EditAction],
) -> SchemaResult<(CanonicalSchemaModel, Vec<String>)> {
    let mut working = model.clone();
    let mut statements = Vec::with_capacity(actions.len());
    for action in actions {
        action.apply(&mut working)?;
        statements.push(generate_ddl_from_action(action)?);
    }
    Ok((working, statements))
}

// =============================================================================
// Execution
// =============================================================================

fn ddl_error(err: sqlx::Error, statement_index: usize) -> SchemaError {
    match err {
        sqlx::Error::Database(db_err) => SchemaError::ddl_execution(
            db_err.message(),
            db_err.code().map(|c| c.to_string()),
            statement_index,
        ),
        other => SchemaError::from(other),
    }
}

/// Run `statements` in one transaction.
///
/// The first failure rolls back everything and is reported with the index of
/// the failing statement.
pub async fn execute_ddl_statements(
    conn: &mut PgConnection,
    statements: &[String],
) -> SchemaResult<()> {
    let mut tx = conn.begin().await?;

    for (index, statement) in statements.iter().enumerate() {
        debug!(index, sql = %statement, "Executing DDL statement");
        if let Err(e) = (&mut *tx).execute(statement.as_str()).await {
            let err = ddl_error(e, index);
            warn!(index, error = %err, "DDL statement failed, rolling back batch");
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback after DDL failure also failed");
            }
            return Err(err);
        }
    }

    tx.commit().await?;
    info!(statements = statements.len(), "DDL batch committed");
    Ok(())
}

/// Run an assembled DDL script in one transaction.
///
/// The script is sent as a single simple-query message, so it may hold
/// several `;`-separated statements. Failures report statement index 0.
pub async fn execute_ddl_text(conn: &mut PgConnection, raw_ddl: &str) -> SchemaResult<()> {
    if raw_ddl.trim().is_empty() {
        return Err(SchemaError::invalid_input("DDL script is empty"));
    }

    let mut tx = conn.begin().await?;
    if let Err(e) = (&mut *tx).execute(raw_ddl).await {
        let err = ddl_error(e, 0);
        warn!(error = %err, "DDL script failed, rolling back");
        if let Err(rollback_err) = tx.rollback().await {
            warn!(error = %rollback_err, "Rollback after DDL failure also failed");
        }
        return Err(err);
    }
    tx.commit().await?;
    info!("DDL script committed");
    Ok(())
}

// =============================================================================
// Pipelines
// =============================================================================

/// Outcome of a successfully applied change.
#[derive(Debug, Clone)]
pub struct AppliedChange {
    /// Statements executed, in order.
    pub statements: Vec<String>,
    /// Model re-introspected after the commit.
    pub model: Arc<CanonicalSchemaModel>,
}

/// Validate, generate, execute and re-introspect a list of edit actions.
///
/// Validation runs against a clone of the cached model. Nothing reaches the
/// database unless every action is valid, and the cache is only refreshed
/// after the transaction commits.
pub async fn apply_edit_actions(
    conn: &mut PgConnection,
    cache: &SchemaCache,
    actions: &[EditAction],
) -> SchemaResult<AppliedChange> {
    if actions.is_empty() {
        return Err(SchemaError::invalid_input("No edit actions provided"));
    }

    let current = cache.get_or_refresh(conn).await?;
    let (_, statements) = plan_edit_actions(&current, actions)?;

    execute_ddl_statements(conn, &statements).await?;
    let model = refresh_after_commit(conn, cache).await?;

    info!(
        actions = actions.len(),
        tables = model.table_count(),
        "Applied schema edit actions"
    );
    Ok(AppliedChange { statements, model })
}

/// Validate a DDL script with the SQL validator and execute it.
///
/// Only CREATE TABLE, CREATE SCHEMA and the permitted ALTER TABLE forms are
/// accepted, and any unknown-reference warning blocks execution.
pub async fn apply_ddl_script(
    conn: &mut PgConnection,
    cache: &SchemaCache,
    ddl: &str,
) -> SchemaResult<AppliedChange> {
    let current = cache.get_or_refresh(conn).await?;
    let validated = validate_and_normalize_sql(ddl, &current)?;

    if !validated.is_ddl_only() {
        return Err(SchemaError::sql_validation(
            "Only CREATE TABLE, CREATE SCHEMA and ALTER TABLE statements can be applied as DDL",
        ));
    }
    if !validated.is_executable() {
        return Err(SchemaError::sql_validation(validated.warnings.join("; ")));
    }

    let script = validated.normalized_sql();
    execute_ddl_text(conn, &script).await?;
    let model = refresh_after_commit(conn, cache).await?;

    Ok(AppliedChange {
        statements: validated.statements.into_iter().map(|s| s.sql).collect(),
        model,
    })
}

async fn refresh_after_commit<S: CatalogSource>(
    source: &mut S,
    cache: &SchemaCache,
) -> SchemaResult<Arc<CanonicalSchemaModel>> {
    cache.refresh(source).await.inspect_err(|e| {
        warn!(error = %e, "Change committed but schema refresh failed; cache left empty");
    })
}
