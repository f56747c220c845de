//! DDL subset reader.
//!
//! Parses a script with sqlparser's PostgreSQL dialect and walks the AST of
//! `CREATE SCHEMA`, `CREATE TABLE` and `ALTER TABLE ... ADD CONSTRAINT ...
//! FOREIGN KEY` statements. Column types are taken from the parsed data type
//! and normalized, so `to_ddl` output parses back to identical type strings.
//!
//! Tables are created first, foreign keys second, so an `ALTER TABLE` may
//! reference a table declared later in the script.

use crate::error::{SchemaError, SchemaResult};
use crate::models::{Column, TableRef};
use crate::schema::model::CanonicalSchemaModel;
use crate::schema::types::normalize_type;
use sqlparser::ast::{
    AlterTableOperation, ColumnDef, ColumnOption, CreateTable, Expr, Ident, ObjectName,
    ObjectNamePart, Statement, TableConstraint,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use tracing::debug;

#[derive(Debug)]
struct ParsedTable {
    table: TableRef,
    columns: Vec<Column>,
    primary_key: Vec<String>,
}

#[derive(Debug)]
struct ParsedForeignKey {
    from: TableRef,
    from_columns: Vec<String>,
    to: TableRef,
    to_columns: Vec<String>,
}

#[derive(Debug, Default)]
struct ParsedScript {
    tables: Vec<ParsedTable>,
    foreign_keys: Vec<ParsedForeignKey>,
}

/// Parse a DDL script into a model.
pub(crate) fn parse_ddl(text: &str) -> SchemaResult<CanonicalSchemaModel> {
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, text)
        .map_err(|e| SchemaError::schema_validation(format!("Could not parse DDL: {}", e)))?;

    let mut script = ParsedScript::default();
    for (index, statement) in statements.iter().enumerate() {
        collect_statement(statement, &mut script).map_err(|e| match e {
            SchemaError::SchemaValidation { message } => SchemaError::schema_validation(format!(
                "DDL statement {}: {}",
                index + 1,
                message
            )),
            other => other,
        })?;
    }

    build_model(script)
}

fn build_model(script: ParsedScript) -> SchemaResult<CanonicalSchemaModel> {
    let mut model = CanonicalSchemaModel::new();

    for parsed in script.tables {
        let mut columns = parsed.columns;
        for pk in &parsed.primary_key {
            let column = columns.iter_mut().find(|c| c.name == *pk).ok_or_else(|| {
                SchemaError::schema_validation(format!(
                    "Primary key column '{}' not found in table '{}'",
                    pk, parsed.table
                ))
            })?;
            column.is_pk = true;
        }
        model.add_table(parsed.table, columns)?;
    }

    for fk in script.foreign_keys {
        if fk.from_columns.len() != fk.to_columns.len() {
            return Err(SchemaError::schema_validation(format!(
                "Foreign key from '{}' lists {} columns but references {}",
                fk.from,
                fk.from_columns.len(),
                fk.to_columns.len()
            )));
        }
        for (from_column, to_column) in fk.from_columns.iter().zip(&fk.to_columns) {
            model.add_relationship(&fk.from, from_column, &fk.to, to_column)?;
        }
    }

    debug!(
        tables = model.table_count(),
        relationships = model.relationship_count(),
        "Parsed DDL into schema model"
    );
    Ok(model)
}

// =============================================================================
// Statements
// =============================================================================

fn collect_statement(statement: &Statement, script: &mut ParsedScript) -> SchemaResult<()> {
    match statement {
        Statement::CreateSchema { .. } => Ok(()),
        Statement::CreateTable(create) => {
            let (table, inline_fks) = collect_create_table(create)?;
            script.tables.push(table);
            script.foreign_keys.extend(inline_fks);
            Ok(())
        }
        Statement::AlterTable(alter_table) => {
            let table = table_ref(&alter_table.name)?;
            for op in &alter_table.operations {
                // Other alterations are applied through the mutation API, not here.
                if let AlterTableOperation::AddConstraint {
                    constraint: TableConstraint::ForeignKey(fk),
                    ..
                } = op
                {
                    script.foreign_keys.push(references(
                        table.clone(),
                        fk.columns.iter().map(fold_ident).collect(),
                        &fk.foreign_table,
                        &fk.referred_columns,
                    )?);
                }
            }
            Ok(())
        }
        other => {
            let printed = other.to_string();
            let head: Vec<&str> = printed.split_whitespace().take(3).collect();
            Err(SchemaError::schema_validation(format!(
                "Unsupported statement '{}'; only CREATE SCHEMA, CREATE TABLE and ALTER TABLE are accepted",
                head.join(" ")
            )))
        }
    }
}

fn collect_create_table(
    create: &CreateTable,
) -> SchemaResult<(ParsedTable, Vec<ParsedForeignKey>)> {
    let table = table_ref(&create.name)?;
    if create.query.is_some() {
        return Err(SchemaError::schema_validation(format!(
            "CREATE TABLE {} AS SELECT is not supported",
            table
        )));
    }

    let mut parsed = ParsedTable {
        table: table.clone(),
        columns: Vec::with_capacity(create.columns.len()),
        primary_key: Vec::new(),
    };
    let mut foreign_keys = Vec::new();

    for def in &create.columns {
        parsed
            .columns
            .push(collect_column(def, &table, &mut foreign_keys)?);
    }

    for constraint in &create.constraints {
        match constraint {
            TableConstraint::PrimaryKey(pk) => {
                for key in &pk.columns {
                    parsed.primary_key.push(column_name(&key.column.expr)?);
                }
            }
            TableConstraint::ForeignKey(fk) => foreign_keys.push(references(
                table.clone(),
                fk.columns.iter().map(fold_ident).collect(),
                &fk.foreign_table,
                &fk.referred_columns,
            )?),
            // UNIQUE, CHECK and EXCLUDE do not change the model.
            _ => {}
        }
    }

    Ok((parsed, foreign_keys))
}

fn collect_column(
    def: &ColumnDef,
    table: &TableRef,
    foreign_keys: &mut Vec<ParsedForeignKey>,
) -> SchemaResult<Column> {
    let name = fold_ident(&def.name);
    let mut column = Column::new(&name, normalize_type(&def.data_type.to_string()));

    for option in &def.options {
        match &option.option {
            ColumnOption::NotNull => column.nullable = false,
            ColumnOption::Null => column.nullable = true,
            ColumnOption::PrimaryKey(..) => column.is_pk = true,
            ColumnOption::ForeignKey(fk) => foreign_keys.push(references(
                table.clone(),
                vec![name.clone()],
                &fk.foreign_table,
                &fk.referred_columns,
            )?),
            _ => {}
        }
    }
    Ok(column)
}

/// `REFERENCES target (cols)`, with the target columns required.
fn references(
    from: TableRef,
    from_columns: Vec<String>,
    target: &ObjectName,
    referred: &[Ident],
) -> SchemaResult<ParsedForeignKey> {
    let to = table_ref(target)?;
    if referred.is_empty() {
        return Err(SchemaError::schema_validation(format!(
            "Foreign key to '{}' must list the referenced columns",
            to
        )));
    }
    Ok(ParsedForeignKey {
        from,
        from_columns,
        to,
        to_columns: referred.iter().map(fold_ident).collect(),
    })
}

/// An identifier, folded to lower case unless quoted.
fn fold_ident(ident: &Ident) -> String {
    match ident.quote_style {
        Some(_) => ident.value.clone(),
        None => ident.value.to_lowercase(),
    }
}

fn column_name(expr: &Expr) -> SchemaResult<String> {
    match expr {
        Expr::Identifier(ident) => Ok(fold_ident(ident)),
        other => Err(SchemaError::schema_validation(format!(
            "Unsupported key expression '{}'",
            other
        ))),
    }
}

/// `name`, `schema.name` or `db.schema.name`; bare names land in `public`.
fn table_ref(name: &ObjectName) -> SchemaResult<TableRef> {
    let mut parts = Vec::with_capacity(name.0.len());
    for part in &name.0 {
        match part {
            ObjectNamePart::Identifier(ident) => parts.push(fold_ident(ident)),
            other => {
                return Err(SchemaError::schema_validation(format!(
                    "Unsupported object name '{}'",
                    other
                )));
            }
        }
    }
    let Some(table) = parts.pop() else {
        return Err(SchemaError::schema_validation("Empty object name"));
    };
    Ok(match parts.pop() {
        Some(schema) => TableRef::new(schema, table),
        None => TableRef::public(table),
    })
}
