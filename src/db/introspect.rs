//! Catalog introspection.
//!
//! Reads tables, columns, primary keys and foreign keys from the PostgreSQL
//! system catalogs and returns them as raw [`IntrospectionFacts`]. Building
//! the schema model from those facts is the model's job.
//!
//! # Architecture
//!
//! SQL queries live in the `queries` submodule. [`CatalogSource`] is the seam
//! the schema cache refreshes through; `PgConnection` implements it.

use crate::error::SchemaResult;
use crate::models::{ColumnFact, ForeignKeyFact, IntrospectionFacts, PrimaryKeyFact, TableRef};
use sqlx::{PgConnection, Row};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Anything that can produce catalog facts for the current database.
#[allow(async_fn_in_trait)]
pub trait CatalogSource {
    async fn fetch_facts(&mut self) -> SchemaResult<IntrospectionFacts>;
}

impl CatalogSource for PgConnection {
    async fn fetch_facts(&mut self) -> SchemaResult<IntrospectionFacts> {
        CatalogIntrospector::introspect(self).await
    }
}

/// Catalog introspector for PostgreSQL.
pub struct CatalogIntrospector;

impl CatalogIntrospector {
    /// Read all facts in one go.
    pub async fn introspect(conn: &mut PgConnection) -> SchemaResult<IntrospectionFacts> {
        let columns = Self::columns(conn).await?;
        let primary_keys = Self::primary_keys(conn).await?;
        let foreign_keys = Self::foreign_keys(conn).await?;

        // Row counts are a hint; statistics views can be restricted.
        let row_counts = match Self::row_counts(conn).await {
            Ok(counts) => Some(counts),
            Err(e) => {
                warn!(error = %e, "Could not read row count statistics");
                None
            }
        };

        debug!(
            columns = columns.len(),
            primary_keys = primary_keys.len(),
            foreign_keys = foreign_keys.len(),
            "Introspected catalog"
        );

        Ok(IntrospectionFacts {
            columns,
            primary_keys,
            foreign_keys,
            row_counts,
        })
    }

    /// Column facts, ordered by table then ordinal position.
    pub async fn columns(conn: &mut PgConnection) -> SchemaResult<Vec<ColumnFact>> {
        let rows = sqlx::query(queries::postgres::COLUMNS)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .iter()
            .map(|row| ColumnFact {
                schema: row.get("table_schema"),
                table: row.get("table_name"),
                column: row.get("column_name"),
                data_type: row.get("data_type"),
                is_nullable: row.get("is_nullable"),
            })
            .collect())
    }

    /// Primary key facts, ordered by key position.
    pub async fn primary_keys(conn: &mut PgConnection) -> SchemaResult<Vec<PrimaryKeyFact>> {
        let rows = sqlx::query(queries::postgres::PRIMARY_KEYS)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .iter()
            .map(|row| PrimaryKeyFact {
                schema: row.get("table_schema"),
                table: row.get("table_name"),
                column: row.get("column_name"),
            })
            .collect())
    }

    /// Foreign key facts, one row per column pair.
    pub async fn foreign_keys(conn: &mut PgConnection) -> SchemaResult<Vec<ForeignKeyFact>> {
        let rows = sqlx::query(queries::postgres::FOREIGN_KEYS)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .iter()
            .map(|row| ForeignKeyFact {
                from_schema: row.get("from_schema"),
                from_table: row.get("from_table"),
                from_column: row.get("from_column"),
                to_schema: row.get("to_schema"),
                to_table: row.get("to_table"),
                to_column: row.get("to_column"),
            })
            .collect())
    }

    pub async fn row_counts(conn: &mut PgConnection) -> SchemaResult<HashMap<TableRef, i64>> {
        let rows = sqlx::query(queries::postgres::ROW_COUNTS)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let schema: String = row.get("table_schema");
                let table: String = row.get("table_name");
                let count: i64 = row.get("row_count");
                (TableRef::new(schema, table), count)
            })
            .collect())
    }
}

// =============================================================================
// SQL Query Templates
// =============================================================================
//
// Catalog names are cast to text so they decode as plain strings. Column
// types outside pg_catalog are reported schema-qualified so they stay valid
// type names wherever the model is rendered back to DDL.

mod queries {
    pub mod postgres {
        pub const COLUMNS: &str = r#"
            SELECT
                n.nspname::text AS table_schema,
                c.relname::text AS table_name,
                a.attname::text AS column_name,
                CASE
                    WHEN bn.nspname = 'pg_catalog'
                        THEN pg_catalog.format_type(a.atttypid, a.atttypmod)
                    ELSE quote_ident(bn.nspname) || '.' || quote_ident(bt.typname)
                        || CASE WHEN t.typcategory = 'A' THEN '[]' ELSE '' END
                END AS data_type,
                CASE WHEN a.attnotnull THEN 'NO' ELSE 'YES' END AS is_nullable
            FROM pg_catalog.pg_attribute a
            JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_catalog.pg_type t ON t.oid = a.atttypid
            JOIN pg_catalog.pg_type bt ON bt.oid = CASE
                WHEN t.typcategory = 'A' AND t.typelem <> 0 THEN t.typelem
                ELSE t.oid
            END
            JOIN pg_catalog.pg_namespace bn ON bn.oid = bt.typnamespace
            WHERE c.relkind IN ('r', 'p')
              AND a.attnum > 0
              AND NOT a.attisdropped
              AND n.nspname NOT IN ('pg_catalog', 'information_schema')
              AND n.nspname NOT LIKE 'pg_toast%'
            ORDER BY n.nspname, c.relname, a.attnum
            "#;

        pub const PRIMARY_KEYS: &str = r#"
            SELECT
                n.nspname::text AS table_schema,
                c.relname::text AS table_name,
                a.attname::text AS column_name
            FROM pg_catalog.pg_constraint con
            JOIN pg_catalog.pg_class c ON c.oid = con.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            CROSS JOIN LATERAL unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
            JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid AND a.attnum = k.attnum
            WHERE con.contype = 'p'
              AND n.nspname NOT IN ('pg_catalog', 'information_schema')
            ORDER BY n.nspname, c.relname, k.ord
            "#;

        pub const FOREIGN_KEYS: &str = r#"
            SELECT
                fn.nspname::text AS from_schema,
                fc.relname::text AS from_table,
                fa.attname::text AS from_column,
                tn.nspname::text AS to_schema,
                tc.relname::text AS to_table,
                ta.attname::text AS to_column
            FROM pg_catalog.pg_constraint con
            JOIN pg_catalog.pg_class fc ON fc.oid = con.conrelid
            JOIN pg_catalog.pg_namespace fn ON fn.oid = fc.relnamespace
            JOIN pg_catalog.pg_class tc ON tc.oid = con.confrelid
            JOIN pg_catalog.pg_namespace tn ON tn.oid = tc.relnamespace
            CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(from_attnum, to_attnum, ord)
            JOIN pg_catalog.pg_attribute fa ON fa.attrelid = fc.oid AND fa.attnum = k.from_attnum
            JOIN pg_catalog.pg_attribute ta ON ta.attrelid = tc.oid AND ta.attnum = k.to_attnum
            WHERE con.contype = 'f'
              AND fn.nspname NOT IN ('pg_catalog', 'information_schema')
            ORDER BY fn.nspname, fc.relname, con.conname, k.ord
            "#;

        pub const ROW_COUNTS: &str = r#"
            SELECT
                schemaname::text AS table_schema,
                relname::text AS table_name,
                COALESCE(n_live_tup, 0)::bigint AS row_count
            FROM pg_catalog.pg_stat_user_tables
            "#;
    }
}
