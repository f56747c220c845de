//! Administrative cluster operations.
//!
//! [`ClusterAdmin`] is everything the provisioner and credential rotation
//! need from the shared cluster. [`PgClusterAdmin`] implements it over a
//! single autocommit connection: `CREATE DATABASE` and `DROP DATABASE` cannot
//! run inside a transaction block, so nothing here opens one. Role changes
//! scoped to one tenant database (grants, `REASSIGN OWNED`) open a short-lived
//! admin connection to that database.
//!
//! Utility statements cannot take bind parameters. Their text is built
//! server-side by `format()` with `%I` / `%L` from bound arguments and then
//! executed, so role names and passwords are never spliced in client-side.

use crate::error::{SchemaError, SchemaResult};
use crate::models::{
    ConnectionDescriptor, NewProvisionRecord, ProvisionStatus, ProvisionedDatabase, RecordLookup,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Connection, Executor, PgConnection, Row};
use tracing::{debug, info};

/// Bundled sample dataset loaded into fresh tenant databases.
const SAMPLE_DATA_SQL: &str = include_str!("../../sql/sample_sales.sql");

/// Active-database counts used for the quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuotaUsage {
    /// Active databases for the requesting session, 0 without a session.
    pub session: i64,
    pub global: i64,
}

/// Per-role limits applied when a tenant role is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleLimits {
    pub connection_limit: i32,
    pub statement_timeout_ms: u64,
    pub idle_in_transaction_timeout_ms: u64,
}

/// Operations on the shared administrative cluster.
#[allow(async_fn_in_trait)]
pub trait ClusterAdmin {
    async fn active_counts(&mut self, session_id: Option<&str>) -> SchemaResult<QuotaUsage>;

    /// Create a login role without superuser, createdb or replication rights.
    async fn create_role(
        &mut self,
        role: &str,
        password: &str,
        limits: &RoleLimits,
    ) -> SchemaResult<()>;

    async fn create_database(&mut self, database: &str, owner: &str) -> SchemaResult<()>;

    /// Insert an `active` metadata row and return its id.
    async fn record_metadata(&mut self, record: &NewProvisionRecord) -> SchemaResult<i64>;

    async fn set_status(&mut self, database: &str, status: ProvisionStatus) -> SchemaResult<()>;

    async fn find_record(
        &mut self,
        lookup: &RecordLookup,
    ) -> SchemaResult<Option<ProvisionedDatabase>>;

    /// Active records last used before `cutoff`.
    async fn stale_records(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> SchemaResult<Vec<ProvisionedDatabase>>;

    /// Terminate other backends connected to `database`; returns how many.
    async fn terminate_connections(&mut self, database: &str) -> SchemaResult<u64>;

    async fn drop_database(&mut self, database: &str) -> SchemaResult<()>;

    async fn drop_role(&mut self, role: &str) -> SchemaResult<()>;

    async fn touch(&mut self, database: &str) -> SchemaResult<()>;

    /// Load the sample dataset using the tenant's own credentials.
    async fn load_sample_data(&mut self, target: &ConnectionDescriptor) -> SchemaResult<()>;

    async fn verify_connectivity(&mut self, target: &ConnectionDescriptor) -> SchemaResult<()>;

    /// Point the metadata row of `database` at another login role.
    async fn update_role(&mut self, database: &str, role: &str) -> SchemaResult<()>;

    async fn set_password(&mut self, role: &str, password: &str) -> SchemaResult<()>;

    /// Create a login role with full privileges on `database` and on every
    /// user schema, table and sequence inside it.
    async fn create_login_role(
        &mut self,
        database: &str,
        role: &str,
        password: &str,
    ) -> SchemaResult<()>;

    /// Hand what `role` owns in `database` to `successor`, then drop `role`.
    async fn retire_role(&mut self, database: &str, role: &str, successor: &str)
    -> SchemaResult<()>;

    /// Revoke what `role` holds in `database` and drop it, if it exists.
    async fn discard_role(&mut self, database: &str, role: &str) -> SchemaResult<()>;
}

/// [`ClusterAdmin`] backed by a live admin connection.
pub struct PgClusterAdmin {
    conn: PgConnection,
    descriptor: ConnectionDescriptor,
}

impl PgClusterAdmin {
    /// `descriptor` is what `conn` was opened with; it is reused to reach
    /// tenant databases on the same cluster.
    pub fn new(conn: PgConnection, descriptor: ConnectionDescriptor) -> Self {
        Self { conn, descriptor }
    }

    pub async fn connect(admin: &ConnectionDescriptor) -> SchemaResult<Self> {
        let conn = PgConnection::connect_with(&admin.connect_options()).await?;
        debug!(host = %admin.host, port = admin.port, "Connected to admin cluster");
        Ok(Self::new(conn, admin.clone()))
    }

    async fn tenant_connection(&self, database: &str) -> SchemaResult<PgConnection> {
        let target = self.descriptor.with_database(database);
        Ok(PgConnection::connect_with(&target.connect_options()).await?)
    }

    /// Create the `provisioned_dbs` metadata table if it does not exist.
    pub async fn ensure_metadata_table(&mut self) -> SchemaResult<()> {
        self.conn
            .execute(queries::postgres::CREATE_METADATA_TABLE)
            .await?;
        Ok(())
    }

    pub async fn close(self) -> SchemaResult<()> {
        self.conn.close().await?;
        Ok(())
    }
}

/// Build a utility statement with server-side `format()` and run it.
///
/// `template` is a `SELECT format(...)` query whose placeholders are all
/// bound from `args` as text.
pub(crate) async fn execute_formatted(
    conn: &mut PgConnection,
    template: &str,
    args: &[&str],
) -> SchemaResult<()> {
    let mut query = sqlx::query_scalar::<_, String>(template);
    for arg in args {
        query = query.bind(*arg);
    }
    let statement = query.fetch_one(&mut *conn).await?;
    conn.execute(statement.as_str()).await?;
    Ok(())
}

fn record_from_row(row: &PgRow) -> SchemaResult<ProvisionedDatabase> {
    let status: String = row.get("status");
    let status = status.parse::<ProvisionStatus>().map_err(SchemaError::internal)?;
    Ok(ProvisionedDatabase {
        id: row.get("id"),
        session_id: row.get("session_id"),
        db_name: row.get("db_name"),
        db_role: row.get("db_role"),
        mode: row.get("mode"),
        status,
        created_at: row.get("created_at"),
        last_used_at: row.get("last_used_at"),
    })
}

impl ClusterAdmin for PgClusterAdmin {
    async fn active_counts(&mut self, session_id: Option<&str>) -> SchemaResult<QuotaUsage> {
        let global: i64 = sqlx::query_scalar(queries::postgres::COUNT_ACTIVE)
            .fetch_one(&mut self.conn)
            .await?;
        let session = match session_id {
            Some(session_id) => {
                sqlx::query_scalar(queries::postgres::COUNT_ACTIVE_FOR_SESSION)
                    .bind(session_id)
                    .fetch_one(&mut self.conn)
                    .await?
            }
            None => 0,
        };
        Ok(QuotaUsage { session, global })
    }

    async fn create_role(
        &mut self,
        role: &str,
        password: &str,
        limits: &RoleLimits,
    ) -> SchemaResult<()> {
        let connection_limit = limits.connection_limit.to_string();
        execute_formatted(
            &mut self.conn,
            queries::postgres::CREATE_ROLE,
            &[role, password, &connection_limit],
        )
        .await?;

        let statement_timeout = limits.statement_timeout_ms.to_string();
        execute_formatted(
            &mut self.conn,
            queries::postgres::SET_ROLE_STATEMENT_TIMEOUT,
            &[role, &statement_timeout],
        )
        .await?;

        let idle_timeout = limits.idle_in_transaction_timeout_ms.to_string();
        execute_formatted(
            &mut self.conn,
            queries::postgres::SET_ROLE_IDLE_TIMEOUT,
            &[role, &idle_timeout],
        )
        .await?;

        debug!(role = %role, "Created tenant role");
        Ok(())
    }

    async fn create_database(&mut self, database: &str, owner: &str) -> SchemaResult<()> {
        execute_formatted(
            &mut self.conn,
            queries::postgres::CREATE_DATABASE,
            &[database, owner],
        )
        .await?;
        debug!(db_name = %database, owner = %owner, "Created tenant database");
        Ok(())
    }

    async fn record_metadata(&mut self, record: &NewProvisionRecord) -> SchemaResult<i64> {
        let id = sqlx::query_scalar(queries::postgres::INSERT_RECORD)
            .bind(record.session_id.as_deref())
            .bind(&record.db_name)
            .bind(&record.db_role)
            .bind(record.mode.as_str())
            .bind(ProvisionStatus::Active.as_str())
            .fetch_one(&mut self.conn)
            .await?;
        Ok(id)
    }

    async fn set_status(&mut self, database: &str, status: ProvisionStatus) -> SchemaResult<()> {
        sqlx::query(queries::postgres::SET_STATUS)
            .bind(status.as_str())
            .bind(database)
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn find_record(
        &mut self,
        lookup: &RecordLookup,
    ) -> SchemaResult<Option<ProvisionedDatabase>> {
        let row = match lookup {
            RecordLookup::DbName(name) => {
                sqlx::query(queries::postgres::FIND_BY_NAME)
                    .bind(name)
                    .fetch_optional(&mut self.conn)
                    .await?
            }
            RecordLookup::Id(id) => {
                sqlx::query(queries::postgres::FIND_BY_ID)
                    .bind(id)
                    .fetch_optional(&mut self.conn)
                    .await?
            }
        };
        row.as_ref().map(record_from_row).transpose()
    }

    async fn stale_records(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> SchemaResult<Vec<ProvisionedDatabase>> {
        let rows = sqlx::query(queries::postgres::STALE_RECORDS)
            .bind(cutoff)
            .fetch_all(&mut self.conn)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn terminate_connections(&mut self, database: &str) -> SchemaResult<u64> {
        let terminated = sqlx::query(queries::postgres::TERMINATE_CONNECTIONS)
            .bind(database)
            .fetch_all(&mut self.conn)
            .await?;
        Ok(terminated.len() as u64)
    }

    async fn drop_database(&mut self, database: &str) -> SchemaResult<()> {
        execute_formatted(&mut self.conn, queries::postgres::DROP_DATABASE, &[database]).await
    }

    async fn drop_role(&mut self, role: &str) -> SchemaResult<()> {
        execute_formatted(&mut self.conn, queries::postgres::DROP_ROLE, &[role]).await
    }

    async fn touch(&mut self, database: &str) -> SchemaResult<()> {
        sqlx::query(queries::postgres::TOUCH)
            .bind(database)
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn load_sample_data(&mut self, target: &ConnectionDescriptor) -> SchemaResult<()> {
        let mut conn = PgConnection::connect_with(&target.connect_options()).await?;

        let mut tx = conn.begin().await?;
        (&mut *tx).execute(SAMPLE_DATA_SQL).await?;
        tx.commit().await?;

        let customers: i64 = sqlx::query_scalar(queries::postgres::COUNT_SAMPLE_CUSTOMERS)
            .fetch_one(&mut conn)
            .await?;
        conn.close().await?;

        if customers == 0 {
            return Err(SchemaError::provisioning(
                "sample_data",
                "sample dataset loaded but sales.customers is empty",
            ));
        }
        info!(db_name = %target.dbname, customers, "Loaded sample dataset");
        Ok(())
    }

    async fn verify_connectivity(&mut self, target: &ConnectionDescriptor) -> SchemaResult<()> {
        verify_connectivity(target).await
    }

    async fn update_role(&mut self, database: &str, role: &str) -> SchemaResult<()> {
        sqlx::query(queries::postgres::UPDATE_ROLE)
            .bind(role)
            .bind(database)
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn set_password(&mut self, role: &str, password: &str) -> SchemaResult<()> {
        execute_formatted(&mut self.conn, queries::postgres::SET_PASSWORD, &[role, password]).await
    }

    async fn create_login_role(
        &mut self,
        database: &str,
        role: &str,
        password: &str,
    ) -> SchemaResult<()> {
        execute_formatted(
            &mut self.conn,
            queries::postgres::CREATE_LOGIN_ROLE,
            &[role, password],
        )
        .await?;
        execute_formatted(
            &mut self.conn,
            queries::postgres::GRANT_DATABASE,
            &[database, role],
        )
        .await?;

        let mut conn = self.tenant_connection(database).await?;
        let schemas: Vec<String> = sqlx::query_scalar(queries::postgres::USER_SCHEMAS)
            .fetch_all(&mut conn)
            .await?;
        for schema in &schemas {
            for template in [
                queries::postgres::GRANT_SCHEMA,
                queries::postgres::GRANT_TABLES,
                queries::postgres::GRANT_SEQUENCES,
            ] {
                execute_formatted(&mut conn, template, &[schema.as_str(), role]).await?;
            }
        }
        conn.close().await?;
        debug!(role = %role, db_name = %database, schemas = schemas.len(), "Created login role");
        Ok(())
    }

    async fn retire_role(
        &mut self,
        database: &str,
        role: &str,
        successor: &str,
    ) -> SchemaResult<()> {
        let mut conn = self.tenant_connection(database).await?;
        execute_formatted(&mut conn, queries::postgres::REASSIGN_OWNED, &[role, successor]).await?;
        execute_formatted(&mut conn, queries::postgres::DROP_OWNED, &[role]).await?;
        conn.close().await?;
        execute_formatted(&mut self.conn, queries::postgres::DROP_ROLE, &[role]).await?;
        debug!(role = %role, successor = %successor, "Retired login role");
        Ok(())
    }

    async fn discard_role(&mut self, database: &str, role: &str) -> SchemaResult<()> {
        let mut conn = self.tenant_connection(database).await?;
        execute_formatted(&mut conn, queries::postgres::DROP_OWNED_IF_EXISTS, &[role]).await?;
        conn.close().await?;
        execute_formatted(&mut self.conn, queries::postgres::DROP_ROLE, &[role]).await
    }
}

/// Open a connection with `target` and run `SELECT 1`.
pub async fn verify_connectivity(target: &ConnectionDescriptor) -> SchemaResult<()> {
    let mut conn = PgConnection::connect_with(&target.connect_options()).await?;
    let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&mut conn).await?;
    conn.close().await?;
    if one != 1 {
        return Err(SchemaError::connection(
            "connectivity check returned an unexpected value",
            "Check that the server is a PostgreSQL instance",
        ));
    }
    Ok(())
}

// =============================================================================
// SQL Query Templates
// =============================================================================

mod queries {
    pub mod postgres {
        pub const CREATE_METADATA_TABLE: &str = r#"
            CREATE TABLE IF NOT EXISTS provisioned_dbs (
                id BIGSERIAL PRIMARY KEY,
                session_id TEXT,
                db_name TEXT NOT NULL UNIQUE,
                db_role TEXT NOT NULL,
                mode TEXT NOT NULL DEFAULT 'managed',
                status TEXT NOT NULL DEFAULT 'active',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                last_used_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#;

        pub const COUNT_ACTIVE: &str =
            "SELECT COUNT(*) FROM provisioned_dbs WHERE status = 'active'";

        pub const COUNT_ACTIVE_FOR_SESSION: &str =
            "SELECT COUNT(*) FROM provisioned_dbs WHERE status = 'active' AND session_id = $1";

        pub const CREATE_ROLE: &str = "SELECT format('CREATE ROLE %I LOGIN PASSWORD %L NOSUPERUSER NOCREATEDB NOCREATEROLE NOREPLICATION CONNECTION LIMIT %s', $1::text, $2::text, $3::int)";

        pub const SET_ROLE_STATEMENT_TIMEOUT: &str =
            "SELECT format('ALTER ROLE %I SET statement_timeout = %L', $1::text, $2::text)";

        pub const SET_ROLE_IDLE_TIMEOUT: &str = "SELECT format('ALTER ROLE %I SET idle_in_transaction_session_timeout = %L', $1::text, $2::text)";

        pub const CREATE_DATABASE: &str =
            "SELECT format('CREATE DATABASE %I OWNER %I', $1::text, $2::text)";

        pub const DROP_DATABASE: &str = "SELECT format('DROP DATABASE IF EXISTS %I', $1::text)";

        pub const DROP_ROLE: &str = "SELECT format('DROP ROLE IF EXISTS %I', $1::text)";

        pub const INSERT_RECORD: &str = r#"
            INSERT INTO provisioned_dbs (session_id, db_name, db_role, mode, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#;

        pub const SET_STATUS: &str = "UPDATE provisioned_dbs SET status = $1 WHERE db_name = $2";

        pub const FIND_BY_NAME: &str = r#"
            SELECT id, session_id, db_name, db_role, mode, status, created_at, last_used_at
            FROM provisioned_dbs
            WHERE db_name = $1
            "#;

        pub const FIND_BY_ID: &str = r#"
            SELECT id, session_id, db_name, db_role, mode, status, created_at, last_used_at
            FROM provisioned_dbs
            WHERE id = $1
            "#;

        pub const STALE_RECORDS: &str = r#"
            SELECT id, session_id, db_name, db_role, mode, status, created_at, last_used_at
            FROM provisioned_dbs
            WHERE status = 'active' AND last_used_at < $1
            ORDER BY last_used_at
            "#;

        pub const TERMINATE_CONNECTIONS: &str = r#"
            SELECT pg_terminate_backend(pid)
            FROM pg_stat_activity
            WHERE datname = $1 AND pid <> pg_backend_pid()
            "#;

        pub const TOUCH: &str = "UPDATE provisioned_dbs SET last_used_at = now() WHERE db_name = $1 AND status = 'active'";

        pub const COUNT_SAMPLE_CUSTOMERS: &str = "SELECT COUNT(*) FROM sales.customers";

        pub const UPDATE_ROLE: &str = "UPDATE provisioned_dbs SET db_role = $1 WHERE db_name = $2";

        pub const SET_PASSWORD: &str =
            "SELECT format('ALTER ROLE %I WITH PASSWORD %L', $1::text, $2::text)";

        pub const CREATE_LOGIN_ROLE: &str =
            "SELECT format('CREATE ROLE %I LOGIN PASSWORD %L', $1::text, $2::text)";

        pub const GRANT_DATABASE: &str =
            "SELECT format('GRANT ALL PRIVILEGES ON DATABASE %I TO %I', $1::text, $2::text)";

        pub const GRANT_SCHEMA: &str =
            "SELECT format('GRANT ALL ON SCHEMA %I TO %I', $1::text, $2::text)";

        pub const GRANT_TABLES: &str =
            "SELECT format('GRANT ALL ON ALL TABLES IN SCHEMA %I TO %I', $1::text, $2::text)";

        pub const GRANT_SEQUENCES: &str =
            "SELECT format('GRANT ALL ON ALL SEQUENCES IN SCHEMA %I TO %I', $1::text, $2::text)";

        pub const USER_SCHEMAS: &str = r#"
            SELECT nspname::text
            FROM pg_catalog.pg_namespace
            WHERE nspname NOT IN ('pg_catalog', 'information_schema')
              AND nspname NOT LIKE 'pg\_%'
            ORDER BY nspname
            "#;

        pub const REASSIGN_OWNED: &str =
            "SELECT format('REASSIGN OWNED BY %I TO %I', $1::text, $2::text)";

        pub const DROP_OWNED: &str = "SELECT format('DROP OWNED BY %I', $1::text)";

        pub const DROP_OWNED_IF_EXISTS: &str = r#"
            SELECT CASE
                WHEN EXISTS (SELECT 1 FROM pg_catalog.pg_roles WHERE rolname = $1::text)
                THEN format('DROP OWNED BY %I', $1::text)
                ELSE 'SELECT 1'
            END
            "#;
    }
}
