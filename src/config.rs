//! Configuration handling for the schemasense CLI.
//!
//! Settings come from CLI arguments and `SCHEMASENSE_*` environment
//! variables. Provisioning limits are turned into a [`ProvisionSettings`]
//! value for the provisioner.

use crate::error::{SchemaError, SchemaResult};
use crate::models::ConnectionDescriptor;
use crate::provision::{ProvisionSettings, RoleLimits};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_DBS_PER_SESSION: i64 = 3;
pub const DEFAULT_GLOBAL_MAX_DBS: i64 = 50;
pub const DEFAULT_CONNECTION_LIMIT: i32 = 5;
pub const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_IDLE_IN_TRANSACTION_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_TTL_DAYS: u64 = 14;
pub const DEFAULT_LOG_LEVEL: &str = "info";

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Configuration for the schemasense CLI.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "schemasense",
    about = "Schema model, SQL validation, DDL execution and tenant provisioning for PostgreSQL",
    version,
    author
)]
pub struct Config {
    /// Connection URL of the database schema commands operate on
    #[arg(long, value_name = "URL", env = "SCHEMASENSE_DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Superuser URL of the shared cluster used for provisioning
    #[arg(long, value_name = "URL", env = "SCHEMASENSE_ADMIN_DSN", global = true)]
    pub admin_dsn: Option<String>,

    /// Active databases allowed per session
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_DBS_PER_SESSION,
        env = "SCHEMASENSE_PROVISION_MAX_DBS_PER_SESSION",
        global = true
    )]
    pub provision_max_dbs_per_session: i64,

    /// Active databases allowed on the cluster
    #[arg(
        long,
        default_value_t = DEFAULT_GLOBAL_MAX_DBS,
        env = "SCHEMASENSE_PROVISION_GLOBAL_MAX_DBS",
        global = true
    )]
    pub provision_global_max_dbs: i64,

    /// Connection limit set on each tenant role
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECTION_LIMIT,
        env = "SCHEMASENSE_PROVISION_CONNECTION_LIMIT",
        global = true
    )]
    pub provision_connection_limit: i32,

    /// statement_timeout set on each tenant role, in milliseconds
    #[arg(
        long,
        default_value_t = DEFAULT_STATEMENT_TIMEOUT_MS,
        env = "SCHEMASENSE_PROVISION_STATEMENT_TIMEOUT_MS",
        global = true
    )]
    pub provision_statement_timeout_ms: u64,

    /// idle_in_transaction_session_timeout set on each tenant role, in milliseconds
    #[arg(
        long,
        default_value_t = DEFAULT_IDLE_IN_TRANSACTION_TIMEOUT_MS,
        env = "SCHEMASENSE_PROVISION_IDLE_IN_TRANSACTION_TIMEOUT_MS",
        global = true
    )]
    pub provision_idle_in_transaction_timeout_ms: u64,

    /// Load the sample sales dataset into new databases
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        env = "SCHEMASENSE_ENABLE_SAMPLE_DATA",
        global = true
    )]
    pub enable_sample_data: bool,

    /// Idle days after which the TTL sweep removes a database
    #[arg(
        long,
        default_value_t = DEFAULT_TTL_DAYS,
        env = "SCHEMASENSE_TTL_DAYS",
        global = true
    )]
    pub ttl_days: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "SCHEMASENSE_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "SCHEMASENSE_JSON_LOGS", global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Introspect the database and print the schema document
    Introspect {
        /// Print DDL instead of JSON
        #[arg(long)]
        ddl: bool,
    },

    /// Parse a DDL file into the schema model and print it back as DDL
    Ddl {
        file: PathBuf,
        /// Print the JSON document instead of DDL
        #[arg(long)]
        json: bool,
    },

    /// Validate and normalize SQL against the schema
    ValidateSql {
        sql: String,
        /// Validate against a DDL file instead of the live database
        #[arg(long, value_name = "FILE")]
        schema_file: Option<PathBuf>,
    },

    /// Validate a DDL script and execute it in one transaction
    ApplyDdl { file: PathBuf },

    /// Apply a JSON array of edit actions
    Edit {
        file: PathBuf,
        /// Print the generated DDL without executing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Insert a JSON array of row objects into a table
    InsertRows {
        /// Table name, optionally schema-qualified
        table: String,
        file: PathBuf,
    },

    /// Create a new tenant database and role
    Provision {
        #[arg(long)]
        session: Option<String>,
    },

    /// Drop a tenant database and role
    Deprovision {
        #[arg(long, conflicts_with = "id", required_unless_present = "id")]
        db_name: Option<String>,
        #[arg(long)]
        id: Option<i64>,
    },

    /// Remove tenant databases idle for longer than the TTL
    CleanupTtl {
        #[arg(long)]
        dry_run: bool,
    },

    /// Change the username and/or password of the configured connection
    RotateCredentials {
        #[arg(long)]
        user: String,
        #[arg(long, env = "SCHEMASENSE_NEW_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Record activity on a tenant database
    Touch { db_name: String },
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            database_url: None,
            admin_dsn: None,
            provision_max_dbs_per_session: DEFAULT_MAX_DBS_PER_SESSION,
            provision_global_max_dbs: DEFAULT_GLOBAL_MAX_DBS,
            provision_connection_limit: DEFAULT_CONNECTION_LIMIT,
            provision_statement_timeout_ms: DEFAULT_STATEMENT_TIMEOUT_MS,
            provision_idle_in_transaction_timeout_ms: DEFAULT_IDLE_IN_TRANSACTION_TIMEOUT_MS,
            enable_sample_data: true,
            ttl_days: DEFAULT_TTL_DAYS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
            command: None,
        }
    }

    /// Validate limits and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.provision_max_dbs_per_session <= 0 {
            return Err("provision_max_dbs_per_session must be greater than 0".to_string());
        }
        if self.provision_global_max_dbs <= 0 {
            return Err("provision_global_max_dbs must be greater than 0".to_string());
        }
        if self.provision_max_dbs_per_session > self.provision_global_max_dbs {
            return Err(format!(
                "provision_max_dbs_per_session ({}) cannot exceed provision_global_max_dbs ({})",
                self.provision_max_dbs_per_session, self.provision_global_max_dbs
            ));
        }
        if self.provision_connection_limit <= 0 {
            return Err("provision_connection_limit must be greater than 0".to_string());
        }
        if self.ttl_days == 0 {
            return Err("ttl_days must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Get the TTL as a Duration.
    pub fn ttl_duration(&self) -> Duration {
        Duration::from_secs(self.ttl_days.saturating_mul(SECS_PER_DAY))
    }

    pub fn role_limits(&self) -> RoleLimits {
        RoleLimits {
            connection_limit: self.provision_connection_limit,
            statement_timeout_ms: self.provision_statement_timeout_ms,
            idle_in_transaction_timeout_ms: self.provision_idle_in_transaction_timeout_ms,
        }
    }

    pub fn provision_settings(&self) -> ProvisionSettings {
        ProvisionSettings {
            max_dbs_per_session: self.provision_max_dbs_per_session,
            global_max_dbs: self.provision_global_max_dbs,
            role_limits: self.role_limits(),
            enable_sample_data: self.enable_sample_data,
        }
    }

    /// Descriptor for `database_url`.
    pub fn database_descriptor(&self) -> SchemaResult<ConnectionDescriptor> {
        let url = self.database_url.as_deref().ok_or_else(|| {
            SchemaError::invalid_input(
                "No database configured; set --database-url or SCHEMASENSE_DATABASE_URL",
            )
        })?;
        ConnectionDescriptor::from_url(url)
    }

    /// Descriptor for `admin_dsn`.
    pub fn admin_descriptor(&self) -> SchemaResult<ConnectionDescriptor> {
        let url = self.admin_dsn.as_deref().ok_or_else(|| {
            SchemaError::invalid_input(
                "No admin cluster configured; set --admin-dsn or SCHEMASENSE_ADMIN_DSN",
            )
        })?;
        ConnectionDescriptor::from_url(url)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.provision_max_dbs_per_session, 3);
        assert_eq!(config.provision_global_max_dbs, 50);
        assert!(config.enable_sample_data);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_defaults_match_default_config() {
        let parsed = Config::try_parse_from(["schemasense"]).unwrap();
        let defaults = Config::default();
        assert_eq!(
            parsed.provision_max_dbs_per_session,
            defaults.provision_max_dbs_per_session
        );
        assert_eq!(parsed.provision_connection_limit, defaults.provision_connection_limit);
        assert_eq!(parsed.ttl_days, defaults.ttl_days);
        assert_eq!(parsed.enable_sample_data, defaults.enable_sample_data);
    }

    #[test]
    fn test_parse_subcommand_with_global_flag() {
        let config = Config::try_parse_from([
            "schemasense",
            "provision",
            "--session",
            "s1",
            "--enable-sample-data",
            "false",
        ])
        .unwrap();
        assert!(!config.enable_sample_data);
        match config.command {
            Some(Command::Provision { session }) => assert_eq!(session.as_deref(), Some("s1")),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_deprovision_requires_target() {
        assert!(Config::try_parse_from(["schemasense", "deprovision"]).is_err());
        assert!(Config::try_parse_from(["schemasense", "deprovision", "--id", "7"]).is_ok());
        assert!(
            Config::try_parse_from(["schemasense", "deprovision", "--id", "7", "--db-name", "x"])
                .is_err()
        );
    }

    #[test]
    fn test_durations() {
        let config = Config {
            ttl_days: 2,
            provision_statement_timeout_ms: 1500,
            ..Config::default()
        };
        assert_eq!(config.ttl_duration(), Duration::from_secs(2 * 86_400));
        assert_eq!(config.role_limits().statement_timeout_ms, 1500);
    }

    #[test]
    fn test_provision_settings() {
        let settings = Config::default().provision_settings();
        assert_eq!(settings.role_limits.connection_limit, 5);
        assert_eq!(settings.role_limits.statement_timeout_ms, 30_000);
        assert_eq!(settings.role_limits.idle_in_transaction_timeout_ms, 60_000);
    }

    #[test]
    fn test_validate_rejects_bad_limits() {
        let config = Config {
            provision_max_dbs_per_session: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            provision_max_dbs_per_session: 10,
            provision_global_max_dbs: 5,
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().contains("cannot exceed"));
    }

    #[test]
    fn test_missing_urls() {
        let config = Config::default();
        assert!(config.database_descriptor().is_err());
        assert!(config.admin_descriptor().is_err());
    }
}
