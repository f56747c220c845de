//! schemasense - command line entry point.
//!
//! Schema commands work against `--database-url`; provisioning commands work
//! against `--admin-dsn`. Results are printed to stdout, logs go to stderr.

use schemasense_core::config::{Command, Config};
use schemasense_core::db::{
    DatabaseContext, JsonRow, apply_ddl_script, apply_edit_actions, insert_rows, plan_edit_actions,
};
use schemasense_core::error::{SchemaError, SchemaResult};
use schemasense_core::models::{RecordLookup, TableRef, redact_dsn};
use schemasense_core::provision::{PgClusterAdmin, TenantProvisioner};
use schemasense_core::schema::{CanonicalSchemaModel, EditAction};
use schemasense_core::tools::validate_and_normalize_sql;
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn print_json<T: Serialize>(value: &T) -> SchemaResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| SchemaError::internal(format!("Failed to serialize output: {}", e)))?;
    println!("{}", text);
    Ok(())
}

async fn read_file(path: &Path) -> SchemaResult<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        SchemaError::invalid_input(format!("Cannot read {}: {}", path.display(), e))
    })
}

fn parse_json<T: serde::de::DeserializeOwned>(text: &str, what: &str) -> SchemaResult<T> {
    serde_json::from_str(text)
        .map_err(|e| SchemaError::invalid_input(format!("Invalid {}: {}", what, e)))
}

async fn provisioner(config: &Config) -> SchemaResult<TenantProvisioner<PgClusterAdmin>> {
    let admin = config.admin_descriptor()?;
    info!(admin = %redact_dsn(config.admin_dsn.as_deref().unwrap_or_default()), "Using admin cluster");
    let mut cluster = PgClusterAdmin::connect(&admin).await?;
    cluster.ensure_metadata_table().await?;
    Ok(TenantProvisioner::new(
        cluster,
        config.provision_settings(),
        admin.host,
        admin.port,
    ))
}

async fn run(config: &Config, command: &Command) -> SchemaResult<()> {
    match command {
        Command::Introspect { ddl } => {
            let ctx = DatabaseContext::with_descriptor(config.database_descriptor()?);
            let mut conn = ctx.connect().await?;
            let model = ctx.cache().refresh(&mut conn).await?;
            if *ddl {
                println!("{}", model.to_ddl());
            } else {
                print_json(&model.to_dict_for_api())?;
            }
        }

        Command::Ddl { file, json } => {
            let model = CanonicalSchemaModel::from_ddl(&read_file(file).await?)?;
            if *json {
                print_json(&model.to_dict_for_api())?;
            } else {
                println!("{}", model.to_ddl());
            }
        }

        Command::ValidateSql { sql, schema_file } => {
            let model = match schema_file {
                Some(path) => CanonicalSchemaModel::from_ddl(&read_file(path).await?)?,
                None => {
                    let ctx = DatabaseContext::with_descriptor(config.database_descriptor()?);
                    let mut conn = ctx.connect().await?;
                    let model = ctx.cache().refresh(&mut conn).await?;
                    (*model).clone()
                }
            };
            let validated = validate_and_normalize_sql(sql, &model)?;
            print_json(&json!({
                "sql": validated.normalized_sql(),
                "warnings": validated.warnings,
                "executable": validated.is_executable(),
            }))?;
        }

        Command::ApplyDdl { file } => {
            let ddl = read_file(file).await?;
            let ctx = DatabaseContext::with_descriptor(config.database_descriptor()?);
            let mut conn = ctx.connect().await?;
            let applied = apply_ddl_script(&mut conn, ctx.cache(), &ddl).await?;
            print_json(&json!({
                "statements": applied.statements,
                "tables": applied.model.table_count(),
            }))?;
        }

        Command::Edit { file, dry_run } => {
            let actions: Vec<EditAction> = parse_json(&read_file(file).await?, "edit actions")?;
            let ctx = DatabaseContext::with_descriptor(config.database_descriptor()?);
            let mut conn = ctx.connect().await?;
            if *dry_run {
                let model = ctx.cache().get_or_refresh(&mut conn).await?;
                let (_, statements) = plan_edit_actions(&model, &actions)?;
                print_json(&json!({ "statements": statements, "executed": false }))?;
            } else {
                let applied = apply_edit_actions(&mut conn, ctx.cache(), &actions).await?;
                print_json(&json!({
                    "statements": applied.statements,
                    "executed": true,
                    "schema": applied.model.to_dict_for_api(),
                }))?;
            }
        }

        Command::InsertRows { table, file } => {
            let rows: Vec<JsonRow> = parse_json(&read_file(file).await?, "rows")?;
            let ctx = DatabaseContext::with_descriptor(config.database_descriptor()?);
            let mut conn = ctx.connect().await?;
            let model = ctx.cache().get_or_refresh(&mut conn).await?;
            let outcome = insert_rows(&mut conn, &model, &TableRef::parse(table), rows).await?;
            print_json(&outcome)?;
        }

        Command::Provision { session } => {
            let mut provisioner = provisioner(config).await?;
            let tenant = provisioner.provision(session.as_deref()).await?;
            print_json(&json!({
                "id": tenant.record_id,
                "connection": tenant.descriptor,
            }))?;
        }

        Command::Deprovision { db_name, id } => {
            let lookup = match (db_name, id) {
                (_, Some(id)) => RecordLookup::Id(*id),
                (Some(name), None) => RecordLookup::DbName(name.clone()),
                (None, None) => {
                    return Err(SchemaError::invalid_input("Pass --db-name or --id"));
                }
            };
            let mut provisioner = provisioner(config).await?;
            let dropped = provisioner.deprovision(&lookup).await?;
            print_json(&json!({ "target": lookup.to_string(), "dropped": dropped }))?;
        }

        Command::CleanupTtl { dry_run } => {
            let mut provisioner = provisioner(config).await?;
            let cleaned = provisioner
                .cleanup_stale(config.ttl_duration(), *dry_run)
                .await?;
            print_json(&json!({ "cleaned": cleaned, "dry_run": dry_run }))?;
        }

        Command::RotateCredentials { user, password } => {
            let ctx = DatabaseContext::with_descriptor(config.database_descriptor()?);
            let mut provisioner = provisioner(config).await?;
            let rotated = provisioner.rotate_credentials(&ctx, user, password).await?;
            print_json(&json!({
                "user": rotated.user,
                "dbname": rotated.dbname,
                "host": rotated.host,
                "port": rotated.port,
            }))?;
        }

        Command::Touch { db_name } => {
            let mut provisioner = provisioner(config).await?;
            provisioner.touch(db_name).await;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    if let Err(msg) = config.validate() {
        eprintln!("Error: {}", msg);
        std::process::exit(2);
    }

    let Some(command) = config.command.clone() else {
        eprintln!("Error: no command given. Run `schemasense --help` for usage.");
        std::process::exit(2);
    };

    info!("Starting schemasense v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&config, &command).await {
        error!(error = %e, "Command failed");
        if let Some(suggestion) = e.suggestion() {
            eprintln!("Hint: {}", suggestion);
        }
        return Err(e.into());
    }
    Ok(())
}
