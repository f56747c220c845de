//! Tenant database lifecycle: provision, deprovision and the TTL sweep.
//!
//! A provisioning attempt moves through [`ProvisionStage`]s. If a step on
//! the cluster fails, the steps already completed are undone in reverse
//! order. Cleanup failures are logged and never replace the original error.
//! When the new credentials cannot log in, the database and role are dropped
//! and the metadata row is flagged `error`. A failed sample-data load keeps
//! the database and only flags the row.

use crate::db::context::DatabaseContext;
use crate::error::{SchemaError, SchemaResult};
use crate::models::{
    ConnectionDescriptor, NewProvisionRecord, ProvisionMode, ProvisionStatus, RecordLookup,
};
use crate::provision::admin::{ClusterAdmin, RoleLimits};
use crate::provision::credentials;
use crate::provision::names::{TenantNames, generate_password};
use chrono::Utc;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Quotas and defaults applied to every provisioning attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionSettings {
    pub max_dbs_per_session: i64,
    pub global_max_dbs: i64,
    pub role_limits: RoleLimits,
    pub enable_sample_data: bool,
}

/// Progress of one provisioning attempt, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProvisionStage {
    Requested,
    RoleCreated,
    DatabaseCreated,
    MetadataRecorded,
    ConnectivityVerified,
    SampleDataLoaded,
    Active,
}

impl ProvisionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::RoleCreated => "role_created",
            Self::DatabaseCreated => "db_created",
            Self::MetadataRecorded => "metadata_recorded",
            Self::ConnectivityVerified => "connectivity_verified",
            Self::SampleDataLoaded => "sample_data_loaded",
            Self::Active => "active",
        }
    }
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A freshly provisioned tenant database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedTenant {
    pub record_id: i64,
    pub descriptor: ConnectionDescriptor,
}

/// Creates and removes tenant databases on a shared cluster.
pub struct TenantProvisioner<A: ClusterAdmin> {
    admin: A,
    settings: ProvisionSettings,
    host: String,
    port: u16,
}

impl<A: ClusterAdmin> TenantProvisioner<A> {
    /// `host` and `port` are what tenants use to reach the cluster.
    pub fn new(admin: A, settings: ProvisionSettings, host: impl Into<String>, port: u16) -> Self {
        Self {
            admin,
            settings,
            host: host.into(),
            port,
        }
    }

    pub fn settings(&self) -> &ProvisionSettings {
        &self.settings
    }

    pub fn admin(&self) -> &A {
        &self.admin
    }

    /// Create a new isolated database and login role.
    ///
    /// Quota is checked before anything is created. A quota check that
    /// cannot run (as opposed to one that fails) lets the attempt proceed.
    pub async fn provision(&mut self, session_id: Option<&str>) -> SchemaResult<ProvisionedTenant> {
        self.check_quota(session_id).await?;

        let names = TenantNames::generate();
        let password = generate_password();
        info!(
            db_name = %names.database,
            db_role = %names.role,
            session_id = session_id.unwrap_or("-"),
            "Provisioning tenant database"
        );

        let mut stage = ProvisionStage::Requested;
        let record_id = match self.create_on_cluster(&names, &password, session_id, &mut stage).await
        {
            Ok(id) => id,
            Err(e) => {
                error!(
                    db_name = %names.database,
                    stage = %stage,
                    error = %e,
                    "Provisioning failed, cleaning up"
                );
                self.compensate(stage, &names).await;
                return Err(e);
            }
        };

        let descriptor = ConnectionDescriptor::new(
            &self.host,
            self.port,
            &names.database,
            &names.role,
            password,
        );

        if let Err(e) = self.admin.verify_connectivity(&descriptor).await {
            error!(
                db_name = %names.database,
                stage = %stage,
                error = %e,
                "New tenant credentials cannot connect, cleaning up"
            );
            self.compensate(stage, &names).await;
            self.flag_error(&names.database).await;
            return Err(SchemaError::provisioning(
                ProvisionStage::ConnectivityVerified.as_str(),
                e.to_string(),
            ));
        }
        stage = ProvisionStage::ConnectivityVerified;
        debug!(db_name = %names.database, stage = %stage, "Tenant credentials verified");

        if self.settings.enable_sample_data {
            if let Err(e) = self.admin.load_sample_data(&descriptor).await {
                warn!(db_name = %names.database, error = %e, "Sample data load failed");
                self.flag_error(&names.database).await;
                return Err(SchemaError::provisioning(
                    ProvisionStage::SampleDataLoaded.as_str(),
                    e.to_string(),
                ));
            }
            stage = ProvisionStage::SampleDataLoaded;
            debug!(db_name = %names.database, stage = %stage, "Sample data loaded");
        }

        stage = ProvisionStage::Active;
        info!(db_name = %names.database, record_id, stage = %stage, "Tenant database ready");
        Ok(ProvisionedTenant {
            record_id,
            descriptor,
        })
    }

    async fn check_quota(&mut self, session_id: Option<&str>) -> SchemaResult<()> {
        let usage = match self.admin.active_counts(session_id).await {
            Ok(usage) => usage,
            Err(e) => {
                warn!(error = %e, "Quota check failed; allowing provisioning");
                return Ok(());
            }
        };

        if let Some(session_id) = session_id {
            if usage.session >= self.settings.max_dbs_per_session {
                return Err(SchemaError::quota_exceeded(
                    format!("session '{}'", session_id),
                    usage.session,
                    self.settings.max_dbs_per_session,
                ));
            }
        }
        if usage.global >= self.settings.global_max_dbs {
            return Err(SchemaError::quota_exceeded(
                "cluster",
                usage.global,
                self.settings.global_max_dbs,
            ));
        }
        Ok(())
    }

    /// Role, database and metadata row. `stage` records the last step done.
    async fn create_on_cluster(
        &mut self,
        names: &TenantNames,
        password: &str,
        session_id: Option<&str>,
        stage: &mut ProvisionStage,
    ) -> SchemaResult<i64> {
        self.admin
            .create_role(&names.role, password, &self.settings.role_limits)
            .await
            .map_err(|e| SchemaError::provisioning("create_role", e.to_string()))?;
        *stage = ProvisionStage::RoleCreated;

        self.admin
            .create_database(&names.database, &names.role)
            .await
            .map_err(|e| SchemaError::provisioning("create_database", e.to_string()))?;
        *stage = ProvisionStage::DatabaseCreated;

        let record = NewProvisionRecord {
            session_id: session_id.map(str::to_string),
            db_name: names.database.clone(),
            db_role: names.role.clone(),
            mode: ProvisionMode::Managed,
        };
        let id = self
            .admin
            .record_metadata(&record)
            .await
            .map_err(|e| SchemaError::provisioning("record_metadata", e.to_string()))?;
        *stage = ProvisionStage::MetadataRecorded;
        Ok(id)
    }

    async fn flag_error(&mut self, database: &str) {
        if let Err(e) = self.admin.set_status(database, ProvisionStatus::Error).await {
            warn!(
                db_name = %database,
                error = %e,
                "Could not flag tenant database as errored"
            );
        }
    }

    /// Undo completed steps in reverse order.
    async fn compensate(&mut self, stage: ProvisionStage, names: &TenantNames) {
        if stage >= ProvisionStage::DatabaseCreated {
            if let Err(e) = self.admin.drop_database(&names.database).await {
                error!(db_name = %names.database, error = %e, "Cleanup: drop database failed");
            }
        }
        if stage >= ProvisionStage::RoleCreated {
            if let Err(e) = self.admin.drop_role(&names.role).await {
                error!(db_role = %names.role, error = %e, "Cleanup: drop role failed");
            }
        }
    }

    /// Drop a tenant database and its role, then mark the record deleted.
    ///
    /// Returns `false` when the record was already deleted.
    pub async fn deprovision(&mut self, lookup: &RecordLookup) -> SchemaResult<bool> {
        let record = self
            .admin
            .find_record(lookup)
            .await?
            .ok_or_else(|| SchemaError::not_found(format!("No provisioned database with {}", lookup)))?;

        if record.status == ProvisionStatus::Deleted {
            debug!(db_name = %record.db_name, "Already deprovisioned");
            return Ok(false);
        }

        let terminated = self.admin.terminate_connections(&record.db_name).await?;
        if terminated > 0 {
            debug!(db_name = %record.db_name, terminated, "Terminated tenant connections");
        }
        self.admin.drop_database(&record.db_name).await?;
        self.admin.drop_role(&record.db_role).await?;
        self.admin
            .set_status(&record.db_name, ProvisionStatus::Deleted)
            .await?;

        info!(db_name = %record.db_name, record_id = record.id, "Deprovisioned tenant database");
        Ok(true)
    }

    /// Deprovision every active database idle for longer than `ttl`.
    ///
    /// Individual failures are logged and skipped. Returns how many databases
    /// were removed, or would be removed when `dry_run` is set.
    pub async fn cleanup_stale(&mut self, ttl: Duration, dry_run: bool) -> SchemaResult<usize> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| SchemaError::invalid_input(format!("Invalid TTL: {}", e)))?;
        let cutoff = Utc::now() - ttl;
        let stale = self.admin.stale_records(cutoff).await?;
        info!(candidates = stale.len(), dry_run, "TTL cleanup started");

        let mut cleaned = 0;
        for record in stale {
            if dry_run {
                info!(
                    db_name = %record.db_name,
                    last_used_at = %record.last_used_at,
                    "Would deprovision stale database"
                );
                cleaned += 1;
                continue;
            }
            match self.deprovision(&RecordLookup::Id(record.id)).await {
                Ok(true) => cleaned += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(db_name = %record.db_name, error = %e, "Failed to deprovision stale database");
                }
            }
        }

        info!(cleaned, dry_run, "TTL cleanup finished");
        Ok(cleaned)
    }

    /// Rotate the credentials of `ctx`'s connection through this cluster.
    ///
    /// A username change also moves the tenant's metadata row to the new
    /// role, so a later deprovision drops the role that is actually in use.
    pub async fn rotate_credentials(
        &mut self,
        ctx: &DatabaseContext,
        new_user: &str,
        new_password: &str,
    ) -> SchemaResult<ConnectionDescriptor> {
        credentials::rotate_credentials(ctx, &mut self.admin, new_user, new_password).await
    }

    /// Record activity on a tenant database. Never fails the caller.
    pub async fn touch(&mut self, database: &str) {
        if let Err(e) = self.admin.touch(database).await {
            warn!(db_name = %database, error = %e, "Failed to update last_used_at");
        }
    }
}
