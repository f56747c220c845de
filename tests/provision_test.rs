//! Integration tests for tenant provisioning against an in-memory cluster.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use schemasense_core::db::DatabaseContext;
use schemasense_core::error::{SchemaError, SchemaResult};
use schemasense_core::models::{
    ConnectionDescriptor, NewProvisionRecord, ProvisionStatus, ProvisionedDatabase, RecordLookup,
};
use schemasense_core::provision::{
    ClusterAdmin, ProvisionSettings, QuotaUsage, RoleLimits, TenantProvisioner,
};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

/// Steps a fake cluster can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailAt {
    CreateRole,
    CreateDatabase,
    RecordMetadata,
    DropDatabase,
    SampleData,
    Quota,
    Verify,
    SetPassword,
    RestorePassword,
    UpdateRole,
    RetireRole,
}

#[derive(Default)]
struct FakeCluster {
    roles: BTreeSet<String>,
    passwords: BTreeMap<String, String>,
    databases: BTreeSet<String>,
    /// Database name to owning role.
    owners: BTreeMap<String, String>,
    password_changes: usize,
    records: Vec<ProvisionedDatabase>,
    fail: Vec<FailAt>,
    terminated: Vec<String>,
    touched: Vec<String>,
}

impl FakeCluster {
    fn failing(fail: &[FailAt]) -> Self {
        Self {
            fail: fail.to_vec(),
            ..Self::default()
        }
    }

    fn check(&self, step: FailAt) -> SchemaResult<()> {
        if self.fail.contains(&step) {
            Err(SchemaError::database(
                format!("injected failure at {:?}", step),
                None,
                "none",
            ))
        } else {
            Ok(())
        }
    }

    fn record_mut(&mut self, database: &str) -> Option<&mut ProvisionedDatabase> {
        self.records.iter_mut().find(|r| r.db_name == database)
    }

    /// A cluster with one existing login role and database.
    fn with_tenant(role: &str, password: &str, database: &str, fail: &[FailAt]) -> Self {
        let mut cluster = Self::failing(fail);
        cluster.roles.insert(role.to_string());
        cluster.passwords.insert(role.to_string(), password.to_string());
        cluster.databases.insert(database.to_string());
        cluster.owners.insert(database.to_string(), role.to_string());
        cluster
    }
}

impl ClusterAdmin for FakeCluster {
    async fn active_counts(&mut self, session_id: Option<&str>) -> SchemaResult<QuotaUsage> {
        self.check(FailAt::Quota)?;
        let active = self
            .records
            .iter()
            .filter(|r| r.status == ProvisionStatus::Active);
        let global = active.clone().count() as i64;
        let session = match session_id {
            Some(s) => active
                .filter(|r| r.session_id.as_deref() == Some(s))
                .count() as i64,
            None => 0,
        };
        Ok(QuotaUsage { session, global })
    }

    async fn create_role(
        &mut self,
        role: &str,
        password: &str,
        _limits: &RoleLimits,
    ) -> SchemaResult<()> {
        self.check(FailAt::CreateRole)?;
        self.roles.insert(role.to_string());
        self.passwords.insert(role.to_string(), password.to_string());
        Ok(())
    }

    async fn create_database(&mut self, database: &str, owner: &str) -> SchemaResult<()> {
        self.check(FailAt::CreateDatabase)?;
        self.databases.insert(database.to_string());
        self.owners.insert(database.to_string(), owner.to_string());
        Ok(())
    }

    async fn record_metadata(&mut self, record: &NewProvisionRecord) -> SchemaResult<i64> {
        self.check(FailAt::RecordMetadata)?;
        let id = self.records.len() as i64 + 1;
        let now = Utc::now();
        self.records.push(ProvisionedDatabase {
            id,
            session_id: record.session_id.clone(),
            db_name: record.db_name.clone(),
            db_role: record.db_role.clone(),
            mode: record.mode.to_string(),
            status: ProvisionStatus::Active,
            created_at: now,
            last_used_at: now,
        });
        Ok(id)
    }

    async fn set_status(&mut self, database: &str, status: ProvisionStatus) -> SchemaResult<()> {
        if let Some(record) = self.record_mut(database) {
            record.status = status;
        }
        Ok(())
    }

    async fn find_record(
        &mut self,
        lookup: &RecordLookup,
    ) -> SchemaResult<Option<ProvisionedDatabase>> {
        Ok(self
            .records
            .iter()
            .find(|r| match lookup {
                RecordLookup::DbName(name) => &r.db_name == name,
                RecordLookup::Id(id) => r.id == *id,
            })
            .cloned())
    }

    async fn stale_records(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> SchemaResult<Vec<ProvisionedDatabase>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.status == ProvisionStatus::Active && r.last_used_at < cutoff)
            .cloned()
            .collect())
    }

    async fn terminate_connections(&mut self, database: &str) -> SchemaResult<u64> {
        self.terminated.push(database.to_string());
        Ok(0)
    }

    async fn drop_database(&mut self, database: &str) -> SchemaResult<()> {
        self.check(FailAt::DropDatabase)?;
        self.databases.remove(database);
        self.owners.remove(database);
        Ok(())
    }

    async fn drop_role(&mut self, role: &str) -> SchemaResult<()> {
        self.roles.remove(role);
        self.passwords.remove(role);
        Ok(())
    }

    async fn touch(&mut self, database: &str) -> SchemaResult<()> {
        self.touched.push(database.to_string());
        match self.record_mut(database) {
            Some(record) => {
                record.last_used_at = Utc::now();
                Ok(())
            }
            None => Err(SchemaError::not_found(database)),
        }
    }

    async fn load_sample_data(&mut self, _target: &ConnectionDescriptor) -> SchemaResult<()> {
        self.check(FailAt::SampleData)
    }

    async fn verify_connectivity(&mut self, target: &ConnectionDescriptor) -> SchemaResult<()> {
        self.check(FailAt::Verify)?;
        match self.passwords.get(&target.user) {
            Some(password) if *password == target.password => Ok(()),
            _ => Err(SchemaError::connection(
                format!("password authentication failed for user \"{}\"", target.user),
                "Check the username and password",
            )),
        }
    }

    async fn update_role(&mut self, database: &str, role: &str) -> SchemaResult<()> {
        self.check(FailAt::UpdateRole)?;
        if let Some(record) = self.record_mut(database) {
            record.db_role = role.to_string();
        }
        Ok(())
    }

    async fn set_password(&mut self, role: &str, password: &str) -> SchemaResult<()> {
        if self.password_changes > 0 {
            self.check(FailAt::RestorePassword)?;
        }
        self.check(FailAt::SetPassword)?;
        self.passwords.insert(role.to_string(), password.to_string());
        self.password_changes += 1;
        Ok(())
    }

    async fn create_login_role(
        &mut self,
        _database: &str,
        role: &str,
        password: &str,
    ) -> SchemaResult<()> {
        self.roles.insert(role.to_string());
        self.passwords.insert(role.to_string(), password.to_string());
        Ok(())
    }

    async fn retire_role(
        &mut self,
        database: &str,
        role: &str,
        successor: &str,
    ) -> SchemaResult<()> {
        self.check(FailAt::RetireRole)?;
        if self.owners.get(database).is_some_and(|owner| owner == role) {
            self.owners.insert(database.to_string(), successor.to_string());
        }
        self.roles.remove(role);
        self.passwords.remove(role);
        Ok(())
    }

    async fn discard_role(&mut self, _database: &str, role: &str) -> SchemaResult<()> {
        self.roles.remove(role);
        self.passwords.remove(role);
        Ok(())
    }
}

fn settings(sample_data: bool) -> ProvisionSettings {
    ProvisionSettings {
        max_dbs_per_session: 3,
        global_max_dbs: 50,
        role_limits: RoleLimits {
            connection_limit: 5,
            statement_timeout_ms: 30_000,
            idle_in_transaction_timeout_ms: 60_000,
        },
        enable_sample_data: sample_data,
    }
}

fn provisioner(cluster: FakeCluster) -> TenantProvisioner<FakeCluster> {
    TenantProvisioner::new(cluster, settings(false), "db.internal", 6432)
}

#[tokio::test]
async fn test_provision_returns_descriptor() {
    let mut p = provisioner(FakeCluster::default());
    let tenant = assert_ok!(p.provision(Some("s1")).await);

    let d = &tenant.descriptor;
    assert_eq!(d.host, "db.internal");
    assert_eq!(d.port, 6432);
    assert!(d.dbname.starts_with("schemasense_user_"));
    assert!(d.user.starts_with("schemasense_u_"));
    assert_eq!(d.password.len(), 32);
    assert_eq!(d.dbname["schemasense_user_".len()..], d.user["schemasense_u_".len()..]);

    let cluster = p.admin();
    assert!(cluster.roles.contains(&d.user));
    assert!(cluster.databases.contains(&d.dbname));
    assert_eq!(cluster.records[0].status, ProvisionStatus::Active);
    assert_eq!(cluster.records[0].session_id.as_deref(), Some("s1"));
}

#[tokio::test]
async fn test_fourth_provision_for_session_rejected() {
    let mut p = provisioner(FakeCluster::default());
    for _ in 0..3 {
        p.provision(Some("s1")).await.unwrap();
    }

    let err = assert_err!(p.provision(Some("s1")).await);
    match err {
        SchemaError::QuotaExceeded { current, limit, .. } => {
            assert_eq!(current, 3);
            assert_eq!(limit, 3);
        }
        other => panic!("expected quota error, got {:?}", other),
    }

    let cluster = p.admin();
    assert_eq!(cluster.roles.len(), 3);
    assert_eq!(cluster.databases.len(), 3);

    // Other sessions are unaffected.
    p.provision(Some("s2")).await.unwrap();
}

#[tokio::test]
async fn test_global_quota() {
    let mut p = TenantProvisioner::new(
        FakeCluster::default(),
        ProvisionSettings {
            global_max_dbs: 2,
            ..settings(false)
        },
        "localhost",
        5432,
    );
    p.provision(Some("a")).await.unwrap();
    p.provision(Some("b")).await.unwrap();
    assert!(matches!(
        p.provision(Some("c")).await,
        Err(SchemaError::QuotaExceeded { .. })
    ));
}

#[tokio::test]
async fn test_quota_check_failure_fails_open() {
    let mut p = provisioner(FakeCluster::failing(&[FailAt::Quota]));
    assert_ok!(p.provision(Some("s1")).await);
}

#[tokio::test]
async fn test_role_failure_creates_nothing() {
    let mut p = provisioner(FakeCluster::failing(&[FailAt::CreateRole]));
    let err = p.provision(None).await.unwrap_err();
    assert!(matches!(err, SchemaError::Provisioning { .. }));
    assert!(p.admin().roles.is_empty());
    assert!(p.admin().databases.is_empty());
}

#[tokio::test]
async fn test_database_failure_drops_role() {
    let mut p = provisioner(FakeCluster::failing(&[FailAt::CreateDatabase]));
    let err = p.provision(None).await.unwrap_err();
    assert!(err.to_string().contains("create_database"), "{}", err);
    assert!(p.admin().roles.is_empty());
    assert!(p.admin().records.is_empty());
}

#[tokio::test]
async fn test_metadata_failure_drops_database_and_role() {
    let mut p = provisioner(FakeCluster::failing(&[FailAt::RecordMetadata]));
    assert_err!(p.provision(None).await);
    assert!(p.admin().roles.is_empty());
    assert!(p.admin().databases.is_empty());
}

#[tokio::test]
async fn test_cleanup_failure_keeps_original_error() {
    let mut p = provisioner(FakeCluster::failing(&[
        FailAt::RecordMetadata,
        FailAt::DropDatabase,
    ]));
    let err = p.provision(None).await.unwrap_err();
    assert!(err.to_string().contains("record_metadata"), "{}", err);
    // Role cleanup still ran after the database drop failed.
    assert!(p.admin().roles.is_empty());
}

#[tokio::test]
async fn test_sample_data_failure_flags_error_and_keeps_database() {
    let mut p = TenantProvisioner::new(
        FakeCluster::failing(&[FailAt::SampleData]),
        settings(true),
        "localhost",
        5432,
    );
    let err = p.provision(Some("s1")).await.unwrap_err();
    assert!(err.to_string().contains("sample_data_loaded"), "{}", err);

    let cluster = p.admin();
    assert_eq!(cluster.databases.len(), 1);
    assert_eq!(cluster.roles.len(), 1);
    assert_eq!(cluster.records[0].status, ProvisionStatus::Error);
}

#[tokio::test]
async fn test_deprovision_by_name_and_repeat() {
    let mut p = provisioner(FakeCluster::default());
    let tenant = p.provision(Some("s1")).await.unwrap();
    let lookup = RecordLookup::DbName(tenant.descriptor.dbname.clone());

    assert!(p.deprovision(&lookup).await.unwrap());
    let cluster = p.admin();
    assert!(cluster.databases.is_empty());
    assert!(cluster.roles.is_empty());
    assert_eq!(cluster.records[0].status, ProvisionStatus::Deleted);
    assert_eq!(cluster.terminated, vec![tenant.descriptor.dbname.clone()]);

    // Already deleted: no-op success.
    assert!(!p.deprovision(&lookup).await.unwrap());
    // Deleted databases no longer count against the quota.
    for _ in 0..3 {
        p.provision(Some("s1")).await.unwrap();
    }
}

#[tokio::test]
async fn test_deprovision_unknown_record() {
    let mut p = provisioner(FakeCluster::default());
    let err = p.deprovision(&RecordLookup::Id(42)).await.unwrap_err();
    assert!(matches!(err, SchemaError::NotFound { .. }));
}

#[tokio::test]
async fn test_cleanup_stale_only_touches_old_records() {
    let mut cluster = FakeCluster::default();
    for (i, age_days) in [30i64, 1, 20].iter().enumerate() {
        let ts = Utc::now() - ChronoDuration::days(*age_days);
        cluster.records.push(ProvisionedDatabase {
            id: i as i64 + 1,
            session_id: None,
            db_name: format!("schemasense_user_00000{}", i),
            db_role: format!("schemasense_u_00000{}", i),
            mode: "managed".into(),
            status: ProvisionStatus::Active,
            created_at: ts,
            last_used_at: ts,
        });
    }
    let mut p = provisioner(cluster);
    let ttl = Duration::from_secs(14 * 24 * 60 * 60);

    assert_eq!(p.cleanup_stale(ttl, true).await.unwrap(), 2);
    assert!(
        p.admin()
            .records
            .iter()
            .all(|r| r.status == ProvisionStatus::Active)
    );

    assert_eq!(p.cleanup_stale(ttl, false).await.unwrap(), 2);
    let statuses: Vec<ProvisionStatus> = p.admin().records.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            ProvisionStatus::Deleted,
            ProvisionStatus::Active,
            ProvisionStatus::Deleted
        ]
    );
}

#[tokio::test]
async fn test_cleanup_continues_past_failures() {
    let mut cluster = FakeCluster::failing(&[FailAt::DropDatabase]);
    let old = Utc::now() - ChronoDuration::days(60);
    for i in 0..2 {
        cluster.records.push(ProvisionedDatabase {
            id: i + 1,
            session_id: None,
            db_name: format!("db{}", i),
            db_role: format!("role{}", i),
            mode: "managed".into(),
            status: ProvisionStatus::Active,
            created_at: old,
            last_used_at: old,
        });
    }
    let mut p = provisioner(cluster);
    let cleaned = p
        .cleanup_stale(Duration::from_secs(86_400), false)
        .await
        .unwrap();
    assert_eq!(cleaned, 0);
    assert_eq!(p.admin().terminated.len(), 2);
}

#[tokio::test]
async fn test_touch_never_fails() {
    let mut p = provisioner(FakeCluster::default());
    let tenant = p.provision(None).await.unwrap();
    p.touch(&tenant.descriptor.dbname).await;
    p.touch("missing_db").await;
    assert_eq!(p.admin().touched.len(), 2);
}

#[tokio::test]
async fn test_unreachable_credentials_roll_back_provisioning() {
    let mut p = provisioner(FakeCluster::failing(&[FailAt::Verify]));
    let err = assert_err!(p.provision(Some("s1")).await);
    assert!(err.to_string().contains("connectivity_verified"), "{}", err);

    let cluster = p.admin();
    assert!(cluster.roles.is_empty());
    assert!(cluster.databases.is_empty());
    assert_eq!(cluster.records[0].status, ProvisionStatus::Error);
}

fn tenant_ctx() -> DatabaseContext {
    DatabaseContext::with_descriptor(ConnectionDescriptor::new(
        "db.internal",
        6432,
        "app",
        "alice",
        "old",
    ))
}

#[tokio::test]
async fn test_rotation_rejects_bad_input_before_touching_cluster() {
    let mut p = provisioner(FakeCluster::with_tenant("alice", "old", "app", &[]));
    let ctx = tenant_ctx();

    let err = assert_err!(p.rotate_credentials(&ctx, "bad-name; --", "pw").await);
    assert!(err.to_string().contains("invalid username"), "{}", err);
    assert_err!(p.rotate_credentials(&ctx, "bob", "").await);
    assert_eq!(p.admin().password_changes, 0);
    assert!(!p.admin().roles.contains("bob"));

    let empty = DatabaseContext::new();
    let err = assert_err!(p.rotate_credentials(&empty, "bob", "pw").await);
    assert!(err.to_string().contains("no existing connection"), "{}", err);
}

#[tokio::test]
async fn test_password_rotation() {
    let mut p = provisioner(FakeCluster::with_tenant("alice", "old", "app", &[]));
    let ctx = tenant_ctx();

    let rotated = assert_ok!(p.rotate_credentials(&ctx, "alice", "fresh").await);
    assert_eq!(rotated.password, "fresh");
    assert_eq!(ctx.descriptor().await.unwrap().password, "fresh");
    assert_eq!(p.admin().passwords["alice"], "fresh");
}

#[tokio::test]
async fn test_failed_password_verification_restores_old_password() {
    let mut p = provisioner(FakeCluster::with_tenant("alice", "old", "app", &[FailAt::Verify]));
    let ctx = tenant_ctx();

    assert_err!(p.rotate_credentials(&ctx, "alice", "fresh").await);
    assert_eq!(p.admin().passwords["alice"], "old");
    assert_eq!(ctx.descriptor().await.unwrap().password, "old");
}

#[tokio::test]
async fn test_unrestorable_password_keeps_new_descriptor() {
    let mut p = provisioner(FakeCluster::with_tenant(
        "alice",
        "old",
        "app",
        &[FailAt::Verify, FailAt::RestorePassword],
    ));
    let ctx = tenant_ctx();

    assert_err!(p.rotate_credentials(&ctx, "alice", "fresh").await);
    // The server only knows the new password, so the context follows it.
    assert_eq!(p.admin().passwords["alice"], "fresh");
    assert_eq!(ctx.descriptor().await.unwrap().password, "fresh");
}

#[tokio::test]
async fn test_rotated_user_is_dropped_by_deprovision() {
    let mut p = provisioner(FakeCluster::default());
    let tenant = p.provision(Some("s1")).await.unwrap();
    let ctx = DatabaseContext::with_descriptor(tenant.descriptor.clone());

    let rotated = assert_ok!(p.rotate_credentials(&ctx, "app_owner", "s3cret").await);
    assert_eq!(rotated.user, "app_owner");
    assert_eq!(rotated.dbname, tenant.descriptor.dbname);

    let cluster = p.admin();
    assert!(!cluster.roles.contains(&tenant.descriptor.user));
    assert_eq!(cluster.records[0].db_role, "app_owner");
    assert_eq!(cluster.owners[&tenant.descriptor.dbname], "app_owner");

    let lookup = RecordLookup::DbName(tenant.descriptor.dbname.clone());
    assert!(assert_ok!(p.deprovision(&lookup).await));
    let cluster = p.admin();
    assert!(cluster.roles.is_empty(), "{:?}", cluster.roles);
    assert!(cluster.databases.is_empty());
    assert_eq!(cluster.records[0].status, ProvisionStatus::Deleted);
}

#[tokio::test]
async fn test_failed_username_switch_discards_new_role() {
    let mut p = provisioner(FakeCluster::with_tenant("alice", "old", "app", &[FailAt::UpdateRole]));
    let ctx = tenant_ctx();

    assert_err!(p.rotate_credentials(&ctx, "bob", "pw").await);
    let cluster = p.admin();
    assert_eq!(cluster.roles.iter().collect::<Vec<_>>(), vec!["alice"]);
    assert_eq!(cluster.owners["app"], "alice");
    assert_eq!(ctx.descriptor().await.unwrap().user, "alice");
}

#[tokio::test]
async fn test_failed_retirement_keeps_new_role_active() {
    let mut p = provisioner(FakeCluster::with_tenant("alice", "old", "app", &[FailAt::RetireRole]));
    let ctx = tenant_ctx();

    assert_err!(p.rotate_credentials(&ctx, "bob", "pw").await);
    let cluster = p.admin();
    assert!(cluster.roles.contains("alice"));
    assert!(cluster.roles.contains("bob"));
    assert_eq!(ctx.descriptor().await.unwrap().user, "bob");
}
