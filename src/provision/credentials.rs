//! Credential rotation for the active tenant connection.
//!
//! A password-only change is a single `ALTER ROLE`. A username change creates
//! the new role, grants it what the old one had, switches the context over,
//! records the new role on the metadata row and only then retires the old
//! role. On failure the context is left on credentials the server still
//! accepts: the previous descriptor, unless rolling back a changed password
//! also failed or the new role is already verified and recorded.

use crate::db::context::DatabaseContext;
use crate::error::{SchemaError, SchemaResult};
use crate::models::ConnectionDescriptor;
use crate::provision::admin::ClusterAdmin;
use crate::provision::names::validate_username;
use tracing::{info, warn};

/// A failed rotation and the descriptor that still logs in afterwards.
struct Rollback {
    error: SchemaError,
    effective: ConnectionDescriptor,
}

impl Rollback {
    fn to(effective: &ConnectionDescriptor, error: SchemaError) -> Self {
        Self {
            error,
            effective: effective.clone(),
        }
    }
}

/// Change the login of the context's active connection.
///
/// `admin` acts on the cluster the context points at, with rights to alter
/// and create roles. Returns the new active descriptor. The schema cache is
/// invalidated only on success.
pub async fn rotate_credentials<A: ClusterAdmin>(
    ctx: &DatabaseContext,
    admin: &mut A,
    new_user: &str,
    new_password: &str,
) -> SchemaResult<ConnectionDescriptor> {
    validate_username(new_user)?;
    if new_password.is_empty() {
        return Err(SchemaError::invalid_input("new password cannot be empty"));
    }

    let current = ctx.descriptor().await.ok_or_else(|| {
        SchemaError::invalid_input("no existing connection to rotate credentials for")
    })?;
    let rotated = current.with_credentials(new_user, new_password);

    let result = if new_user == current.user {
        change_password(ctx, admin, &current, &rotated).await
    } else {
        change_username(ctx, admin, &current, &rotated).await
    };

    match result {
        Ok(()) => {
            ctx.cache().invalidate().await;
            info!(user = %new_user, db_name = %rotated.dbname, "Credentials rotated");
            Ok(rotated)
        }
        Err(Rollback { error, effective }) => {
            warn!(
                error = %error,
                active_user = %effective.user,
                "Credential rotation failed"
            );
            ctx.replace(Some(effective)).await;
            Err(error)
        }
    }
}

async fn change_password<A: ClusterAdmin>(
    ctx: &DatabaseContext,
    admin: &mut A,
    current: &ConnectionDescriptor,
    rotated: &ConnectionDescriptor,
) -> Result<(), Rollback> {
    admin
        .set_password(&current.user, &rotated.password)
        .await
        .map_err(|e| Rollback::to(current, e))?;
    ctx.replace(Some(rotated.clone())).await;

    let Err(error) = admin.verify_connectivity(rotated).await else {
        return Ok(());
    };
    match admin.set_password(&current.user, &current.password).await {
        Ok(()) => Err(Rollback::to(current, error)),
        Err(revert) => {
            // The server only accepts the new password now.
            warn!(user = %current.user, error = %revert, "Could not restore previous password");
            Err(Rollback::to(rotated, error))
        }
    }
}

async fn change_username<A: ClusterAdmin>(
    ctx: &DatabaseContext,
    admin: &mut A,
    current: &ConnectionDescriptor,
    rotated: &ConnectionDescriptor,
) -> Result<(), Rollback> {
    let database = current.dbname.as_str();
    let switched = async {
        admin
            .create_login_role(database, &rotated.user, &rotated.password)
            .await?;
        ctx.replace(Some(rotated.clone())).await;
        admin.verify_connectivity(rotated).await?;
        admin.update_role(database, &rotated.user).await
    }
    .await;

    if let Err(error) = switched {
        if let Err(e) = admin.discard_role(database, &rotated.user).await {
            warn!(role = %rotated.user, error = %e, "Cleanup: could not drop new role");
        }
        return Err(Rollback::to(current, error));
    }

    // From here the new role is live and recorded, so it stays active.
    admin
        .retire_role(database, &current.user, &rotated.user)
        .await
        .map_err(|e| Rollback::to(rotated, e))
}
