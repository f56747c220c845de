//! The active database connection and its schema cache.

use crate::error::{SchemaError, SchemaResult};
use crate::models::ConnectionDescriptor;
use crate::schema::SchemaCache;
use sqlx::{Connection, PgConnection};
use tokio::sync::RwLock;
use tracing::debug;

/// Which database operations currently target, plus the cached model of it.
///
/// Connections are opened per operation with [`DatabaseContext::connect`].
#[derive(Debug, Default)]
pub struct DatabaseContext {
    descriptor: RwLock<Option<ConnectionDescriptor>>,
    cache: SchemaCache,
}

impl DatabaseContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_descriptor(descriptor: ConnectionDescriptor) -> Self {
        Self {
            descriptor: RwLock::new(Some(descriptor)),
            cache: SchemaCache::new(),
        }
    }

    pub async fn descriptor(&self) -> Option<ConnectionDescriptor> {
        self.descriptor.read().await.clone()
    }

    pub fn cache(&self) -> &SchemaCache {
        &self.cache
    }

    /// Point the context at another database or login and drop the cached
    /// model. Returns the previous descriptor.
    pub async fn switch(&self, descriptor: ConnectionDescriptor) -> Option<ConnectionDescriptor> {
        let previous = self.replace(Some(descriptor)).await;
        self.cache.invalidate().await;
        previous
    }

    /// Swap the descriptor without touching the cache.
    pub(crate) async fn replace(
        &self,
        descriptor: Option<ConnectionDescriptor>,
    ) -> Option<ConnectionDescriptor> {
        let mut slot = self.descriptor.write().await;
        let previous = std::mem::replace(&mut *slot, descriptor);
        debug!(
            user = slot.as_ref().map(|d| d.user.as_str()).unwrap_or("-"),
            "Active connection descriptor replaced"
        );
        previous
    }

    /// Open a connection with the current descriptor.
    pub async fn connect(&self) -> SchemaResult<PgConnection> {
        let descriptor = self.descriptor().await.ok_or_else(|| {
            SchemaError::connection(
                "no existing connection is configured",
                "Provide a database URL or provision a database first",
            )
        })?;
        Ok(PgConnection::connect_with(&descriptor.connect_options()).await?)
    }
}
