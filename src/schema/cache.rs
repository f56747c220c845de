//! Single-slot schema cache.
//!
//! Holds at most one [`CanonicalSchemaModel`]. The cache is an ordinary value
//! passed to whoever needs it; share it behind an `Arc` when several tasks
//! must see the same slot. Writers that change the database schema call
//! [`SchemaCache::invalidate`] or [`SchemaCache::refresh`] after a successful
//! change, never after a failed one.

use crate::db::introspect::CatalogSource;
use crate::error::SchemaResult;
use crate::schema::model::CanonicalSchemaModel;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
pub struct SchemaCache {
    slot: RwLock<Option<Arc<CanonicalSchemaModel>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached model, if one is loaded.
    pub async fn get(&self) -> Option<Arc<CanonicalSchemaModel>> {
        self.slot.read().await.clone()
    }

    /// Replace the cached model.
    pub async fn set(&self, model: CanonicalSchemaModel) -> Arc<CanonicalSchemaModel> {
        let model = Arc::new(model);
        *self.slot.write().await = Some(Arc::clone(&model));
        model
    }

    /// Drop the cached model; the next read re-introspects.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.write().await;
        if slot.take().is_some() {
            debug!("Schema cache invalidated");
        }
    }

    pub async fn is_loaded(&self) -> bool {
        self.slot.read().await.is_some()
    }

    /// Re-introspect unconditionally and store the result.
    ///
    /// On failure the slot is left empty rather than holding a stale model.
    pub async fn refresh<S: CatalogSource>(
        &self,
        source: &mut S,
    ) -> SchemaResult<Arc<CanonicalSchemaModel>> {
        let mut slot = self.slot.write().await;
        *slot = None;
        let facts = source.fetch_facts().await?;
        let model = Arc::new(CanonicalSchemaModel::from_introspection(&facts));
        debug!(tables = model.table_count(), "Schema cache refreshed");
        *slot = Some(Arc::clone(&model));
        Ok(model)
    }

    /// Return the cached model, introspecting first if the slot is empty.
    pub async fn get_or_refresh<S: CatalogSource>(
        &self,
        source: &mut S,
    ) -> SchemaResult<Arc<CanonicalSchemaModel>> {
        if let Some(model) = self.get().await {
            return Ok(model);
        }
        self.refresh(source).await
    }
}
