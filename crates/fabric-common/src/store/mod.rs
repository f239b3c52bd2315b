//! Entity store contract and typed repository.
//!
//! Backends persist rows as [`FieldValues`] addressed by table and key.
//! Rows of entities without a natural key get a surrogate id from a
//! per-table sequence. [`Repository`] layers the [`Entity`] encoding on top.

mod memory;
#[cfg(feature = "redis")]
mod redis;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FabricResult;
use crate::fields::{FieldValues, Filter};
use crate::model::Entity;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::{RedisConfig, RedisStore};

/// Row storage used by the orchestrators.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Writes a row and returns its key. A `None` key allocates a surrogate
    /// id; an existing natural key is overwritten.
    async fn insert(&self, table: &str, key: Option<&str>, fields: FieldValues)
        -> FabricResult<String>;

    /// Reads one row by key.
    async fn get(&self, table: &str, key: &str) -> FabricResult<Option<FieldValues>>;

    /// Returns `(key, row)` for every row matching `filter`, ordered by key.
    async fn find(&self, table: &str, filter: &Filter) -> FabricResult<Vec<(String, FieldValues)>>;

    /// Deletes every row matching `filter` and returns how many were removed.
    async fn delete(&self, table: &str, filter: &Filter) -> FabricResult<u64>;

    /// Overwrites `fields` on every row matching `filter`.
    async fn update_all(&self, table: &str, filter: &Filter, fields: &FieldValues)
        -> FabricResult<u64>;

    /// Liveness probe.
    async fn ping(&self) -> FabricResult<()>;
}

/// Typed access to an [`EntityStore`].
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn EntityStore>,
}

impl Repository {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Repository over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub async fn insert<E: Entity>(&self, entity: &E) -> FabricResult<String> {
        let key = entity.key();
        self.store
            .insert(E::TABLE, key.as_deref(), entity.to_fields())
            .await
    }

    pub async fn get<E: Entity>(&self, key: &str) -> FabricResult<Option<E>> {
        match self.store.get(E::TABLE, key).await? {
            Some(fields) => Ok(Some(E::from_fields(&fields)?)),
            None => Ok(None),
        }
    }

    pub async fn exists<E: Entity>(&self, key: &str) -> FabricResult<bool> {
        Ok(self.store.get(E::TABLE, key).await?.is_some())
    }

    pub async fn find<E: Entity>(&self, filter: &Filter) -> FabricResult<Vec<E>> {
        self.store
            .find(E::TABLE, filter)
            .await?
            .iter()
            .map(|(_, fields)| E::from_fields(fields))
            .collect()
    }

    pub async fn all<E: Entity>(&self) -> FabricResult<Vec<E>> {
        self.find(&Filter::new()).await
    }

    pub async fn count<E: Entity>(&self, filter: &Filter) -> FabricResult<usize> {
        Ok(self.store.find(E::TABLE, filter).await?.len())
    }

    pub async fn delete<E: Entity>(&self, filter: &Filter) -> FabricResult<u64> {
        self.store.delete(E::TABLE, filter).await
    }

    pub async fn update_all<E: Entity>(
        &self,
        filter: &Filter,
        fields: &FieldValues,
    ) -> FabricResult<u64> {
        self.store.update_all(E::TABLE, filter, fields).await
    }

    pub async fn ping(&self) -> FabricResult<()> {
        self.store.ping().await
    }
}

/// Orders row keys: surrogate ids numerically, then natural keys lexically.
pub(crate) fn sort_rows(rows: &mut [(String, FieldValues)]) {
    rows.sort_by(|(a, _), (b, _)| match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    });
}
