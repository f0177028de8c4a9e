//! Lazily created per-shard connection pools.

use crate::traits::{PoolFactory, ShardPool};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use tripshard_core::{ShardKey, ShardMapping, StorageError, StorageResult};

/// One pool per configured shard, created on first use and reused for the
/// life of the process.
pub struct PoolRegistry<F: PoolFactory> {
    mapping: Arc<ShardMapping>,
    factory: F,
    pools: HashMap<ShardKey, OnceCell<F::Pool>>,
}

impl<F: PoolFactory> PoolRegistry<F> {
    pub fn new(mapping: Arc<ShardMapping>, factory: F) -> Self {
        let pools = mapping.keys().map(|key| (key, OnceCell::new())).collect();
        Self {
            mapping,
            factory,
            pools,
        }
    }

    /// The pool for a shard, creating it if this is the first request.
    ///
    /// Concurrent first requests for the same key build exactly one pool.
    pub fn pool_for(&self, key: ShardKey) -> StorageResult<F::Pool> {
        let cell = self
            .pools
            .get(&key)
            .ok_or(StorageError::UnknownShard { key })?;
        let dsn = self
            .mapping
            .get(&key)
            .ok_or(StorageError::UnknownShard { key })?;

        cell.get_or_try_init(|| {
            debug!(shard = %key, dsn = %dsn.redacted(), "creating shard pool");
            self.factory.create_pool(key, dsn)
        })
        .cloned()
    }

    /// Acquire a session on a shard.
    pub async fn acquire(&self, key: ShardKey) -> StorageResult<<F::Pool as ShardPool>::Session> {
        self.pool_for(key)?.acquire().await
    }

    /// Every configured pool in mapping order, created as the iterator
    /// reaches it.
    pub fn all_pools(&self) -> impl Iterator<Item = StorageResult<(ShardKey, F::Pool)>> + '_ {
        self.mapping
            .keys()
            .map(move |key| self.pool_for(key).map(|pool| (key, pool)))
    }

    /// Number of pools built so far.
    pub fn created_count(&self) -> usize {
        self.pools.values().filter(|cell| cell.get().is_some()).count()
    }

    pub fn mapping(&self) -> &ShardMapping {
        &self.mapping
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }
}
