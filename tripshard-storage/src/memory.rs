//! In-memory shard backend for tests and local development.
//!
//! Each shard is a pair of tables behind an async mutex. A transaction takes
//! the shard lock for its whole lifetime and works on a staged copy; commit
//! swaps the copy in, dropping the transaction discards it. This serialises
//! writers per shard the same way row locks on the plan row do in Postgres.

use crate::traits::{PlanTx, PoolFactory, ShardPool, ShardSession};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tripshard_core::{
    Location, LocationId, Plan, PlanFields, PlanId, PlanSummary, ShardDsn, ShardKey,
    StorageError, StorageResult, Version,
};

#[derive(Debug, Clone, Default)]
struct ShardTables {
    plans: HashMap<PlanId, Plan>,
    locations: HashMap<LocationId, Location>,
}

impl ShardTables {
    fn locations_of(&self, plan_id: PlanId) -> impl Iterator<Item = &Location> {
        self.locations
            .values()
            .filter(move |location| location.travel_plan_id == plan_id)
    }

    /// Mirrors the `unique_plan_order` constraint.
    fn check_unique_order(&self, location: &Location) -> StorageResult<()> {
        let clash = self.locations_of(location.travel_plan_id).any(|other| {
            other.id != location.id && other.visit_order == location.visit_order
        });
        if clash {
            return Err(StorageError::OrderConflict {
                plan_id: location.travel_plan_id,
                requested_order: location.visit_order,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: AtomicBool,
    fail_location_writes: AtomicBool,
}

/// Pool factory handing out in-memory shards, one per key.
#[derive(Clone, Default)]
pub struct InMemoryShards {
    shards: Arc<StdMutex<HashMap<ShardKey, InMemoryPool>>>,
    built: Arc<AtomicUsize>,
}

impl InMemoryShards {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shard behind `key`, for inspection and fault injection.
    pub fn shard(&self, key: ShardKey) -> InMemoryPool {
        let mut shards = self.shards.lock().unwrap_or_else(PoisonError::into_inner);
        shards
            .entry(key)
            .or_insert_with(|| InMemoryPool::new(key))
            .clone()
    }

    /// How many times the registry asked for a pool.
    pub fn pools_built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }
}

impl PoolFactory for InMemoryShards {
    type Pool = InMemoryPool;

    fn create_pool(&self, key: ShardKey, _dsn: &ShardDsn) -> StorageResult<InMemoryPool> {
        self.built.fetch_add(1, Ordering::SeqCst);
        Ok(self.shard(key))
    }
}

/// One in-memory shard.
#[derive(Clone)]
pub struct InMemoryPool {
    key: ShardKey,
    tables: Arc<Mutex<ShardTables>>,
    faults: Arc<Faults>,
    open_sessions: Arc<AtomicUsize>,
}

impl InMemoryPool {
    fn new(key: ShardKey) -> Self {
        Self {
            key,
            tables: Arc::new(Mutex::new(ShardTables::default())),
            faults: Arc::new(Faults::default()),
            open_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn key(&self) -> ShardKey {
        self.key
    }

    /// Make `acquire` and `ping` fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make location inserts and updates fail with an infrastructure error.
    pub fn fail_location_writes(&self, fail: bool) {
        self.faults
            .fail_location_writes
            .store(fail, Ordering::SeqCst);
    }

    /// Sessions currently checked out.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    pub async fn plan(&self, id: PlanId) -> Option<Plan> {
        self.tables.lock().await.plans.get(&id).cloned()
    }

    pub async fn plan_count(&self) -> usize {
        self.tables.lock().await.plans.len()
    }

    pub async fn location_count(&self) -> usize {
        self.tables.lock().await.locations.len()
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::infrastructure(format!(
                "shard {} is unavailable",
                self.key
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ShardPool for InMemoryPool {
    type Session = InMemorySession;

    async fn acquire(&self) -> StorageResult<InMemorySession> {
        self.check_available()?;
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(InMemorySession { pool: self.clone() })
    }
}

/// A checked-out session; released when dropped.
pub struct InMemorySession {
    pool: InMemoryPool,
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.pool.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ShardSession for InMemorySession {
    async fn ping(&mut self) -> StorageResult<()> {
        self.pool.check_available()
    }

    async fn insert_plan(&mut self, plan: &Plan) -> StorageResult<()> {
        let mut tables = self.pool.tables.lock().await;
        tables.plans.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn fetch_plan(&mut self, id: PlanId) -> StorageResult<Option<Plan>> {
        Ok(self.pool.tables.lock().await.plans.get(&id).cloned())
    }

    async fn fetch_locations(&mut self, plan_id: PlanId) -> StorageResult<Vec<Location>> {
        let tables = self.pool.tables.lock().await;
        let mut locations: Vec<Location> = tables.locations_of(plan_id).cloned().collect();
        locations.sort_by_key(|location| location.visit_order);
        Ok(locations)
    }

    async fn list_plan_summaries(&mut self) -> StorageResult<Vec<PlanSummary>> {
        let tables = self.pool.tables.lock().await;
        Ok(tables
            .plans
            .values()
            .map(|plan| PlanSummary {
                plan: plan.clone(),
                location_count: tables.locations_of(plan.id).count() as i64,
            })
            .collect())
    }

    async fn fetch_location(&mut self, id: LocationId) -> StorageResult<Option<Location>> {
        Ok(self.pool.tables.lock().await.locations.get(&id).cloned())
    }

    async fn begin<'a>(&'a mut self) -> StorageResult<Box<dyn PlanTx + 'a>> {
        let guard = self.pool.tables.clone().lock_owned().await;
        let staged = (*guard).clone();
        Ok(Box::new(InMemoryTx {
            guard,
            staged,
            faults: self.pool.faults.clone(),
        }))
    }
}

struct InMemoryTx {
    guard: OwnedMutexGuard<ShardTables>,
    staged: ShardTables,
    faults: Arc<Faults>,
}

impl InMemoryTx {
    fn check_location_writes(&self) -> StorageResult<()> {
        if self.faults.fail_location_writes.load(Ordering::SeqCst) {
            return Err(StorageError::infrastructure("injected location write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl PlanTx for InMemoryTx {
    async fn compare_and_bump(&mut self, plan_id: PlanId, expected: Version) -> StorageResult<u64> {
        match self.staged.plans.get_mut(&plan_id) {
            Some(plan) if plan.version == expected => {
                plan.version += 1;
                plan.updated_at = Utc::now();
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn delete_plan_if_version(
        &mut self,
        plan_id: PlanId,
        expected: Version,
    ) -> StorageResult<u64> {
        let matches = self
            .staged
            .plans
            .get(&plan_id)
            .is_some_and(|plan| plan.version == expected);
        if !matches {
            return Ok(0);
        }
        self.staged.plans.remove(&plan_id);
        self.staged
            .locations
            .retain(|_, location| location.travel_plan_id != plan_id);
        Ok(1)
    }

    async fn plan_version(&mut self, plan_id: PlanId) -> StorageResult<Option<Version>> {
        Ok(self.staged.plans.get(&plan_id).map(|plan| plan.version))
    }

    async fn load_plan(&mut self, plan_id: PlanId) -> StorageResult<Option<Plan>> {
        Ok(self.staged.plans.get(&plan_id).cloned())
    }

    async fn write_plan_fields(
        &mut self,
        plan_id: PlanId,
        fields: &PlanFields,
    ) -> StorageResult<()> {
        let plan = self
            .staged
            .plans
            .get_mut(&plan_id)
            .ok_or_else(|| StorageError::plan_not_found(plan_id))?;
        plan.apply_fields(fields);
        Ok(())
    }

    async fn max_visit_order(&mut self, plan_id: PlanId) -> StorageResult<Option<i32>> {
        Ok(self
            .staged
            .locations_of(plan_id)
            .map(|location| location.visit_order)
            .max())
    }

    async fn visit_order_taken(
        &mut self,
        plan_id: PlanId,
        order: i32,
        except: Option<LocationId>,
    ) -> StorageResult<bool> {
        Ok(self
            .staged
            .locations_of(plan_id)
            .any(|location| location.visit_order == order && Some(location.id) != except))
    }

    async fn insert_location(&mut self, location: &Location) -> StorageResult<()> {
        self.check_location_writes()?;
        self.staged.check_unique_order(location)?;
        self.staged.locations.insert(location.id, location.clone());
        Ok(())
    }

    async fn load_location(&mut self, id: LocationId) -> StorageResult<Option<Location>> {
        Ok(self.staged.locations.get(&id).cloned())
    }

    async fn write_location(&mut self, location: &Location) -> StorageResult<()> {
        self.check_location_writes()?;
        self.staged.check_unique_order(location)?;
        self.staged.locations.insert(location.id, location.clone());
        Ok(())
    }

    async fn delete_location(&mut self, plan_id: PlanId, id: LocationId) -> StorageResult<u64> {
        match self.staged.locations.get(&id) {
            Some(location) if location.travel_plan_id == plan_id => {
                self.staged.locations.remove(&id);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let InMemoryTx {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}
