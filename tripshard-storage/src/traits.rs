//! Backend traits for one shard.
//!
//! A backend provides a [`PoolFactory`] that builds one [`ShardPool`] per
//! shard. Pools hand out [`ShardSession`]s; dropping a session returns it to
//! its pool, so a session is released on every exit path. Guarded writes run
//! inside a [`PlanTx`], a local transaction on the session's shard that is
//! rolled back if dropped without `commit`.

use async_trait::async_trait;
use tripshard_core::{
    Location, LocationId, Plan, PlanFields, PlanId, PlanSummary, ShardDsn, ShardKey,
    StorageResult, Version,
};

/// Builds the connection pool for a shard.
pub trait PoolFactory: Send + Sync + 'static {
    type Pool: ShardPool;

    fn create_pool(&self, key: ShardKey, dsn: &ShardDsn) -> StorageResult<Self::Pool>;
}

/// Pooled connections to one shard.
#[async_trait]
pub trait ShardPool: Clone + Send + Sync + 'static {
    type Session: ShardSession;

    /// Acquire a scoped session. The session goes back to the pool on drop.
    async fn acquire(&self) -> StorageResult<Self::Session>;
}

/// A session on one shard. Methods outside [`PlanTx`] run in autocommit
/// mode and are only used for reads and plan creation.
#[async_trait]
pub trait ShardSession: Send {
    /// Cheap round trip used by health checks.
    async fn ping(&mut self) -> StorageResult<()>;

    async fn insert_plan(&mut self, plan: &Plan) -> StorageResult<()>;

    async fn fetch_plan(&mut self, id: PlanId) -> StorageResult<Option<Plan>>;

    /// Locations of a plan ordered by `visit_order`.
    async fn fetch_locations(&mut self, plan_id: PlanId) -> StorageResult<Vec<Location>>;

    /// Every plan on this shard with its location count.
    async fn list_plan_summaries(&mut self) -> StorageResult<Vec<PlanSummary>>;

    async fn fetch_location(&mut self, id: LocationId) -> StorageResult<Option<Location>>;

    /// Open a local transaction on this shard.
    async fn begin<'a>(&'a mut self) -> StorageResult<Box<dyn PlanTx + 'a>>;
}

/// Statements available inside a guarded local transaction.
#[async_trait]
pub trait PlanTx: Send {
    /// `UPDATE plans SET version = version + 1, updated_at = now()
    ///  WHERE id = $plan AND version = $expected`; returns rows matched.
    async fn compare_and_bump(&mut self, plan_id: PlanId, expected: Version) -> StorageResult<u64>;

    /// Delete the plan (cascading to its locations) if its version matches.
    async fn delete_plan_if_version(
        &mut self,
        plan_id: PlanId,
        expected: Version,
    ) -> StorageResult<u64>;

    /// Current version of a plan, if it exists.
    async fn plan_version(&mut self, plan_id: PlanId) -> StorageResult<Option<Version>>;

    async fn load_plan(&mut self, plan_id: PlanId) -> StorageResult<Option<Plan>>;

    async fn write_plan_fields(&mut self, plan_id: PlanId, fields: &PlanFields)
        -> StorageResult<()>;

    async fn max_visit_order(&mut self, plan_id: PlanId) -> StorageResult<Option<i32>>;

    /// Whether another location of the plan already uses `order`.
    async fn visit_order_taken(
        &mut self,
        plan_id: PlanId,
        order: i32,
        except: Option<LocationId>,
    ) -> StorageResult<bool>;

    async fn insert_location(&mut self, location: &Location) -> StorageResult<()>;

    async fn load_location(&mut self, id: LocationId) -> StorageResult<Option<Location>>;

    async fn write_location(&mut self, location: &Location) -> StorageResult<()>;

    async fn delete_location(&mut self, plan_id: PlanId, id: LocationId) -> StorageResult<u64>;

    async fn commit(self: Box<Self>) -> StorageResult<()>;

    async fn rollback(self: Box<Self>) -> StorageResult<()>;
}
