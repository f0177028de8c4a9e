//! Finds the shard that holds a location when only its id is known.
//!
//! Location ids are not derived from their plan's id, so they cannot be
//! routed. The locator probes shards one at a time in mapping order and stops
//! at the first hit. Ids it has already resolved (or that were created in
//! this process) are remembered in a bounded hint index; a hint is always
//! verified against the shard before it is trusted.

use crate::registry::PoolRegistry;
use crate::traits::{PoolFactory, ShardPool, ShardSession};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use tripshard_core::{Location, LocationId, PlanId, ShardKey, StorageError, StorageResult};

/// Hints kept before new ones are dropped.
pub const DEFAULT_HINT_CAPACITY: usize = 65_536;

/// Called with the number of shards each lookup queried, hit or miss.
pub type ProbeRecorder = fn(usize);

/// A location together with the shard it was found on.
#[derive(Debug, Clone, PartialEq)]
pub struct Located {
    pub shard: ShardKey,
    pub location: Location,
    /// Number of shards queried to find it.
    pub probes: usize,
}

#[derive(Debug, Clone, Copy)]
struct Hint {
    shard: ShardKey,
    plan_id: PlanId,
}

pub struct ScatterGatherLocator<F: PoolFactory> {
    registry: Arc<PoolRegistry<F>>,
    hints: DashMap<LocationId, Hint>,
    /// Hinted location ids per plan, so a plan delete can drop them all.
    by_plan: DashMap<PlanId, HashSet<LocationId>>,
    capacity: usize,
    recorder: Option<ProbeRecorder>,
}

impl<F: PoolFactory> ScatterGatherLocator<F> {
    pub fn new(registry: Arc<PoolRegistry<F>>) -> Self {
        Self {
            registry,
            hints: DashMap::new(),
            by_plan: DashMap::new(),
            capacity: DEFAULT_HINT_CAPACITY,
            recorder: None,
        }
    }

    pub fn with_hint_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_probe_recorder(mut self, recorder: ProbeRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Find the shard holding `location_id`.
    ///
    /// Each probe acquires and releases its own session. A probe that fails
    /// with an infrastructure error aborts the search, since the row could
    /// be on the unreachable shard. The probe count is reported to the
    /// recorder whatever the outcome.
    pub async fn locate(&self, location_id: LocationId) -> StorageResult<Located> {
        let mut probes = 0;
        let result = self.search(location_id, &mut probes).await;
        if let Some(record) = self.recorder {
            if probes > 0 {
                record(probes);
            }
        }
        result
    }

    async fn search(&self, location_id: LocationId, probes: &mut usize) -> StorageResult<Located> {
        let hinted = self.hints.get(&location_id).map(|entry| entry.shard);

        if let Some(key) = hinted {
            *probes += 1;
            if let Some(location) = self.probe(key, location_id).await? {
                return Ok(Located {
                    shard: key,
                    location,
                    probes: *probes,
                });
            }
            debug!(location_id = %location_id, shard = %key, "stale locator hint");
            self.forget(location_id);
        }

        for entry in self.registry.all_pools() {
            let (key, pool) = entry?;
            if hinted == Some(key) {
                continue;
            }
            *probes += 1;
            let found = {
                let mut session = pool.acquire().await?;
                session.fetch_location(location_id).await
            };
            match found {
                Ok(Some(location)) => {
                    self.remember(location_id, location.travel_plan_id, key);
                    debug!(location_id = %location_id, shard = %key, probes = *probes, "location found");
                    return Ok(Located {
                        shard: key,
                        location,
                        probes: *probes,
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(location_id = %location_id, shard = %key, error = %err, "locator probe failed");
                    return Err(err);
                }
            }
        }

        Err(StorageError::location_not_found(location_id))
    }

    /// Record where a location of `plan_id` lives. Ignored once the index
    /// is full.
    pub fn remember(&self, location_id: LocationId, plan_id: PlanId, shard: ShardKey) {
        if self.hints.len() >= self.capacity && !self.hints.contains_key(&location_id) {
            debug!(location_id = %location_id, capacity = self.capacity, "locator hint index full");
            return;
        }
        self.hints.insert(location_id, Hint { shard, plan_id });
        self.by_plan.entry(plan_id).or_default().insert(location_id);
    }

    pub fn forget(&self, location_id: LocationId) {
        let Some((_, hint)) = self.hints.remove(&location_id) else {
            return;
        };
        if let Some(mut ids) = self.by_plan.get_mut(&hint.plan_id) {
            ids.remove(&location_id);
        }
        self.by_plan.remove_if(&hint.plan_id, |_, ids| ids.is_empty());
    }

    /// Drop the hints of every location of a deleted plan.
    pub fn forget_plan(&self, plan_id: PlanId) {
        if let Some((_, ids)) = self.by_plan.remove(&plan_id) {
            for id in ids {
                self.hints.remove(&id);
            }
        }
    }

    pub fn hint_count(&self) -> usize {
        self.hints.len()
    }

    async fn probe(&self, key: ShardKey, location_id: LocationId) -> StorageResult<Option<Location>> {
        let mut session = self.registry.acquire(key).await?;
        session.fetch_location(location_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryShards;
    use crate::traits::PlanTx;
    use chrono::Utc;
    use tripshard_core::{NewLocation, Plan, PlanFields, ShardMapping};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn setup() -> (InMemoryShards, Arc<PoolRegistry<InMemoryShards>>) {
        let pairs = ShardKey::all().map(|k| (k, format!("postgresql://app@db-{}/travel", k)));
        let mapping = Arc::new(ShardMapping::from_pairs(pairs).unwrap());
        let shards = InMemoryShards::new();
        (shards.clone(), Arc::new(PoolRegistry::new(mapping, shards)))
    }

    async fn seed_location(shards: &InMemoryShards, key: ShardKey) -> LocationId {
        let pool = shards.shard(key);
        let mut session = pool.acquire().await.unwrap();
        let plan = Plan::new(Uuid::new_v4(), PlanFields::titled("Seed"), Utc::now());
        session.insert_plan(&plan).await.unwrap();
        let location = Location::new(
            Uuid::new_v4(),
            plan.id,
            NewLocation::named("Stop"),
            1,
            Utc::now(),
        );
        let mut tx = session.begin().await.unwrap();
        tx.insert_location(&location).await.unwrap();
        tx.commit().await.unwrap();
        location.id
    }

    #[tokio::test]
    async fn test_locate_probes_in_mapping_order() {
        let (shards, registry) = setup();
        let key = ShardKey::parse("5").unwrap();
        let id = seed_location(&shards, key).await;

        let locator = ScatterGatherLocator::new(registry);
        let found = locator.locate(id).await.unwrap();
        assert_eq!(found.shard, key);
        assert_eq!(found.probes, 6);

        // second lookup goes straight to the hinted shard
        let again = locator.locate(id).await.unwrap();
        assert_eq!(again.probes, 1);
    }

    #[tokio::test]
    async fn test_missing_location_probes_every_shard_and_releases_sessions() {
        let (shards, registry) = setup();
        let locator = ScatterGatherLocator::new(registry);
        let id = Uuid::new_v4();

        let err = locator.locate(id).await.unwrap_err();
        assert_eq!(err, StorageError::location_not_found(id));
        for key in ShardKey::all() {
            assert_eq!(shards.shard(key).open_sessions(), 0);
        }
    }

    #[tokio::test]
    async fn test_stale_hint_falls_back_to_scan() {
        let (shards, registry) = setup();
        let key = ShardKey::parse("c").unwrap();
        let id = seed_location(&shards, key).await;

        let locator = ScatterGatherLocator::new(registry);
        locator.remember(id, Uuid::new_v4(), ShardKey::parse("0").unwrap());
        let found = locator.locate(id).await.unwrap();
        assert_eq!(found.shard, key);
        assert!(found.probes <= 16);
        assert_eq!(locator.hint_count(), 1);
    }

    #[test]
    fn test_forget_plan_drops_only_its_hints() {
        let (_, registry) = setup();
        let locator = ScatterGatherLocator::new(registry);
        let key = ShardKey::parse("2").unwrap();
        let (doomed, kept) = (Uuid::new_v4(), Uuid::new_v4());
        for _ in 0..5 {
            locator.remember(Uuid::new_v4(), doomed, key);
        }
        let survivor = Uuid::new_v4();
        locator.remember(survivor, kept, key);

        locator.forget_plan(doomed);
        assert_eq!(locator.hint_count(), 1);
        locator.forget(survivor);
        assert_eq!(locator.hint_count(), 0);
        assert!(locator.by_plan.is_empty());
    }

    #[test]
    fn test_hint_index_is_bounded() {
        let (_, registry) = setup();
        let locator = ScatterGatherLocator::new(registry).with_hint_capacity(3);
        let key = ShardKey::parse("4").unwrap();
        let plan_id = Uuid::new_v4();
        for _ in 0..10 {
            locator.remember(Uuid::new_v4(), plan_id, key);
        }
        assert_eq!(locator.hint_count(), 3);
    }

    static RECORDED: AtomicUsize = AtomicUsize::new(0);

    fn record(probes: usize) {
        RECORDED.fetch_add(probes, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn test_misses_are_reported_to_recorder() {
        let (_, registry) = setup();
        let locator = ScatterGatherLocator::new(registry).with_probe_recorder(record);

        let before = RECORDED.load(Ordering::SeqCst);
        let err = locator.locate(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
        assert_eq!(RECORDED.load(Ordering::SeqCst) - before, 16);
    }

    #[tokio::test]
    async fn test_unreachable_shard_aborts_search() {
        let (shards, registry) = setup();
        shards.shard(ShardKey::parse("3").unwrap()).set_unavailable(true);
        let locator = ScatterGatherLocator::new(registry);

        let err = locator.locate(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StorageError::Infrastructure { .. }));
    }
}
