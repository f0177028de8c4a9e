//! Aggregate-level operations over the sharded backend.

use crate::guard::{Guarded, Mutation, OptimisticVersionGuard};
use crate::locator::{Located, ProbeRecorder, ScatterGatherLocator};
use crate::registry::PoolRegistry;
use crate::router::ShardRouter;
use crate::traits::{PoolFactory, ShardPool, ShardSession};
use chrono::Utc;
use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use tripshard_core::{
    new_entity_id, Location, LocationId, LocationPatch, NewLocation, Plan, PlanDetails,
    PlanFields, PlanId, PlanSummary, ShardKey, ShardMapping, StorageError, StorageResult,
    Version,
};

/// Reachability of one shard.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardHealth {
    pub shard: ShardKey,
    pub healthy: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// Result of a location write: the location and the plan version it
/// produced.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationWrite {
    pub location: Location,
    pub plan_version: Version,
    /// Shards probed to find the location; zero when routed by plan id.
    pub probes: usize,
}

/// Entry point for every request-path operation.
pub struct ShardedStore<F: PoolFactory> {
    router: ShardRouter,
    registry: Arc<PoolRegistry<F>>,
    locator: ScatterGatherLocator<F>,
}

impl<F: PoolFactory> ShardedStore<F> {
    pub fn new(mapping: Arc<ShardMapping>, factory: F) -> Self {
        let registry = Arc::new(PoolRegistry::new(mapping.clone(), factory));
        Self {
            router: ShardRouter::new(mapping),
            locator: ScatterGatherLocator::new(registry.clone()),
            registry,
        }
    }

    /// Report the shard count of every location lookup to `recorder`.
    pub fn with_probe_recorder(mut self, recorder: ProbeRecorder) -> Self {
        self.locator = self.locator.with_probe_recorder(recorder);
        self
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    pub fn registry(&self) -> &PoolRegistry<F> {
        &self.registry
    }

    pub fn locator(&self) -> &ScatterGatherLocator<F> {
        &self.locator
    }

    async fn session_for(&self, plan_id: PlanId) -> StorageResult<<F::Pool as ShardPool>::Session> {
        let key = self.router.route(&plan_id)?;
        self.registry.acquire(key).await
    }

    /// Insert a new plan at version 1 on the shard its fresh id routes to.
    pub async fn create_plan(&self, fields: PlanFields) -> StorageResult<Plan> {
        let plan = Plan::new(new_entity_id(), fields, Utc::now());
        let mut session = self.session_for(plan.id).await?;
        session.insert_plan(&plan).await?;
        info!(plan_id = %plan.id, shard = %self.router.shard_for(&plan.id), "plan created");
        Ok(plan)
    }

    /// A plan with its locations ordered by visit order.
    pub async fn get_plan(&self, plan_id: PlanId) -> StorageResult<PlanDetails> {
        let mut session = self.session_for(plan_id).await?;
        let plan = session
            .fetch_plan(plan_id)
            .await?
            .ok_or_else(|| StorageError::plan_not_found(plan_id))?;
        let locations = session.fetch_locations(plan_id).await?;
        Ok(PlanDetails { plan, locations })
    }

    /// Every plan on every shard, most recently updated first.
    pub async fn list_plans(&self) -> StorageResult<Vec<PlanSummary>> {
        let mut summaries = Vec::new();
        for entry in self.registry.all_pools() {
            let (_, pool) = entry?;
            let mut session = pool.acquire().await?;
            summaries.extend(session.list_plan_summaries().await?);
        }
        summaries.sort_by_key(|summary| Reverse(summary.plan.updated_at));
        Ok(summaries)
    }

    /// Replace a plan's editable fields.
    pub async fn update_plan(
        &self,
        plan_id: PlanId,
        expected: Version,
        fields: PlanFields,
    ) -> StorageResult<Plan> {
        let mut session = self.session_for(plan_id).await?;
        match OptimisticVersionGuard::apply(&mut session, plan_id, expected, Mutation::UpdatePlan(fields))
            .await?
        {
            Guarded::Plan(plan) => Ok(plan),
            other => Err(unexpected(other)),
        }
    }

    /// Delete a plan and its locations.
    ///
    /// Without an expected version the current one is read first, so the
    /// delete still fails cleanly if another write lands in between.
    pub async fn delete_plan(&self, plan_id: PlanId, expected: Option<Version>) -> StorageResult<()> {
        let mut session = self.session_for(plan_id).await?;
        let expected = match expected {
            Some(version) => version,
            None => {
                session
                    .fetch_plan(plan_id)
                    .await?
                    .ok_or_else(|| StorageError::plan_not_found(plan_id))?
                    .version
            }
        };
        OptimisticVersionGuard::apply(&mut session, plan_id, expected, Mutation::DeletePlan).await?;
        self.locator.forget_plan(plan_id);
        Ok(())
    }

    /// Append or insert a location into a plan.
    pub async fn add_location(
        &self,
        plan_id: PlanId,
        expected: Version,
        new: NewLocation,
    ) -> StorageResult<LocationWrite> {
        let key = self.router.route(&plan_id)?;
        let mut session = self.registry.acquire(key).await?;
        match OptimisticVersionGuard::apply(&mut session, plan_id, expected, Mutation::CreateLocation(new))
            .await?
        {
            Guarded::Location { plan, location } => {
                self.locator.remember(location.id, plan_id, key);
                Ok(LocationWrite {
                    location,
                    plan_version: plan.version,
                    probes: 0,
                })
            }
            other => Err(unexpected(other)),
        }
    }

    /// Patch a location found by id alone.
    pub async fn update_location(
        &self,
        location_id: LocationId,
        expected: Version,
        patch: LocationPatch,
    ) -> StorageResult<LocationWrite> {
        let (located, mut session) = self.locate_with_session(location_id).await?;
        let plan_id = located.location.travel_plan_id;
        let mutation = Mutation::UpdateLocation { location_id, patch };
        match OptimisticVersionGuard::apply(&mut session, plan_id, expected, mutation).await? {
            Guarded::Location { plan, location } => Ok(LocationWrite {
                location,
                plan_version: plan.version,
                probes: located.probes,
            }),
            other => Err(unexpected(other)),
        }
    }

    /// Remove a location found by id alone. Returns the new plan version
    /// and the number of shards probed.
    pub async fn delete_location(
        &self,
        location_id: LocationId,
        expected: Version,
    ) -> StorageResult<(Version, usize)> {
        let (located, mut session) = self.locate_with_session(location_id).await?;
        let plan_id = located.location.travel_plan_id;
        let mutation = Mutation::DeleteLocation { location_id };
        match OptimisticVersionGuard::apply(&mut session, plan_id, expected, mutation).await? {
            Guarded::LocationDeleted { plan } => {
                self.locator.forget(location_id);
                Ok((plan.version, located.probes))
            }
            other => Err(unexpected(other)),
        }
    }

    async fn locate_with_session(
        &self,
        location_id: LocationId,
    ) -> StorageResult<(Located, <F::Pool as ShardPool>::Session)> {
        let located = self.locator.locate(location_id).await?;
        debug!(location_id = %location_id, shard = %located.shard, probes = located.probes, "location resolved");
        let session = self.registry.acquire(located.shard).await?;
        Ok((located, session))
    }

    /// Ping every configured shard.
    pub async fn shard_health(&self) -> Vec<ShardHealth> {
        let mut report = Vec::with_capacity(self.registry.mapping().len());
        for shard in self.registry.mapping().keys() {
            let start = Instant::now();
            let result = match self.registry.acquire(shard).await {
                Ok(mut session) => session.ping().await,
                Err(err) => Err(err),
            };
            report.push(ShardHealth {
                shard,
                healthy: result.is_ok(),
                latency_ms: start.elapsed().as_millis() as u64,
                error: result.err().map(|err| err.to_string()),
            });
        }
        report
    }
}

fn unexpected(outcome: Guarded) -> StorageError {
    StorageError::infrastructure(format!("unexpected guarded outcome: {:?}", outcome))
}
