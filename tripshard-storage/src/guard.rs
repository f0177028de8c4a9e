//! Optimistic version guard for writes to a plan aggregate.
//!
//! Every accepted write bumps the plan's version by exactly one inside the
//! same local transaction as the change itself:
//!
//! 1. `compare_and_bump` (or a versioned delete) against the caller's
//!    expected version.
//! 2. No row matched: re-read the version to tell "plan gone" apart from
//!    "someone else wrote first", roll back, and report which.
//! 3. Apply the mutation; any failure rolls everything back, including the
//!    version bump.
//! 4. Commit.

use crate::traits::{PlanTx, ShardSession};
use chrono::Utc;
use tracing::{debug, info, warn};
use tripshard_core::{
    new_entity_id, Location, LocationId, LocationPatch, NewLocation, Plan, PlanFields, PlanId,
    StorageError, StorageResult, Version,
};

/// A write to one plan aggregate.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    UpdatePlan(PlanFields),
    DeletePlan,
    CreateLocation(NewLocation),
    UpdateLocation {
        location_id: LocationId,
        patch: LocationPatch,
    },
    DeleteLocation {
        location_id: LocationId,
    },
}

impl Mutation {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::UpdatePlan(_) => "update_plan",
            Mutation::DeletePlan => "delete_plan",
            Mutation::CreateLocation(_) => "create_location",
            Mutation::UpdateLocation { .. } => "update_location",
            Mutation::DeleteLocation { .. } => "delete_location",
        }
    }
}

/// Committed result of a guarded write.
#[derive(Debug, Clone, PartialEq)]
pub enum Guarded {
    /// Plan fields were replaced; the refreshed plan.
    Plan(Plan),
    /// A location was created or updated.
    Location { plan: Plan, location: Location },
    /// A location was removed; the plan at its new version.
    LocationDeleted { plan: Plan },
    PlanDeleted { plan_id: PlanId },
}

impl Guarded {
    /// The plan version after the write, if the plan still exists.
    pub fn new_version(&self) -> Option<Version> {
        match self {
            Guarded::Plan(plan)
            | Guarded::Location { plan, .. }
            | Guarded::LocationDeleted { plan } => Some(plan.version),
            Guarded::PlanDeleted { .. } => None,
        }
    }
}

/// Runs a mutation under optimistic concurrency control.
pub struct OptimisticVersionGuard;

impl OptimisticVersionGuard {
    /// Apply `mutation` to `plan_id` if its current version is `expected`.
    ///
    /// The session must be on the plan's shard. On any error the local
    /// transaction is rolled back and the plan is left untouched.
    pub async fn apply<S: ShardSession>(
        session: &mut S,
        plan_id: PlanId,
        expected: Version,
        mutation: Mutation,
    ) -> StorageResult<Guarded> {
        let kind = mutation.kind();
        let mut tx = session.begin().await?;

        match Self::run(tx.as_mut(), plan_id, expected, mutation).await {
            Ok(outcome) => {
                tx.commit().await?;
                info!(
                    plan_id = %plan_id,
                    kind,
                    expected_version = expected,
                    new_version = ?outcome.new_version(),
                    "guarded write committed"
                );
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(plan_id = %plan_id, error = %rollback_err, "rollback failed");
                }
                match &err {
                    StorageError::VersionConflict { .. } | StorageError::OrderConflict { .. } => {
                        warn!(
                            plan_id = %plan_id,
                            kind,
                            expected_version = expected,
                            error = %err,
                            "guarded write rejected"
                        );
                    }
                    _ => {
                        debug!(
                            plan_id = %plan_id,
                            kind,
                            expected_version = expected,
                            error = %err,
                            "guarded write failed"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    async fn run(
        tx: &mut dyn PlanTx,
        plan_id: PlanId,
        expected: Version,
        mutation: Mutation,
    ) -> StorageResult<Guarded> {
        if let Mutation::DeletePlan = mutation {
            if tx.delete_plan_if_version(plan_id, expected).await? == 0 {
                return Err(Self::explain_miss(tx, plan_id).await?);
            }
            return Ok(Guarded::PlanDeleted { plan_id });
        }

        if tx.compare_and_bump(plan_id, expected).await? == 0 {
            return Err(Self::explain_miss(tx, plan_id).await?);
        }

        let location = match mutation {
            Mutation::UpdatePlan(fields) => {
                tx.write_plan_fields(plan_id, &fields).await?;
                None
            }
            Mutation::CreateLocation(new) => {
                let visit_order = match new.visit_order {
                    Some(order) => {
                        if tx.visit_order_taken(plan_id, order, None).await? {
                            return Err(StorageError::OrderConflict {
                                plan_id,
                                requested_order: order,
                            });
                        }
                        order
                    }
                    None => next_visit_order(tx.max_visit_order(plan_id).await?)?,
                };
                let location = Location::new(new_entity_id(), plan_id, new, visit_order, Utc::now());
                tx.insert_location(&location).await?;
                Some(location)
            }
            Mutation::UpdateLocation { location_id, patch } => {
                let mut location = tx
                    .load_location(location_id)
                    .await?
                    .filter(|location| location.travel_plan_id == plan_id)
                    .ok_or_else(|| StorageError::location_not_found(location_id))?;
                if let Some(order) = patch.visit_order {
                    if order != location.visit_order
                        && tx.visit_order_taken(plan_id, order, Some(location_id)).await?
                    {
                        return Err(StorageError::OrderConflict {
                            plan_id,
                            requested_order: order,
                        });
                    }
                }
                patch.apply_to(&mut location);
                check_stay(&location)?;
                tx.write_location(&location).await?;
                Some(location)
            }
            Mutation::DeleteLocation { location_id } => {
                if tx.delete_location(plan_id, location_id).await? == 0 {
                    return Err(StorageError::location_not_found(location_id));
                }
                let plan = Self::reload(tx, plan_id).await?;
                return Ok(Guarded::LocationDeleted { plan });
            }
            Mutation::DeletePlan => None,
        };

        let plan = Self::reload(tx, plan_id).await?;
        Ok(match location {
            Some(location) => Guarded::Location { plan, location },
            None => Guarded::Plan(plan),
        })
    }

    async fn reload(tx: &mut dyn PlanTx, plan_id: PlanId) -> StorageResult<Plan> {
        tx.load_plan(plan_id)
            .await?
            .ok_or_else(|| StorageError::plan_not_found(plan_id))
    }

    /// Classify a zero-row compare-and-swap.
    async fn explain_miss(tx: &mut dyn PlanTx, plan_id: PlanId) -> StorageResult<StorageError> {
        Ok(match tx.plan_version(plan_id).await? {
            Some(current_version) => StorageError::VersionConflict {
                plan_id,
                current_version,
            },
            None => StorageError::plan_not_found(plan_id),
        })
    }
}

/// Order for a location appended after `max`, the plan's highest order.
fn next_visit_order(max: Option<i32>) -> StorageResult<i32> {
    match max {
        None => Ok(1),
        Some(max) => max.checked_add(1).ok_or_else(|| {
            StorageError::constraint_violation(format!(
                "no visit order left after {}; give the location an explicit order",
                max
            ))
        }),
    }
}

/// A patch can move one end of a stay past the stored other end.
fn check_stay(location: &Location) -> StorageResult<()> {
    if let (Some(arrival), Some(departure)) = (location.arrival_date, location.departure_date) {
        if departure < arrival {
            return Err(StorageError::constraint_violation(format!(
                "location {} would depart ({}) before it arrives ({})",
                location.id, departure, arrival
            )));
        }
    }
    Ok(())
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::memory::InMemoryShards;
    use crate::traits::ShardPool;
    use proptest::prelude::*;
    use tripshard_core::ShardKey;
    use uuid::Uuid;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// After N accepted writes the plan is at version 1 + N.
        #[test]
        fn prop_version_counts_accepted_writes(ops in prop::collection::vec(0u8..3, 0..20)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let pool = InMemoryShards::new().shard(ShardKey::parse("9").unwrap());
                let plan = Plan::new(Uuid::new_v4(), PlanFields::titled("Trip"), Utc::now());
                pool.acquire().await.unwrap().insert_plan(&plan).await.unwrap();

                let mut version = 1;
                let mut created: Vec<LocationId> = Vec::new();
                for op in &ops {
                    let mutation = match (op, created.last()) {
                        (0, _) => Mutation::UpdatePlan(PlanFields::titled("Trip")),
                        (2, Some(id)) => Mutation::DeleteLocation { location_id: *id },
                        _ => Mutation::CreateLocation(NewLocation::named("Stop")),
                    };
                    let mut session = pool.acquire().await.unwrap();
                    let outcome = OptimisticVersionGuard::apply(&mut session, plan.id, version, mutation)
                        .await
                        .unwrap();
                    match outcome {
                        Guarded::Location { location, .. } => created.push(location.id),
                        Guarded::LocationDeleted { .. } => {
                            created.pop();
                        }
                        _ => {}
                    }
                    version += 1;
                }

                let stored = pool.plan(plan.id).await.unwrap();
                assert_eq!(stored.version, 1 + ops.len() as i32);
            });
        }
    }
}
