//! Identity types for tripshard aggregates

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Aggregate identifier.
///
/// Plans use random (v4) UUIDs: the shard key is taken from the last hex
/// digit, so the low bits must be uniformly distributed.
pub type EntityId = Uuid;

/// Identifier of a travel plan.
pub type PlanId = Uuid;

/// Identifier of a location within a plan.
pub type LocationId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Optimistic concurrency version of a plan (always >= 1).
pub type Version = i32;

/// Generate a new random identifier.
pub fn new_entity_id() -> EntityId {
    Uuid::new_v4()
}
