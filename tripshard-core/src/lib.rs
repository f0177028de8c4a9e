//! tripshard Core - Aggregate Types
//!
//! Pure data structures shared by every other crate: identifiers, the
//! travel-plan aggregate, shard keys and the static shard mapping, and the
//! error taxonomy. No I/O beyond reading the mapping file.

pub mod entities;
pub mod error;
pub mod identity;
pub mod shard;

pub use entities::{
    EntityType, Location, LocationPatch, NewLocation, Plan, PlanDetails, PlanFields, PlanSummary,
    DEFAULT_CURRENCY,
};
pub use error::{
    CommitError, ConfigError, StorageError, StorageResult, TripshardError, TripshardResult,
};
pub use identity::{new_entity_id, EntityId, LocationId, PlanId, Timestamp, Version};
pub use shard::{redact_dsn, ShardDsn, ShardKey, ShardMapping, SHARD_COUNT};
