//! tripshard Storage - Sharded Consistency Layer
//!
//! Routes plan aggregates to shards, pools shard connections, finds
//! locations by id across shards, guards every aggregate write with an
//! optimistic version check, and applies administrative scripts to all
//! shards through two-phase commit.
//!
//! Backends plug in through the traits in [`traits`] and
//! [`two_phase::ParticipantConnector`]. [`memory`] and [`scripted`] provide
//! in-process implementations for tests.

pub mod guard;
pub mod locator;
pub mod memory;
pub mod registry;
pub mod router;
pub mod scripted;
pub mod store;
pub mod traits;
pub mod two_phase;

pub use guard::{Guarded, Mutation, OptimisticVersionGuard};
pub use locator::{Located, ProbeRecorder, ScatterGatherLocator, DEFAULT_HINT_CAPACITY};
pub use memory::{InMemoryPool, InMemorySession, InMemoryShards};
pub use registry::PoolRegistry;
pub use router::ShardRouter;
pub use scripted::ScriptedParticipants;
pub use store::{LocationWrite, ShardHealth, ShardedStore};
pub use traits::{PlanTx, PoolFactory, ShardPool, ShardSession};
pub use two_phase::{
    new_base_gid, ApplyReport, Participant, ParticipantConnector, ParticipantState,
    PreparedTransactionHandle, TwoPhaseCommitCoordinator, GID_PREFIX,
};
