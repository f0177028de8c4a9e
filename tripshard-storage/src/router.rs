//! Identifier → shard routing.

use std::sync::Arc;
use tripshard_core::{EntityId, ShardKey, ShardMapping, StorageError, StorageResult};

/// Maps aggregate identifiers to shard keys.
///
/// Routing is a pure function of the identifier; the mapping is only
/// consulted to reject keys that have no configured shard.
#[derive(Debug, Clone)]
pub struct ShardRouter {
    mapping: Arc<ShardMapping>,
}

impl ShardRouter {
    pub fn new(mapping: Arc<ShardMapping>) -> Self {
        Self { mapping }
    }

    /// The shard key for an identifier, whether or not it is configured.
    pub fn shard_for(&self, id: &EntityId) -> ShardKey {
        ShardKey::for_id(id)
    }

    /// The shard key for an identifier, failing with `UnknownShard` when
    /// the mapping has no entry for it.
    pub fn route(&self, id: &EntityId) -> StorageResult<ShardKey> {
        let key = self.shard_for(id);
        if self.mapping.contains(&key) {
            Ok(key)
        } else {
            Err(StorageError::UnknownShard { key })
        }
    }

    pub fn mapping(&self) -> &ShardMapping {
        &self.mapping
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    proptest! {
        #[test]
        fn prop_routing_is_deterministic(bytes in any::<[u8; 16]>()) {
            let id = Uuid::from_bytes(bytes);
            let text = id.to_string();
            let first = ShardKey::for_id(&id);
            let second = ShardKey::for_id(&Uuid::parse_str(&text).unwrap());
            prop_assert_eq!(first, second);
            prop_assert_eq!(first.as_char(), text.chars().last().unwrap());
        }
    }
}
