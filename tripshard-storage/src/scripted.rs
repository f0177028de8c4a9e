//! Scripted two-phase commit participants with failure injection.
//!
//! Each shard keeps "durable" state that outlives its connection: scripts
//! that were committed and transactions that are still prepared. Tests use it
//! to check what every shard would look like after the coordinator exits.

use crate::two_phase::{Participant, ParticipantConnector};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tripshard_core::{ShardDsn, ShardKey, StorageError, StorageResult};

#[derive(Debug, Default)]
struct ScriptedState {
    fail_connect: HashSet<ShardKey>,
    fail_execute: HashSet<ShardKey>,
    fail_prepare: HashSet<ShardKey>,
    fail_commit: HashSet<ShardKey>,
    committed: HashMap<ShardKey, Vec<String>>,
    prepared: HashMap<ShardKey, Vec<(String, String)>>,
    rolled_back_prepared: Vec<String>,
    timeouts: HashMap<ShardKey, Option<Duration>>,
    open: usize,
}

#[derive(Clone, Default)]
pub struct ScriptedParticipants {
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedParticipants {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ScriptedState> {
        lock(&self.state)
    }

    pub fn fail_connect_on(&self, shard: ShardKey) {
        self.state().fail_connect.insert(shard);
    }

    /// Make the script fail on `shard`, as a syntax error would.
    pub fn fail_execute_on(&self, shard: ShardKey) {
        self.state().fail_execute.insert(shard);
    }

    pub fn fail_prepare_on(&self, shard: ShardKey) {
        self.state().fail_prepare.insert(shard);
    }

    pub fn fail_commit_on(&self, shard: ShardKey) {
        self.state().fail_commit.insert(shard);
    }

    pub fn committed_scripts(&self, shard: ShardKey) -> Vec<String> {
        self.state().committed.get(&shard).cloned().unwrap_or_default()
    }

    pub fn prepared_gids(&self, shard: ShardKey) -> Vec<String> {
        self.state()
            .prepared
            .get(&shard)
            .map(|entries| entries.iter().map(|(gid, _)| gid.clone()).collect())
            .unwrap_or_default()
    }

    /// Gids that were prepared and then rolled back.
    pub fn rolled_back_prepared(&self) -> Vec<String> {
        self.state().rolled_back_prepared.clone()
    }

    pub fn statement_timeout(&self, shard: ShardKey) -> Option<Duration> {
        self.state().timeouts.get(&shard).copied().flatten()
    }

    pub fn open_connections(&self) -> usize {
        self.state().open
    }
}

fn lock(state: &Mutex<ScriptedState>) -> MutexGuard<'_, ScriptedState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl ParticipantConnector for ScriptedParticipants {
    async fn connect(
        &self,
        shard: ShardKey,
        _dsn: &ShardDsn,
        statement_timeout: Option<Duration>,
    ) -> StorageResult<Box<dyn Participant>> {
        let mut state = self.state();
        if state.fail_connect.contains(&shard) {
            return Err(StorageError::infrastructure(format!(
                "could not connect to shard {}",
                shard
            )));
        }
        state.timeouts.insert(shard, statement_timeout);
        state.open += 1;
        Ok(Box::new(ScriptedParticipant {
            shard,
            state: self.state.clone(),
            pending: None,
        }))
    }
}

struct ScriptedParticipant {
    shard: ShardKey,
    state: Arc<Mutex<ScriptedState>>,
    pending: Option<String>,
}

#[async_trait]
impl Participant for ScriptedParticipant {
    async fn execute(&mut self, script: &str) -> StorageResult<()> {
        if lock(&self.state).fail_execute.contains(&self.shard) {
            return Err(StorageError::infrastructure("syntax error at or near \"ALTER\""));
        }
        self.pending = Some(script.to_string());
        Ok(())
    }

    async fn prepare(&mut self, gid: &str) -> StorageResult<()> {
        let mut state = lock(&self.state);
        if state.fail_prepare.contains(&self.shard) {
            return Err(StorageError::infrastructure("prepared transactions are disabled"));
        }
        let script = self.pending.take().unwrap_or_default();
        state
            .prepared
            .entry(self.shard)
            .or_default()
            .push((gid.to_string(), script));
        Ok(())
    }

    async fn commit_prepared(&mut self, gid: &str) -> StorageResult<()> {
        let mut state = lock(&self.state);
        if state.fail_commit.contains(&self.shard) {
            return Err(StorageError::infrastructure("server closed the connection unexpectedly"));
        }
        let entries = state.prepared.entry(self.shard).or_default();
        let position = entries
            .iter()
            .position(|(candidate, _)| candidate == gid)
            .ok_or_else(|| {
                StorageError::infrastructure(format!("prepared transaction {} does not exist", gid))
            })?;
        let (_, script) = entries.remove(position);
        state.committed.entry(self.shard).or_default().push(script);
        Ok(())
    }

    async fn rollback_prepared(&mut self, gid: &str) -> StorageResult<()> {
        let mut state = lock(&self.state);
        if let Some(entries) = state.prepared.get_mut(&self.shard) {
            entries.retain(|(candidate, _)| candidate != gid);
        }
        state.rolled_back_prepared.push(gid.to_string());
        Ok(())
    }

    async fn rollback(&mut self) -> StorageResult<()> {
        self.pending = None;
        Ok(())
    }

    async fn close(self: Box<Self>) {
        let mut state = lock(&self.state);
        state.open = state.open.saturating_sub(1);
    }
}
