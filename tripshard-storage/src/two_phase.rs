//! Cross-shard two-phase commit for administrative SQL scripts.
//!
//! Phase 1 runs the script on every shard in mapping order and prepares each
//! local transaction under a global id. Any failure before all shards are
//! prepared rolls every participant back. Phase 2 commits the prepared
//! transactions in the same order and stops at the first failure; shards
//! after that point keep their prepared transactions for an operator to
//! resolve. Nothing here retries or recovers.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{error, info, warn};
use tripshard_core::{CommitError, ShardDsn, ShardKey, ShardMapping, StorageResult};
use uuid::Uuid;

/// A dedicated, non-pooled connection to one shard, in an open transaction.
#[async_trait]
pub trait Participant: Send {
    /// Run the script inside the participant's transaction.
    async fn execute(&mut self, script: &str) -> StorageResult<()>;

    /// `PREPARE TRANSACTION '<gid>'`.
    async fn prepare(&mut self, gid: &str) -> StorageResult<()>;

    /// `COMMIT PREPARED '<gid>'`.
    async fn commit_prepared(&mut self, gid: &str) -> StorageResult<()>;

    /// `ROLLBACK PREPARED '<gid>'`.
    async fn rollback_prepared(&mut self, gid: &str) -> StorageResult<()>;

    /// Roll back the open, unprepared transaction.
    async fn rollback(&mut self) -> StorageResult<()>;

    async fn close(self: Box<Self>);
}

/// Opens participants. A statement timeout, when given, applies to every
/// statement on the connection.
#[async_trait]
pub trait ParticipantConnector: Send + Sync {
    async fn connect(
        &self,
        shard: ShardKey,
        dsn: &ShardDsn,
        statement_timeout: Option<Duration>,
    ) -> StorageResult<Box<dyn Participant>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantState {
    Connected,
    Prepared,
    Committed,
    RolledBack,
}

/// One shard's participant and its progress through the protocol.
pub struct PreparedTransactionHandle {
    pub shard: ShardKey,
    pub gid: String,
    pub state: ParticipantState,
    participant: Box<dyn Participant>,
}

impl PreparedTransactionHandle {
    fn new(shard: ShardKey, base_gid: &str, participant: Box<dyn Participant>) -> Self {
        Self {
            shard,
            gid: format!("{}_{}", base_gid, shard),
            state: ParticipantState::Connected,
            participant,
        }
    }

    async fn execute_and_prepare(&mut self, script: &str) -> StorageResult<()> {
        self.participant.execute(script).await?;
        self.participant.prepare(&self.gid).await?;
        self.state = ParticipantState::Prepared;
        Ok(())
    }

    async fn commit(&mut self) -> StorageResult<()> {
        self.participant.commit_prepared(&self.gid).await?;
        self.state = ParticipantState::Committed;
        Ok(())
    }

    /// Best-effort rollback appropriate to the current state.
    async fn abort(&mut self) {
        let result = match self.state {
            ParticipantState::Prepared => self.participant.rollback_prepared(&self.gid).await,
            ParticipantState::Connected => self.participant.rollback().await,
            ParticipantState::Committed | ParticipantState::RolledBack => return,
        };
        match result {
            Ok(()) => self.state = ParticipantState::RolledBack,
            Err(err) => warn!(shard = %self.shard, gid = %self.gid, error = %err, "rollback failed"),
        }
    }
}

/// Outcome of a fully committed script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub base_gid: String,
    pub committed: Vec<ShardKey>,
}

/// Prefix of every global transaction id issued by the coordinator.
pub const GID_PREFIX: &str = "apply_";

/// A fresh base global transaction id: `apply_<32 hex chars>`.
pub fn new_base_gid() -> String {
    format!("{}{}", GID_PREFIX, Uuid::new_v4().simple())
}

pub struct TwoPhaseCommitCoordinator<C> {
    connector: C,
    statement_timeout: Option<Duration>,
}

impl<C: ParticipantConnector> TwoPhaseCommitCoordinator<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            statement_timeout: None,
        }
    }

    /// Per-statement timeout on every participant connection. `None` or a
    /// zero duration disables it.
    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Apply `script` atomically across every shard in `mapping`.
    ///
    /// Every connection is closed before this returns, whatever the outcome.
    pub async fn apply(&self, mapping: &ShardMapping, script: &str) -> Result<ApplyReport, CommitError> {
        if mapping.is_empty() {
            return Err(CommitError::EmptyMapping);
        }
        if script.trim().is_empty() {
            return Err(CommitError::EmptyScript);
        }

        let base_gid = new_base_gid();
        info!(gid = %base_gid, shards = mapping.len(), "starting two-phase apply");

        let mut handles: Vec<PreparedTransactionHandle> = Vec::with_capacity(mapping.len());
        let result = self.run(mapping, script, &base_gid, &mut handles).await;

        for handle in handles {
            handle.participant.close().await;
        }
        result
    }

    async fn run(
        &self,
        mapping: &ShardMapping,
        script: &str,
        base_gid: &str,
        handles: &mut Vec<PreparedTransactionHandle>,
    ) -> Result<ApplyReport, CommitError> {
        for (shard, dsn) in mapping.iter() {
            match self.connector.connect(*shard, dsn, self.statement_timeout).await {
                Ok(participant) => {
                    handles.push(PreparedTransactionHandle::new(*shard, base_gid, participant))
                }
                Err(err) => {
                    warn!(shard = %shard, dsn = %dsn.redacted(), error = %err, "connect failed");
                    abort_all(handles).await;
                    return Err(CommitError::Aborted {
                        shard: *shard,
                        reason: err.to_string(),
                    });
                }
            }
        }

        for i in 0..handles.len() {
            if let Err(err) = handles[i].execute_and_prepare(script).await {
                let shard = handles[i].shard;
                warn!(shard = %shard, error = %err, "prepare phase failed, rolling back");
                abort_all(handles).await;
                return Err(CommitError::Aborted {
                    shard,
                    reason: err.to_string(),
                });
            }
            info!(shard = %handles[i].shard, gid = %handles[i].gid, "prepared");
        }

        for i in 0..handles.len() {
            if let Err(err) = handles[i].commit().await {
                let failed_shard = handles[i].shard;
                let committed: Vec<ShardKey> = handles[..i].iter().map(|h| h.shard).collect();
                let prepared: Vec<(ShardKey, String)> = handles[i + 1..]
                    .iter()
                    .map(|h| (h.shard, h.gid.clone()))
                    .collect();
                error!(
                    shard = %failed_shard,
                    gid = %handles[i].gid,
                    error = %err,
                    committed = ?committed,
                    still_prepared = ?prepared,
                    "commit phase failed; manual resolution required"
                );
                return Err(CommitError::PartialCommit {
                    failed_shard,
                    reason: err.to_string(),
                    committed,
                    prepared,
                });
            }
            info!(shard = %handles[i].shard, "committed");
        }

        Ok(ApplyReport {
            base_gid: base_gid.to_string(),
            committed: handles.iter().map(|h| h.shard).collect(),
        })
    }
}

async fn abort_all(handles: &mut [PreparedTransactionHandle]) {
    for handle in handles.iter_mut() {
        handle.abort().await;
    }
}
