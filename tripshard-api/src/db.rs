//! PostgreSQL Shard Backend
//!
//! One deadpool-postgres pool per shard for the request path, and dedicated
//! tokio-postgres connections for two-phase commit participants.
//!
//! Driver errors are logged here and surface as
//! `StorageError::Infrastructure`. Two constraint failures are business
//! outcomes instead: unique violations of `unique_plan_order` become
//! `StorageError::OrderConflict`, and check violations become
//! `StorageError::ConstraintViolation`.

use async_trait::async_trait;
use deadpool_postgres::{
    Config, ManagerConfig, Object, Pool, PoolConfig, PoolError, RecyclingMethod, Runtime,
    Transaction,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, info, warn};
use tripshard_core::{
    Location, LocationId, Plan, PlanFields, PlanId, PlanSummary, ShardDsn, ShardKey,
    StorageError, StorageResult, Version,
};
use tripshard_storage::{
    Participant, ParticipantConnector, PlanTx, PoolFactory, ShardPool, ShardSession,
    ShardedStore,
};

/// Table and index DDL applied to every shard.
pub const SCHEMA_SQL: &str = include_str!("../sql/schema.sql");

const UNIQUE_PLAN_ORDER: &str = "unique_plan_order";

// ============================================================================
// POOL CONFIGURATION
// ============================================================================

/// Per-shard connection pool settings.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Maximum connections per shard pool
    pub max_size: usize,
    /// Wait and connect timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Read `TRIPSHARD_DB_POOL_SIZE` and `TRIPSHARD_DB_TIMEOUT` (seconds).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_size: std::env::var("TRIPSHARD_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: std::env::var("TRIPSHARD_DB_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    /// Create a lazily connecting pool for one shard.
    pub fn create_pool(&self, dsn: &ShardDsn) -> StorageResult<Pool> {
        let mut cfg = Config::new();
        cfg.url = Some(dsn.expose().to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let mut pool = PoolConfig::new(self.max_size);
        pool.timeouts.wait = Some(self.timeout);
        pool.timeouts.create = Some(self.timeout);
        cfg.pool = Some(pool);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls).map_err(|e| {
            StorageError::infrastructure(format!(
                "failed to create pool for {}: {}",
                dsn.redacted(),
                e
            ))
        })
    }
}

// ============================================================================
// REQUEST-PATH BACKEND
// ============================================================================

/// Builds deadpool-postgres pools for the shard registry.
#[derive(Debug, Clone, Default)]
pub struct PgShardFactory {
    config: DbConfig,
}

impl PgShardFactory {
    pub fn new(config: DbConfig) -> Self {
        Self { config }
    }
}

impl PoolFactory for PgShardFactory {
    type Pool = PgPool;

    fn create_pool(&self, key: ShardKey, dsn: &ShardDsn) -> StorageResult<PgPool> {
        Ok(PgPool {
            shard: key,
            pool: self.config.create_pool(dsn)?,
        })
    }
}

#[derive(Clone)]
pub struct PgPool {
    shard: ShardKey,
    pool: Pool,
}

impl PgPool {
    pub fn shard(&self) -> ShardKey {
        self.shard
    }

    /// Create the tables and indexes if they do not exist yet.
    pub async fn ensure_schema(&self) -> StorageResult<()> {
        let client = self.pool.get().await.map_err(|e| pool_error(self.shard, e))?;
        client.batch_execute(SCHEMA_SQL).await.map_err(db_error)?;
        info!(shard = %self.shard, "schema ensured");
        Ok(())
    }
}

/// Apply [`SCHEMA_SQL`] to every shard in mapping order, stopping at the
/// first failure.
pub async fn ensure_schema(store: &ShardedStore<PgShardFactory>) -> StorageResult<()> {
    for entry in store.registry().all_pools() {
        let (_, pool) = entry?;
        pool.ensure_schema().await?;
    }
    Ok(())
}

#[async_trait]
impl ShardPool for PgPool {
    type Session = PgSession;

    async fn acquire(&self) -> StorageResult<PgSession> {
        let client = self.pool.get().await.map_err(|e| pool_error(self.shard, e))?;
        Ok(PgSession {
            shard: self.shard,
            client,
        })
    }
}

/// A pooled connection. Dropping it returns the connection to its pool.
pub struct PgSession {
    shard: ShardKey,
    client: Object,
}

#[async_trait]
impl ShardSession for PgSession {
    async fn ping(&mut self) -> StorageResult<()> {
        self.client.simple_query("SELECT 1").await.map_err(db_error)?;
        Ok(())
    }

    async fn insert_plan(&mut self, plan: &Plan) -> StorageResult<()> {
        self.client
            .execute(
                "INSERT INTO travel_plans (id, title, description, start_date, end_date, budget, \
                 currency, is_public, version, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                &[
                    &plan.id,
                    &plan.title,
                    &plan.description,
                    &plan.start_date,
                    &plan.end_date,
                    &plan.budget,
                    &plan.currency,
                    &plan.is_public,
                    &plan.version,
                    &plan.created_at,
                    &plan.updated_at,
                ],
            )
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn fetch_plan(&mut self, id: PlanId) -> StorageResult<Option<Plan>> {
        let row = self
            .client
            .query_opt(SELECT_PLAN, &[&id])
            .await
            .map_err(db_error)?;
        row.as_ref().map(plan_from_row).transpose().map_err(db_error)
    }

    async fn fetch_locations(&mut self, plan_id: PlanId) -> StorageResult<Vec<Location>> {
        let rows = self
            .client
            .query(SELECT_PLAN_LOCATIONS, &[&plan_id])
            .await
            .map_err(db_error)?;
        rows.iter()
            .map(location_from_row)
            .collect::<Result<_, _>>()
            .map_err(db_error)
    }

    async fn list_plan_summaries(&mut self) -> StorageResult<Vec<PlanSummary>> {
        let rows = self
            .client
            .query(
                "SELECT p.id, p.title, p.description, p.start_date, p.end_date, p.budget, \
                 p.currency, p.is_public, p.version, p.created_at, p.updated_at, \
                 (SELECT COUNT(*) FROM locations l WHERE l.travel_plan_id = p.id) AS location_count \
                 FROM travel_plans p ORDER BY p.updated_at DESC",
                &[],
            )
            .await
            .map_err(db_error)?;
        debug!(shard = %self.shard, plans = rows.len(), "listed plans");
        rows.iter()
            .map(|row| {
                Ok(PlanSummary {
                    plan: plan_from_row(row)?,
                    location_count: row.try_get("location_count")?,
                })
            })
            .collect::<Result<_, tokio_postgres::Error>>()
            .map_err(db_error)
    }

    async fn fetch_location(&mut self, id: LocationId) -> StorageResult<Option<Location>> {
        let row = self
            .client
            .query_opt(SELECT_LOCATION, &[&id])
            .await
            .map_err(db_error)?;
        row.as_ref().map(location_from_row).transpose().map_err(db_error)
    }

    async fn begin<'a>(&'a mut self) -> StorageResult<Box<dyn PlanTx + 'a>> {
        let tx = self.client.transaction().await.map_err(db_error)?;
        Ok(Box::new(PgPlanTx { tx }))
    }
}

/// A local transaction on one shard. Rolled back on drop unless committed.
struct PgPlanTx<'a> {
    tx: Transaction<'a>,
}

#[async_trait]
impl<'a> PlanTx for PgPlanTx<'a> {
    async fn compare_and_bump(&mut self, plan_id: PlanId, expected: Version) -> StorageResult<u64> {
        self.tx
            .execute(
                "UPDATE travel_plans SET version = version + 1, updated_at = now() \
                 WHERE id = $1 AND version = $2",
                &[&plan_id, &expected],
            )
            .await
            .map_err(db_error)
    }

    async fn delete_plan_if_version(
        &mut self,
        plan_id: PlanId,
        expected: Version,
    ) -> StorageResult<u64> {
        self.tx
            .execute(
                "DELETE FROM travel_plans WHERE id = $1 AND version = $2",
                &[&plan_id, &expected],
            )
            .await
            .map_err(db_error)
    }

    async fn plan_version(&mut self, plan_id: PlanId) -> StorageResult<Option<Version>> {
        let row = self
            .tx
            .query_opt("SELECT version FROM travel_plans WHERE id = $1", &[&plan_id])
            .await
            .map_err(db_error)?;
        row.map(|r| r.try_get::<_, Version>(0))
            .transpose()
            .map_err(db_error)
    }

    async fn load_plan(&mut self, plan_id: PlanId) -> StorageResult<Option<Plan>> {
        let row = self
            .tx
            .query_opt(SELECT_PLAN, &[&plan_id])
            .await
            .map_err(db_error)?;
        row.as_ref().map(plan_from_row).transpose().map_err(db_error)
    }

    async fn write_plan_fields(&mut self, plan_id: PlanId, fields: &PlanFields) -> StorageResult<()> {
        self.tx
            .execute(
                "UPDATE travel_plans SET title = $2, description = $3, start_date = $4, \
                 end_date = $5, budget = $6, currency = $7, is_public = $8 WHERE id = $1",
                &[
                    &plan_id,
                    &fields.title,
                    &fields.description,
                    &fields.start_date,
                    &fields.end_date,
                    &fields.budget,
                    &fields.currency,
                    &fields.is_public,
                ],
            )
            .await
            .map_err(checked_write_error)?;
        Ok(())
    }

    async fn max_visit_order(&mut self, plan_id: PlanId) -> StorageResult<Option<i32>> {
        let row = self
            .tx
            .query_one(
                "SELECT MAX(visit_order) FROM locations WHERE travel_plan_id = $1",
                &[&plan_id],
            )
            .await
            .map_err(db_error)?;
        row.try_get::<_, Option<i32>>(0).map_err(db_error)
    }

    async fn visit_order_taken(
        &mut self,
        plan_id: PlanId,
        order: i32,
        except: Option<LocationId>,
    ) -> StorageResult<bool> {
        let row = self
            .tx
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM locations WHERE travel_plan_id = $1 \
                 AND visit_order = $2 AND ($3::uuid IS NULL OR id <> $3))",
                &[&plan_id, &order, &except],
            )
            .await
            .map_err(db_error)?;
        row.try_get::<_, bool>(0).map_err(db_error)
    }

    async fn insert_location(&mut self, location: &Location) -> StorageResult<()> {
        self.tx
            .execute(
                "INSERT INTO locations (id, travel_plan_id, name, address, latitude, longitude, \
                 visit_order, arrival_date, departure_date, budget, notes, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
                &[
                    &location.id,
                    &location.travel_plan_id,
                    &location.name,
                    &location.address,
                    &location.latitude,
                    &location.longitude,
                    &location.visit_order,
                    &location.arrival_date,
                    &location.departure_date,
                    &location.budget,
                    &location.notes,
                    &location.created_at,
                ],
            )
            .await
            .map_err(|e| write_error(e, location))?;
        Ok(())
    }

    async fn load_location(&mut self, id: LocationId) -> StorageResult<Option<Location>> {
        let row = self
            .tx
            .query_opt(SELECT_LOCATION, &[&id])
            .await
            .map_err(db_error)?;
        row.as_ref().map(location_from_row).transpose().map_err(db_error)
    }

    async fn write_location(&mut self, location: &Location) -> StorageResult<()> {
        self.tx
            .execute(
                "UPDATE locations SET name = $2, address = $3, latitude = $4, longitude = $5, \
                 visit_order = $6, arrival_date = $7, departure_date = $8, budget = $9, \
                 notes = $10 WHERE id = $1",
                &[
                    &location.id,
                    &location.name,
                    &location.address,
                    &location.latitude,
                    &location.longitude,
                    &location.visit_order,
                    &location.arrival_date,
                    &location.departure_date,
                    &location.budget,
                    &location.notes,
                ],
            )
            .await
            .map_err(|e| write_error(e, location))?;
        Ok(())
    }

    async fn delete_location(&mut self, plan_id: PlanId, id: LocationId) -> StorageResult<u64> {
        self.tx
            .execute(
                "DELETE FROM locations WHERE id = $1 AND travel_plan_id = $2",
                &[&id, &plan_id],
            )
            .await
            .map_err(db_error)
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        self.tx.commit().await.map_err(db_error)
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        self.tx.rollback().await.map_err(db_error)
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

const SELECT_PLAN: &str = "SELECT id, title, description, start_date, end_date, budget, \
     currency, is_public, version, created_at, updated_at FROM travel_plans WHERE id = $1";

const SELECT_LOCATION: &str = "SELECT id, travel_plan_id, name, address, latitude, longitude, \
     visit_order, arrival_date, departure_date, budget, notes, created_at \
     FROM locations WHERE id = $1";

const SELECT_PLAN_LOCATIONS: &str = "SELECT id, travel_plan_id, name, address, latitude, \
     longitude, visit_order, arrival_date, departure_date, budget, notes, created_at \
     FROM locations WHERE travel_plan_id = $1 ORDER BY visit_order";

fn plan_from_row(row: &Row) -> Result<Plan, tokio_postgres::Error> {
    Ok(Plan {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        budget: row.try_get("budget")?,
        currency: row.try_get("currency")?,
        is_public: row.try_get("is_public")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn location_from_row(row: &Row) -> Result<Location, tokio_postgres::Error> {
    Ok(Location {
        id: row.try_get("id")?,
        travel_plan_id: row.try_get("travel_plan_id")?,
        name: row.try_get("name")?,
        address: row.try_get("address")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        visit_order: row.try_get("visit_order")?,
        arrival_date: row.try_get("arrival_date")?,
        departure_date: row.try_get("departure_date")?,
        budget: row.try_get("budget")?,
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
    })
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

fn db_error(err: tokio_postgres::Error) -> StorageError {
    debug!("Database error: {:?}", err);
    StorageError::infrastructure(format!("database error: {}", err))
}

fn write_error(err: tokio_postgres::Error, location: &Location) -> StorageError {
    if let Some(db) = err.as_db_error() {
        if *db.code() == SqlState::UNIQUE_VIOLATION && db.constraint() == Some(UNIQUE_PLAN_ORDER) {
            return StorageError::OrderConflict {
                plan_id: location.travel_plan_id,
                requested_order: location.visit_order,
            };
        }
    }
    checked_write_error(err)
}

fn checked_write_error(err: tokio_postgres::Error) -> StorageError {
    match err.as_db_error() {
        Some(db) if *db.code() == SqlState::CHECK_VIOLATION => {
            debug!(constraint = ?db.constraint(), "check violation");
            check_violation(db.constraint())
        }
        _ => db_error(err),
    }
}

fn check_violation(constraint: Option<&str>) -> StorageError {
    StorageError::constraint_violation(format!(
        "check constraint {} rejected the write",
        constraint.unwrap_or("(unnamed)")
    ))
}

fn pool_error(shard: ShardKey, err: PoolError) -> StorageError {
    debug!(shard = %shard, "Connection pool error: {:?}", err);
    let reason = match err {
        PoolError::Timeout(_) => "connection pool exhausted".to_string(),
        PoolError::Closed => "connection pool is closed".to_string(),
        other => format!("failed to acquire connection: {}", other),
    };
    StorageError::infrastructure(format!("shard {}: {}", shard, reason))
}

// ============================================================================
// TWO-PHASE COMMIT PARTICIPANTS
// ============================================================================

/// Opens one unpooled connection per shard for the commit coordinator.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

#[async_trait]
impl ParticipantConnector for PgConnector {
    async fn connect(
        &self,
        shard: ShardKey,
        dsn: &ShardDsn,
        statement_timeout: Option<Duration>,
    ) -> StorageResult<Box<dyn Participant>> {
        let (client, connection) = tokio_postgres::connect(dsn.expose(), NoTls)
            .await
            .map_err(|e| {
                StorageError::infrastructure(format!("could not connect to shard {}: {}", shard, e))
            })?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(shard = %shard, error = %e, "participant connection closed with error");
            }
        });

        let participant = PgParticipant {
            shard,
            client,
            driver,
        };
        match participant.begin(statement_timeout).await {
            Ok(()) => Ok(Box::new(participant)),
            Err(err) => {
                Box::new(participant).close().await;
                Err(err)
            }
        }
    }
}

struct PgParticipant {
    shard: ShardKey,
    client: Client,
    driver: JoinHandle<()>,
}

impl PgParticipant {
    async fn begin(&self, statement_timeout: Option<Duration>) -> StorageResult<()> {
        if let Some(timeout) = statement_timeout {
            self.run(&format!("SET statement_timeout = {}", timeout.as_millis()))
                .await?;
        }
        self.run("BEGIN").await
    }

    async fn run(&self, sql: &str) -> StorageResult<()> {
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| StorageError::infrastructure(e.to_string()))
    }
}

#[async_trait]
impl Participant for PgParticipant {
    async fn execute(&mut self, script: &str) -> StorageResult<()> {
        self.run(script).await
    }

    // Global ids are `apply_<hex>_<shard>`, so quoting them inline is safe.
    async fn prepare(&mut self, gid: &str) -> StorageResult<()> {
        self.run(&format!("PREPARE TRANSACTION '{}'", gid)).await
    }

    async fn commit_prepared(&mut self, gid: &str) -> StorageResult<()> {
        self.run(&format!("COMMIT PREPARED '{}'", gid)).await
    }

    async fn rollback_prepared(&mut self, gid: &str) -> StorageResult<()> {
        self.run(&format!("ROLLBACK PREPARED '{}'", gid)).await
    }

    async fn rollback(&mut self) -> StorageResult<()> {
        self.run("ROLLBACK").await
    }

    async fn close(self: Box<Self>) {
        let PgParticipant { shard, client, driver } = *self;
        drop(client);
        driver.abort();
        debug!(shard = %shard, "participant connection closed");
    }
}
