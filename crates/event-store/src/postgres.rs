use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::CorrelationId;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    AggregateId, EventEnvelope, EventId, EventStoreError, Result, Version,
    store::{AppendOptions, EventStore, check_batch},
};

const UNIQUE_VERSION: &str = "unique_aggregate_version";

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    aggregate_id: String,
    aggregate_type: String,
    version: i64,
    event_type: String,
    correlation_id: Option<Uuid>,
    recorded_at: DateTime<Utc>,
    payload: serde_json::Value,
}

impl From<EventRow> for EventEnvelope {
    fn from(row: EventRow) -> Self {
        EventEnvelope {
            event_id: EventId::from_uuid(row.id),
            aggregate_id: AggregateId::new(row.aggregate_id),
            aggregate_type: row.aggregate_type,
            version: Version::new(row.version),
            event_type: row.event_type,
            correlation_id: row.correlation_id.map(CorrelationId::from_uuid),
            recorded_at: row.recorded_at,
            payload: row.payload,
        }
    }
}

/// PostgreSQL event store.
///
/// Each append writes the `events` rows and their `outbox` rows in one
/// transaction. The `(aggregate_id, version)` unique constraint is the final
/// guard against concurrent writers to the same log.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        Ok(Self::new(PgPool::connect(url).await?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the `events` and `outbox` tables if they do not exist.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn current_version(
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: &AggregateId,
    ) -> Result<Version> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_str())
                .fetch_one(&mut **tx)
                .await?;
        Ok(version.map(Version::new).unwrap_or_default())
    }

    async fn insert(tx: &mut Transaction<'_, Postgres>, event: &EventEnvelope) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO events \
             (id, aggregate_id, aggregate_type, version, event_type, correlation_id, recorded_at, payload) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(event.event_id.as_uuid())
        .bind(event.aggregate_id.as_str())
        .bind(&event.aggregate_type)
        .bind(event.version.as_i64())
        .bind(&event.event_type)
        .bind(event.correlation_id.map(|id| id.as_uuid()))
        .bind(event.recorded_at)
        .bind(&event.payload)
        .execute(&mut **tx)
        .await?;

        sqlx::query("INSERT INTO outbox (event_id, aggregate_id) VALUES ($1, $2)")
            .bind(event.event_id.as_uuid())
            .bind(event.aggregate_id.as_str())
            .execute(&mut **tx)
            .await?;

        Ok(())
    }
}

fn is_version_clash(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.constraint() == Some(UNIQUE_VERSION))
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        check_batch(&events)?;
        let aggregate_id = events[0].aggregate_id.clone();

        let mut tx = self.pool.begin().await?;
        let current = Self::current_version(&mut tx, &aggregate_id).await?;

        let expected = options.expected_version.unwrap_or(current);
        if current != expected || events[0].version != current.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current,
            });
        }

        for event in &events {
            if let Err(error) = Self::insert(&mut tx, event).await {
                if is_version_clash(&error) {
                    // Another writer committed this position first
                    return Err(EventStoreError::ConcurrencyConflict {
                        aggregate_id,
                        expected,
                        actual: event.version,
                    });
                }
                return Err(error.into());
            }
        }

        tx.commit().await?;
        Ok(Version::new(current.as_i64() + events.len() as i64))
    }

    async fn load(&self, aggregate_id: &AggregateId) -> Result<Vec<EventEnvelope>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT * FROM events WHERE aggregate_id = $1 ORDER BY version",
        )
        .bind(aggregate_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EventEnvelope::from).collect())
    }

    async fn aggregate_version(&self, aggregate_id: &AggregateId) -> Result<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(version.map(Version::new))
    }

    async fn pending_outbox(&self, aggregate_id: &AggregateId) -> Result<Vec<EventEnvelope>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT e.* FROM outbox o \
             JOIN events e ON e.id = o.event_id \
             WHERE o.aggregate_id = $1 \
             ORDER BY e.version",
        )
        .bind(aggregate_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EventEnvelope::from).collect())
    }

    async fn acknowledge(&self, event_ids: &[EventId]) -> Result<()> {
        if event_ids.is_empty() {
            return Ok(());
        }

        let ids: Vec<Uuid> = event_ids.iter().map(EventId::as_uuid).collect();
        sqlx::query("DELETE FROM outbox WHERE event_id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
