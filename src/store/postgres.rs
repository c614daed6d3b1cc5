//! PostgreSQL durable store via `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use super::DurableStore;
use crate::key::ContentKey;
use crate::types::{AccessHistoryEntry, Category, RequesterId, ResolvedPayload};
use crate::{MimirError, Result};

const BOOTSTRAP_SQL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS resolved_payloads (
        id          BIGSERIAL PRIMARY KEY,
        content_key TEXT NOT NULL UNIQUE,
        category    TEXT NOT NULL,
        body        TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        visit_count BIGINT NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS access_history (
        id           BIGSERIAL PRIMARY KEY,
        requester_id BIGINT NOT NULL,
        payload_id   BIGINT NOT NULL REFERENCES resolved_payloads (id),
        created_at   TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS access_history_requester_idx \
     ON access_history (requester_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS resolved_payloads_hot_idx \
     ON resolved_payloads (category, visit_count DESC)",
];

#[derive(sqlx::FromRow)]
struct PayloadRow {
    id: i64,
    content_key: String,
    category: String,
    body: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<PayloadRow> for ResolvedPayload {
    type Error = MimirError;

    fn try_from(row: PayloadRow) -> Result<Self> {
        Ok(Self {
            key: ContentKey::parse(&row.content_key)
                .map_err(|e| MimirError::Store(format!("corrupt row {}: {e}", row.id)))?,
            category: row
                .category
                .parse::<Category>()
                .map_err(|e| MimirError::Store(format!("corrupt row {}: {e}", row.id)))?,
            text: row.body,
            created_at: row.created_at,
            owner_record_id: Some(row.id),
        })
    }
}

/// `LIMIT` argument; limits past `i64::MAX` mean "all rows".
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn collect(rows: Vec<PayloadRow>) -> Result<Vec<ResolvedPayload>> {
    rows.into_iter().map(ResolvedPayload::try_from).collect()
}

/// Durable store backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Create the tables if they do not exist. Idempotent.
    pub async fn bootstrap(&self) -> Result<()> {
        for statement in BOOTSTRAP_SQL {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("durable schema bootstrapped");
        Ok(())
    }
}

#[async_trait]
impl DurableStore for PgStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn find(&self, key: &ContentKey) -> Result<Option<ResolvedPayload>> {
        let row = sqlx::query_as::<_, PayloadRow>(
            r#"
            SELECT id, content_key, category, body, created_at
            FROM resolved_payloads
            WHERE content_key = $1
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(ResolvedPayload::try_from).transpose()
    }

    async fn insert(&self, payload: &ResolvedPayload) -> Result<ResolvedPayload> {
        // DO UPDATE with a no-op assignment so RETURNING yields the existing row on conflict
        let row = sqlx::query_as::<_, PayloadRow>(
            r#"
            INSERT INTO resolved_payloads (content_key, category, body, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (content_key) DO UPDATE SET content_key = EXCLUDED.content_key
            RETURNING id, content_key, category, body, created_at
            "#,
        )
        .bind(payload.key.as_str())
        .bind(payload.category.as_str())
        .bind(&payload.text)
        .bind(payload.created_at)
        .fetch_one(&self.pool)
        .await?;
        debug!(key = %payload.key, id = row.id, "payload persisted");
        ResolvedPayload::try_from(row)
    }

    async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM resolved_payloads")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn keys(&self) -> Result<Vec<ContentKey>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT content_key FROM resolved_payloads")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|(key,)| ContentKey::parse(&key))
            .collect()
    }

    async fn record_access(&self, entry: &AccessHistoryEntry) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO access_history (requester_id, payload_id, created_at) VALUES ($1, $2, $3)",
        )
        .bind(entry.requester_id)
        .bind(entry.payload_owner_id)
        .bind(entry.timestamp)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE resolved_payloads SET visit_count = visit_count + 1 WHERE id = $1")
            .bind(entry.payload_owner_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn recent_history(
        &self,
        requester: RequesterId,
        limit: usize,
    ) -> Result<Vec<ResolvedPayload>> {
        let rows = sqlx::query_as::<_, PayloadRow>(
            r#"
            SELECT p.id, p.content_key, p.category, p.body, p.created_at
            FROM access_history h
            JOIN resolved_payloads p ON p.id = h.payload_id
            WHERE h.requester_id = $1
            ORDER BY h.created_at DESC, h.id DESC
            LIMIT $2
            "#,
        )
        .bind(requester)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn hottest(&self, category: Category, limit: usize) -> Result<Vec<ResolvedPayload>> {
        let rows = sqlx::query_as::<_, PayloadRow>(
            r#"
            SELECT id, content_key, category, body, created_at
            FROM resolved_payloads
            WHERE category = $1
            ORDER BY visit_count DESC
            LIMIT $2
            "#,
        )
        .bind(category.as_str())
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }
}
