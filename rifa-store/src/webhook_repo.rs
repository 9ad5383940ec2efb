use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use rifa_core::repository::WebhookLogRepository;
use rifa_core::{StoreResult, WebhookPage, WebhookQuery, WebhookRecord};

use crate::database::backend;

pub struct PostgresWebhookLogRepository {
    pool: PgPool,
}

impl PostgresWebhookLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct WebhookRow {
    id: Uuid,
    kind: String,
    resource_id: Option<String>,
    raw_body: serde_json::Value,
    received_at: DateTime<Utc>,
}

impl From<WebhookRow> for WebhookRecord {
    fn from(row: WebhookRow) -> Self {
        WebhookRecord {
            id: row.id,
            kind: row.kind,
            resource_id: row.resource_id,
            raw_body: row.raw_body,
            received_at: row.received_at,
        }
    }
}

/// `%term%` for ILIKE, with the pattern metacharacters escaped.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

const FILTER: &str = "($1::text IS NULL OR kind ILIKE $1 OR resource_id ILIKE $1 OR raw_body::text ILIKE $1)";

#[async_trait]
impl WebhookLogRepository for PostgresWebhookLogRepository {
    async fn record(&self, entry: &WebhookRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO webhook_logs (id, kind, resource_id, raw_body, received_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(entry.id)
        .bind(&entry.kind)
        .bind(entry.resource_id.as_deref())
        .bind(&entry.raw_body)
        .bind(entry.received_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn list(&self, query: &WebhookQuery) -> StoreResult<WebhookPage> {
        let pattern = query.search_term().map(like_pattern);
        let limit = query.effective_limit();

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM webhook_logs WHERE {}", FILTER))
            .bind(pattern.as_deref())
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;

        let rows: Vec<WebhookRow> = sqlx::query_as(&format!(
            "SELECT id, kind, resource_id, raw_body, received_at FROM webhook_logs WHERE {} ORDER BY received_at DESC LIMIT $2 OFFSET $3",
            FILTER
        ))
        .bind(pattern.as_deref())
        .bind(i64::from(limit))
        .bind(i64::try_from(query.offset()).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(WebhookPage {
            total: u64::try_from(total).unwrap_or_default(),
            page: query.page.max(1),
            limit,
            records: rows.into_iter().map(WebhookRecord::from).collect(),
        })
    }
}
