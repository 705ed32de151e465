//! PostgreSQL implementation of [`WebhookStore`].
//!
//! Multi-row mutations run in a transaction that locks the affected rows
//! with `SELECT ... FOR UPDATE`, then reuse the model's own transition logic
//! before writing back. The claim scan uses `FOR UPDATE SKIP LOCKED` so
//! several engine processes can share one database without coordination.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, types::Json, PgPool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::{lease_expiry, ClaimToken, ClaimedDelivery, WebhookStore};
use crate::{
    error::{CoreError, Result},
    models::{
        AttemptApplied, AttemptRecord, AttemptTransition, DeliveryId, DeliveryStatus, EndpointId,
        EndpointStatus, EventType, Pagination, TenantId, WebhookDelivery, WebhookEndpoint,
    },
    validation::EndpointChanges,
};

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS webhook_endpoints (
        id UUID PRIMARY KEY,
        tenant_id UUID NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        url TEXT NOT NULL,
        event_types TEXT[] NOT NULL CHECK (cardinality(event_types) > 0),
        status TEXT NOT NULL,
        timeout_seconds INTEGER NOT NULL CHECK (timeout_seconds BETWEEN 5 AND 120),
        retry_count INTEGER NOT NULL CHECK (retry_count BETWEEN 0 AND 5),
        failure_count INTEGER NOT NULL DEFAULT 0,
        secret TEXT NOT NULL,
        last_delivery_at TIMESTAMPTZ,
        last_delivery_status TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_webhook_endpoints_tenant
        ON webhook_endpoints (tenant_id, created_at DESC)
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_webhook_endpoints_event_types
        ON webhook_endpoints USING GIN (event_types)
    ",
    r"
    CREATE TABLE IF NOT EXISTS webhook_deliveries (
        id UUID PRIMARY KEY,
        tenant_id UUID NOT NULL,
        event_id UUID NOT NULL,
        endpoint_id UUID NOT NULL,
        event_type TEXT NOT NULL,
        status TEXT NOT NULL,
        attempt INTEGER NOT NULL CHECK (attempt >= 1),
        http_status INTEGER,
        duration_ms BIGINT,
        response_body TEXT,
        response_headers JSONB,
        error_message TEXT,
        payload TEXT NOT NULL,
        next_retry_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        delivered_at TIMESTAMPTZ,
        claim_token UUID,
        claimed_until TIMESTAMPTZ
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_endpoint
        ON webhook_deliveries (endpoint_id, created_at DESC)
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_due
        ON webhook_deliveries (COALESCE(next_retry_at, created_at))
        WHERE status IN ('pending', 'retrying')
    ",
];

/// [`WebhookStore`] backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wraps an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates tables and indexes if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Storage` if any DDL statement fails.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("webhook schema ready");
        Ok(())
    }

    async fn lock_endpoint(
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantId,
        id: EndpointId,
    ) -> Result<Option<WebhookEndpoint>> {
        sqlx::query("SELECT * FROM webhook_endpoints WHERE tenant_id = $1 AND id = $2 FOR UPDATE")
            .bind(tenant)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .as_ref()
            .map(endpoint_from_row)
            .transpose()
    }

    async fn write_endpoint(
        tx: &mut Transaction<'_, Postgres>,
        endpoint: &WebhookEndpoint,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE webhook_endpoints SET
                name = $2, description = $3, url = $4, event_types = $5, status = $6,
                timeout_seconds = $7, retry_count = $8, failure_count = $9,
                last_delivery_at = $10, last_delivery_status = $11, updated_at = $12
            WHERE id = $1
            ",
        )
        .bind(endpoint.id)
        .bind(&endpoint.name)
        .bind(&endpoint.description)
        .bind(&endpoint.url)
        .bind(event_type_names(&endpoint.event_types))
        .bind(endpoint.status.as_str())
        .bind(to_i32(endpoint.timeout_seconds))
        .bind(to_i32(endpoint.retry_count))
        .bind(to_i32(endpoint.failure_count))
        .bind(endpoint.last_delivery_at)
        .bind(endpoint.last_delivery_status.map(DeliveryStatus::as_str))
        .bind(endpoint.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl WebhookStore for PgStore {
    async fn insert_endpoint(&self, endpoint: WebhookEndpoint) -> Result<WebhookEndpoint> {
        sqlx::query(
            r"
            INSERT INTO webhook_endpoints (
                id, tenant_id, name, description, url, event_types, status,
                timeout_seconds, retry_count, failure_count, secret,
                last_delivery_at, last_delivery_status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ",
        )
        .bind(endpoint.id)
        .bind(endpoint.tenant_id)
        .bind(&endpoint.name)
        .bind(&endpoint.description)
        .bind(&endpoint.url)
        .bind(event_type_names(&endpoint.event_types))
        .bind(endpoint.status.as_str())
        .bind(to_i32(endpoint.timeout_seconds))
        .bind(to_i32(endpoint.retry_count))
        .bind(to_i32(endpoint.failure_count))
        .bind(&endpoint.secret)
        .bind(endpoint.last_delivery_at)
        .bind(endpoint.last_delivery_status.map(DeliveryStatus::as_str))
        .bind(endpoint.created_at)
        .bind(endpoint.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(endpoint)
    }

    async fn find_endpoint(
        &self,
        tenant: TenantId,
        id: EndpointId,
    ) -> Result<Option<WebhookEndpoint>> {
        sqlx::query("SELECT * FROM webhook_endpoints WHERE tenant_id = $1 AND id = $2")
            .bind(tenant)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(endpoint_from_row)
            .transpose()
    }

    async fn list_endpoints(&self, tenant: TenantId) -> Result<Vec<WebhookEndpoint>> {
        sqlx::query(
            r"
            SELECT * FROM webhook_endpoints WHERE tenant_id = $1
            ORDER BY created_at DESC, id DESC
            ",
        )
        .bind(tenant)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(endpoint_from_row)
        .collect()
    }

    async fn update_endpoint(
        &self,
        tenant: TenantId,
        id: EndpointId,
        changes: EndpointChanges,
        now: DateTime<Utc>,
    ) -> Result<WebhookEndpoint> {
        let mut tx = self.pool.begin().await?;
        let mut endpoint = Self::lock_endpoint(&mut tx, tenant, id)
            .await?
            .ok_or_else(|| CoreError::not_found("endpoint", id))?;
        endpoint.apply_changes(changes, now);
        Self::write_endpoint(&mut tx, &endpoint).await?;
        tx.commit().await?;
        Ok(endpoint)
    }

    async fn delete_endpoint(&self, tenant: TenantId, id: EndpointId) -> Result<()> {
        let result = sqlx::query("DELETE FROM webhook_endpoints WHERE tenant_id = $1 AND id = $2")
            .bind(tenant)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("endpoint", id));
        }
        Ok(())
    }

    async fn set_endpoint_status(
        &self,
        tenant: TenantId,
        id: EndpointId,
        status: EndpointStatus,
        now: DateTime<Utc>,
    ) -> Result<WebhookEndpoint> {
        let mut tx = self.pool.begin().await?;
        let mut endpoint = Self::lock_endpoint(&mut tx, tenant, id)
            .await?
            .ok_or_else(|| CoreError::not_found("endpoint", id))?;
        endpoint.apply_manual_status(status, now)?;
        Self::write_endpoint(&mut tx, &endpoint).await?;
        tx.commit().await?;
        Ok(endpoint)
    }

    async fn list_active_for(
        &self,
        tenant: TenantId,
        event_type: &EventType,
    ) -> Result<Vec<WebhookEndpoint>> {
        sqlx::query(
            r"
            SELECT * FROM webhook_endpoints
            WHERE tenant_id = $1 AND status = 'active' AND event_types @> ARRAY[$2]::TEXT[]
            ORDER BY created_at
            ",
        )
        .bind(tenant)
        .bind(event_type.as_str())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(endpoint_from_row)
        .collect()
    }

    async fn insert_deliveries(&self, deliveries: Vec<WebhookDelivery>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for delivery in &deliveries {
            sqlx::query(
                r"
                INSERT INTO webhook_deliveries (
                    id, tenant_id, event_id, endpoint_id, event_type, status, attempt,
                    payload, next_retry_at, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ",
            )
            .bind(delivery.id)
            .bind(delivery.tenant_id)
            .bind(delivery.event_id)
            .bind(delivery.endpoint_id)
            .bind(delivery.event_type.as_str())
            .bind(delivery.status.as_str())
            .bind(to_i32(delivery.attempt))
            .bind(&delivery.payload)
            .bind(delivery.next_retry_at)
            .bind(delivery.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_delivery(
        &self,
        tenant: TenantId,
        id: DeliveryId,
    ) -> Result<Option<WebhookDelivery>> {
        sqlx::query("SELECT * FROM webhook_deliveries WHERE tenant_id = $1 AND id = $2")
            .bind(tenant)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(delivery_from_row)
            .transpose()
    }

    async fn list_deliveries(
        &self,
        tenant: TenantId,
        endpoint: EndpointId,
        page: Pagination,
    ) -> Result<Vec<WebhookDelivery>> {
        sqlx::query(
            r"
            SELECT * FROM webhook_deliveries
            WHERE tenant_id = $1 AND endpoint_id = $2
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            ",
        )
        .bind(tenant)
        .bind(endpoint)
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(delivery_from_row)
        .collect()
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<ClaimedDelivery>> {
        let token = ClaimToken::new();
        let lease_until = lease_expiry(now, lease);

        let rows = sqlx::query(
            r"
            WITH due AS (
                SELECT id FROM webhook_deliveries
                WHERE (status = 'pending' OR (status = 'retrying' AND next_retry_at <= $1))
                  AND (claimed_until IS NULL OR claimed_until <= $1)
                ORDER BY COALESCE(next_retry_at, created_at)
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE webhook_deliveries d
            SET claim_token = $3, claimed_until = $4
            FROM due
            WHERE d.id = due.id
            RETURNING d.*
            ",
        )
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(token.0)
        .bind(lease_until)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ClaimedDelivery { delivery: delivery_from_row(row)?, token, lease_until })
            })
            .collect()
    }

    async fn claim_delivery(
        &self,
        tenant: TenantId,
        id: DeliveryId,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<ClaimedDelivery> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT * FROM webhook_deliveries WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(tenant)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| CoreError::not_found("delivery", id))?;

        let delivery = delivery_from_row(&row)?;
        if delivery.status.is_terminal() {
            return Err(CoreError::DeliveryFinalized { id, status: delivery.status });
        }
        let claimed_until: Option<DateTime<Utc>> = row.try_get("claimed_until")?;
        if claimed_until.is_some_and(|until| until > now) {
            return Err(CoreError::ClaimConflict { id });
        }

        let token = ClaimToken::new();
        let lease_until = lease_expiry(now, lease);
        sqlx::query(
            "UPDATE webhook_deliveries SET claim_token = $2, claimed_until = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(token.0)
        .bind(lease_until)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(ClaimedDelivery { delivery, token, lease_until })
    }

    async fn release_claim(&self, claim: &ClaimedDelivery) -> Result<()> {
        sqlx::query(
            r"
            UPDATE webhook_deliveries SET claim_token = NULL, claimed_until = NULL
            WHERE id = $1 AND claim_token = $2
            ",
        )
        .bind(claim.delivery.id)
        .bind(claim.token.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_attempt(
        &self,
        claim: &ClaimedDelivery,
        record: AttemptRecord,
        failure_threshold: u32,
    ) -> Result<AttemptApplied> {
        let id = claim.delivery.id;
        let tenant = claim.delivery.tenant_id;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT * FROM webhook_deliveries WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(tenant)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| CoreError::not_found("delivery", id))?;

        let mut delivery = delivery_from_row(&row)?;
        if delivery.status.is_terminal() {
            return Err(CoreError::DeliveryFinalized { id, status: delivery.status });
        }
        let holder: Option<Uuid> = row.try_get("claim_token")?;
        if holder != Some(claim.token.0) {
            return Err(CoreError::ClaimConflict { id });
        }

        delivery.apply_attempt(&record);
        sqlx::query(
            r"
            UPDATE webhook_deliveries SET
                status = $2, attempt = $3, http_status = $4, duration_ms = $5,
                response_body = $6, response_headers = $7, error_message = $8,
                next_retry_at = $9, delivered_at = $10,
                claim_token = NULL, claimed_until = NULL
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(delivery.status.as_str())
        .bind(to_i32(delivery.attempt))
        .bind(delivery.http_status.map(i32::from))
        .bind(delivery.duration_ms.map(|ms| i64::try_from(ms).unwrap_or(i64::MAX)))
        .bind(&delivery.response_body)
        .bind(delivery.response_headers.as_ref().map(Json))
        .bind(&delivery.error_message)
        .bind(delivery.next_retry_at)
        .bind(delivery.delivered_at)
        .execute(&mut *tx)
        .await?;

        let at = record.capture.attempted_at;
        let mut endpoint_tripped = false;
        let mut endpoint = Self::lock_endpoint(&mut tx, tenant, delivery.endpoint_id).await?;
        if let Some(endpoint) = endpoint.as_mut() {
            let touched = match record.transition {
                AttemptTransition::Succeeded => {
                    endpoint.record_success(at);
                    true
                },
                AttemptTransition::Retrying { .. } => {
                    endpoint.record_retry(at);
                    true
                },
                AttemptTransition::Failed | AttemptTransition::Exhausted => {
                    endpoint_tripped = endpoint.record_terminal_failure(failure_threshold, at);
                    true
                },
                AttemptTransition::Suspended => false,
            };
            if touched {
                Self::write_endpoint(&mut tx, endpoint).await?;
            }
        }

        tx.commit().await?;
        Ok(AttemptApplied { delivery, endpoint, endpoint_tripped })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn endpoint_from_row(row: &PgRow) -> Result<WebhookEndpoint> {
    let event_types: Vec<String> = row.try_get("event_types")?;
    let status: String = row.try_get("status")?;
    let last_delivery_status: Option<String> = row.try_get("last_delivery_status")?;

    Ok(WebhookEndpoint {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        url: row.try_get("url")?,
        event_types: event_types.into_iter().map(EventType::from_stored).collect(),
        status: status.parse()?,
        timeout_seconds: to_u32(row.try_get("timeout_seconds")?, "timeout_seconds")?,
        retry_count: to_u32(row.try_get("retry_count")?, "retry_count")?,
        failure_count: to_u32(row.try_get("failure_count")?, "failure_count")?,
        secret: row.try_get("secret")?,
        last_delivery_at: row.try_get("last_delivery_at")?,
        last_delivery_status: last_delivery_status.as_deref().map(str::parse).transpose()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn delivery_from_row(row: &PgRow) -> Result<WebhookDelivery> {
    let status: String = row.try_get("status")?;
    let http_status: Option<i32> = row.try_get("http_status")?;
    let duration_ms: Option<i64> = row.try_get("duration_ms")?;
    let response_headers: Option<Json<BTreeMap<String, String>>> =
        row.try_get("response_headers")?;

    Ok(WebhookDelivery {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        event_id: row.try_get("event_id")?,
        endpoint_id: row.try_get("endpoint_id")?,
        event_type: EventType::from_stored(row.try_get("event_type")?),
        status: status.parse()?,
        attempt: to_u32(row.try_get("attempt")?, "attempt")?,
        http_status: http_status.and_then(|code| u16::try_from(code).ok()),
        duration_ms: duration_ms.and_then(|ms| u64::try_from(ms).ok()),
        response_body: row.try_get("response_body")?,
        response_headers: response_headers.map(|Json(headers)| headers),
        error_message: row.try_get("error_message")?,
        payload: row.try_get("payload")?,
        next_retry_at: row.try_get("next_retry_at")?,
        created_at: row.try_get("created_at")?,
        delivered_at: row.try_get("delivered_at")?,
    })
}

fn event_type_names(types: &[EventType]) -> Vec<String> {
    types.iter().map(|t| t.as_str().to_string()).collect()
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_u32(value: i32, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| CoreError::Storage(format!("negative value in {column}")))
}
