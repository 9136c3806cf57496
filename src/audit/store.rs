//! Postgres-backed append-only store for audit records.
//! Grounded in the teacher's `sqlx`/Postgres persistence idiom.

use std::collections::HashMap;

use serde::Serialize;
use sqlx::PgPool;

use crate::errors::AppError;

use super::{Action, AuditRecord};

#[derive(Debug, Clone, Serialize)]
pub struct AuditStats {
    pub total: i64,
    pub by_action: HashMap<String, i64>,
    pub by_provider: HashMap<String, i64>,
}

pub struct AuditStore {
    pool: PgPool,
}

impl AuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, record: &AuditRecord) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO audit_log \
             (id, timestamp, provider, anonymized_payload, action, endpoint, response_time_ms, error_message) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(record.id)
        .bind(record.timestamp)
        .bind(&record.provider)
        .bind(&record.anonymized_payload)
        .bind(record.action.as_str())
        .bind(&record.endpoint_path)
        .bind(record.response_time_ms)
        .bind(&record.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<AuditRow>, AppError> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT id, timestamp, provider, anonymized_payload, action, endpoint, response_time_ms, error_message \
             FROM audit_log ORDER BY timestamp DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn by_action(&self, action: Action, limit: i64) -> Result<Vec<AuditRow>, AppError> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT id, timestamp, provider, anonymized_payload, action, endpoint, response_time_ms, error_message \
             FROM audit_log WHERE action = $1 ORDER BY timestamp DESC LIMIT $2",
        )
        .bind(action.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn stats(&self) -> Result<AuditStats, AppError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log")
            .fetch_one(&self.pool)
            .await?;

        let action_rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT action, COUNT(*) FROM audit_log GROUP BY action")
                .fetch_all(&self.pool)
                .await?;

        let provider_rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT provider, COUNT(*) FROM audit_log GROUP BY provider")
                .fetch_all(&self.pool)
                .await?;

        Ok(AuditStats {
            total,
            by_action: action_rows.into_iter().collect(),
            by_provider: provider_rows.into_iter().collect(),
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AuditRow {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub provider: String,
    pub anonymized_payload: String,
    pub action: String,
    pub endpoint: String,
    pub response_time_ms: Option<i32>,
    pub error_message: Option<String>,
}
