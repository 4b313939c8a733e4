use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use furlo_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use furlo_core::domain::leave::LeaveRequestId;

use super::{AuditEventRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAuditEventRepository {
    pool: DbPool,
}

impl SqlAuditEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn category_str(category: &AuditCategory) -> &'static str {
    match category {
        AuditCategory::Routing => "routing",
        AuditCategory::Lifecycle => "lifecycle",
        AuditCategory::Escalation => "escalation",
        AuditCategory::Persistence => "persistence",
        AuditCategory::System => "system",
    }
}

fn parse_category(value: &str) -> Result<AuditCategory, RepositoryError> {
    match value {
        "routing" => Ok(AuditCategory::Routing),
        "lifecycle" => Ok(AuditCategory::Lifecycle),
        "escalation" => Ok(AuditCategory::Escalation),
        "persistence" => Ok(AuditCategory::Persistence),
        "system" => Ok(AuditCategory::System),
        other => Err(RepositoryError::Decode(format!("unknown audit category `{other}`"))),
    }
}

fn outcome_str(outcome: &AuditOutcome) -> &'static str {
    match outcome {
        AuditOutcome::Success => "success",
        AuditOutcome::Rejected => "rejected",
        AuditOutcome::Failed => "failed",
        AuditOutcome::Flagged => "flagged",
    }
}

fn parse_outcome(value: &str) -> Result<AuditOutcome, RepositoryError> {
    match value {
        "success" => Ok(AuditOutcome::Success),
        "rejected" => Ok(AuditOutcome::Rejected),
        "failed" => Ok(AuditOutcome::Failed),
        "flagged" => Ok(AuditOutcome::Flagged),
        other => Err(RepositoryError::Decode(format!("unknown audit outcome `{other}`"))),
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let event_id: String =
        row.try_get("event_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let request_id: Option<String> =
        row.try_get("request_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let correlation_id: String =
        row.try_get("correlation_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let event_type: String =
        row.try_get("event_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let category: String =
        row.try_get("category").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let actor: String =
        row.try_get("actor").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let outcome: String =
        row.try_get("outcome").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let metadata: String =
        row.try_get("metadata").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let occurred_at: String =
        row.try_get("occurred_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata)
        .map_err(|err| RepositoryError::Decode(format!("bad audit metadata: {err}")))?;
    let occurred_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&occurred_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| RepositoryError::Decode(format!("bad timestamp `{occurred_at}`: {err}")))?;

    Ok(AuditEvent {
        event_id,
        request_id: request_id.map(LeaveRequestId),
        correlation_id,
        event_type,
        category: parse_category(&category)?,
        actor,
        outcome: parse_outcome(&outcome)?,
        metadata,
        occurred_at,
    })
}

#[async_trait]
impl AuditEventRepository for SqlAuditEventRepository {
    async fn record(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        let metadata = serde_json::to_string(&event.metadata)
            .map_err(|err| RepositoryError::Decode(format!("bad audit metadata: {err}")))?;

        sqlx::query(
            "INSERT INTO audit_events (event_id, request_id, correlation_id, event_type,
                                       category, actor, outcome, metadata, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(event.request_id.as_ref().map(|id| id.0.clone()))
        .bind(&event.correlation_id)
        .bind(&event.event_type)
        .bind(category_str(&event.category))
        .bind(&event.actor)
        .bind(outcome_str(&event.outcome))
        .bind(metadata)
        .bind(event.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_request(
        &self,
        request_id: &LeaveRequestId,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT event_id, request_id, correlation_id, event_type, category, actor,
                    outcome, metadata, occurred_at
             FROM audit_events WHERE request_id = ? ORDER BY occurred_at, event_id",
        )
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }
}
