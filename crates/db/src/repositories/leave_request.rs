use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;

use furlo_core::domain::employee::{EmployeeId, Role};
use furlo_core::domain::leave::{
    Approval, ApprovalState, LeaveRequest, LeaveRequestId, LeaveStatus, StepSource,
};
use furlo_core::errors::ApplicationError;
use furlo_core::escalation::EscalationStore;

use super::{LeaveRequestRepository, RepositoryError};
use crate::DbPool;

pub struct SqlLeaveRequestRepository {
    pool: DbPool,
}

impl SqlLeaveRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_status(value: &str) -> Result<LeaveStatus, RepositoryError> {
    match value {
        "pending" => Ok(LeaveStatus::Pending),
        "in_progress" => Ok(LeaveStatus::InProgress),
        "approved" => Ok(LeaveStatus::Approved),
        "rejected" => Ok(LeaveStatus::Rejected),
        "cancelled" => Ok(LeaveStatus::Cancelled),
        other => Err(RepositoryError::Decode(format!("unknown leave status `{other}`"))),
    }
}

fn parse_approval_state(value: &str) -> Result<ApprovalState, RepositoryError> {
    match value {
        "pending" => Ok(ApprovalState::Pending),
        "approved" => Ok(ApprovalState::Approved),
        "rejected" => Ok(ApprovalState::Rejected),
        other => Err(RepositoryError::Decode(format!("unknown approval state `{other}`"))),
    }
}

fn parse_source(value: &str) -> Result<StepSource, RepositoryError> {
    match value {
        "user_flow" => Ok(StepSource::UserFlow),
        "workflow" => Ok(StepSource::Workflow),
        "fallback" => Ok(StepSource::Fallback),
        other => Err(RepositoryError::Decode(format!("unknown step source `{other}`"))),
    }
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| RepositoryError::Decode(format!("bad timestamp `{value}`: {err}")))
}

fn parse_date(value: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|err| RepositoryError::Decode(format!("bad date `{value}`: {err}")))
}

fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<LeaveRequest, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let requester_id: String =
        row.try_get("requester_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let leave_type: String =
        row.try_get("leave_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let start_date: String =
        row.try_get("start_date").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let end_date: String =
        row.try_get("end_date").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let total_days: i64 =
        row.try_get("total_days").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let current_level: Option<i64> =
        row.try_get("current_level").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let entered_level_at: String =
        row.try_get("entered_level_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let last_escalated_at: Option<String> =
        row.try_get("last_escalated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(LeaveRequest {
        id: LeaveRequestId(id),
        requester_id: EmployeeId(requester_id),
        leave_type,
        start_date: parse_date(&start_date)?,
        end_date: parse_date(&end_date)?,
        total_days: total_days as u32,
        status: parse_status(&status)?,
        current_level: current_level.map(|level| level as u32),
        entered_level_at: parse_datetime(&entered_level_at)?,
        last_escalated_at: last_escalated_at.as_deref().map(parse_datetime).transpose()?,
        created_at: parse_datetime(&created_at)?,
        approvals: Vec::new(),
    })
}

fn row_to_approval(row: &sqlx::sqlite::SqliteRow) -> Result<Approval, RepositoryError> {
    let level: i64 = row.try_get("level").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approver_id: String =
        row.try_get("approver_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approver_role: String =
        row.try_get("approver_role").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let source: String =
        row.try_get("source").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let required: i64 =
        row.try_get("required").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let state: String =
        row.try_get("state").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let decided_at: Option<String> =
        row.try_get("decided_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let comment: Option<String> =
        row.try_get("comment").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let escalated_from: Option<String> =
        row.try_get("escalated_from").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let approver_role: Role = approver_role
        .parse()
        .map_err(|err| RepositoryError::Decode(format!("{err}")))?;

    Ok(Approval {
        level: level as u32,
        approver_id: EmployeeId(approver_id),
        approver_role,
        source: parse_source(&source)?,
        required: required != 0,
        state: parse_approval_state(&state)?,
        decided_at: decided_at.as_deref().map(parse_datetime).transpose()?,
        comment,
        escalated_from: escalated_from.map(EmployeeId),
    })
}

const REQUEST_COLUMNS: &str = "id, requester_id, leave_type, start_date, end_date, total_days, \
                               status, current_level, entered_level_at, last_escalated_at, created_at";

impl SqlLeaveRequestRepository {
    async fn attach_approvals(
        &self,
        mut request: LeaveRequest,
    ) -> Result<LeaveRequest, RepositoryError> {
        let rows = sqlx::query(
            "SELECT level, approver_id, approver_role, source, required, state,
                    decided_at, comment, escalated_from
             FROM approvals WHERE request_id = ? ORDER BY level",
        )
        .bind(&request.id.0)
        .fetch_all(&self.pool)
        .await?;

        request.approvals = rows.iter().map(row_to_approval).collect::<Result<Vec<_>, _>>()?;
        Ok(request)
    }

    async fn write_approvals<'t>(
        tx: &mut sqlx::Transaction<'t, sqlx::Sqlite>,
        request: &LeaveRequest,
    ) -> Result<(), RepositoryError> {
        for approval in &request.approvals {
            sqlx::query(
                "INSERT INTO approvals (request_id, level, approver_id, approver_role, source,
                                        required, state, decided_at, comment, escalated_from)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(request_id, level) DO UPDATE SET
                     approver_id = excluded.approver_id,
                     approver_role = excluded.approver_role,
                     state = excluded.state,
                     decided_at = excluded.decided_at,
                     comment = excluded.comment,
                     escalated_from = excluded.escalated_from",
            )
            .bind(&request.id.0)
            .bind(i64::from(approval.level))
            .bind(&approval.approver_id.0)
            .bind(approval.approver_role.as_str())
            .bind(approval.source.as_str())
            .bind(i64::from(approval.required))
            .bind(approval.state.as_str())
            .bind(approval.decided_at.map(|dt| dt.to_rfc3339()))
            .bind(&approval.comment)
            .bind(approval.escalated_from.as_ref().map(|id| id.0.clone()))
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl LeaveRequestRepository for SqlLeaveRequestRepository {
    async fn find_by_id(
        &self,
        id: &LeaveRequestId,
    ) -> Result<Option<LeaveRequest>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM leave_requests WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(ref r) => Ok(Some(self.attach_approvals(row_to_request(r)?).await?)),
            None => Ok(None),
        }
    }

    async fn list_open(&self) -> Result<Vec<LeaveRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM leave_requests
             WHERE status IN ('pending', 'in_progress') ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut requests = Vec::with_capacity(rows.len());
        for row in &rows {
            requests.push(self.attach_approvals(row_to_request(row)?).await?);
        }
        Ok(requests)
    }

    async fn load_many(
        &self,
        ids: &[LeaveRequestId],
    ) -> Result<Vec<LeaveRequest>, RepositoryError> {
        let mut requests = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(request) = self.find_by_id(id).await? {
                requests.push(request);
            }
        }
        Ok(requests)
    }

    async fn insert(&self, request: &LeaveRequest) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO leave_requests (id, requester_id, leave_type, start_date, end_date,
                                         total_days, status, current_level, entered_level_at,
                                         last_escalated_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.requester_id.0)
        .bind(&request.leave_type)
        .bind(request.start_date.format("%Y-%m-%d").to_string())
        .bind(request.end_date.format("%Y-%m-%d").to_string())
        .bind(i64::from(request.total_days))
        .bind(request.status.as_str())
        .bind(request.current_level.map(i64::from))
        .bind(request.entered_level_at.to_rfc3339())
        .bind(request.last_escalated_at.map(|dt| dt.to_rfc3339()))
        .bind(request.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        Self::write_approvals(&mut tx, request).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn apply_transition(
        &self,
        request: &LeaveRequest,
        expected_level: Option<u32>,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // The guards make the whole transition optimistic: if another
        // decision, cancel, or sweep already moved the row, no rows match
        // and nothing is written. The stored approval must still belong to
        // the approver this writer saw, because an escalation re-points the
        // approver without moving current_level.
        let result = match expected_level {
            Some(level) => {
                let expected_approver = request
                    .approvals
                    .iter()
                    .find(|approval| approval.level == level)
                    .map(|approval| approval.approver_id.0.clone());
                let Some(expected_approver) = expected_approver else {
                    tx.rollback().await?;
                    return Ok(false);
                };
                sqlx::query(
                    "UPDATE leave_requests
                     SET status = ?, current_level = ?, entered_level_at = ?
                     WHERE id = ? AND status IN ('pending', 'in_progress')
                       AND current_level = ?
                       AND EXISTS (
                           SELECT 1 FROM approvals
                           WHERE request_id = leave_requests.id
                             AND level = ?
                             AND approver_id = ?
                             AND state = 'pending'
                       )",
                )
                .bind(request.status.as_str())
                .bind(request.current_level.map(i64::from))
                .bind(request.entered_level_at.to_rfc3339())
                .bind(&request.id.0)
                .bind(i64::from(level))
                .bind(i64::from(level))
                .bind(&expected_approver)
                .execute(&mut *tx)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE leave_requests
                     SET status = ?, current_level = ?, entered_level_at = ?
                     WHERE id = ? AND status IN ('pending', 'in_progress')",
                )
                .bind(request.status.as_str())
                .bind(request.current_level.map(i64::from))
                .bind(request.entered_level_at.to_rfc3339())
                .bind(&request.id.0)
                .execute(&mut *tx)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::write_approvals(&mut tx, request).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn apply_escalation(
        &self,
        request: &LeaveRequest,
        expected_level: u32,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Level and idempotence-marker guards in one statement, so two
        // overlapping sweeps cannot both get through.
        let result = sqlx::query(
            "UPDATE leave_requests
             SET last_escalated_at = ?
             WHERE id = ? AND status IN ('pending', 'in_progress')
               AND current_level = ?
               AND (last_escalated_at IS NULL OR last_escalated_at < entered_level_at)",
        )
        .bind(request.last_escalated_at.map(|dt| dt.to_rfc3339()))
        .bind(&request.id.0)
        .bind(i64::from(expected_level))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        Self::write_approvals(&mut tx, request).await?;
        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl EscalationStore for SqlLeaveRequestRepository {
    async fn list_open_requests(&self) -> Result<Vec<LeaveRequest>, ApplicationError> {
        Ok(self.list_open().await?)
    }

    async fn load_requests(
        &self,
        ids: &[LeaveRequestId],
    ) -> Result<Vec<LeaveRequest>, ApplicationError> {
        Ok(self.load_many(ids).await?)
    }

    async fn persist_escalation(
        &self,
        request: &LeaveRequest,
        expected_level: u32,
    ) -> Result<bool, ApplicationError> {
        Ok(self.apply_escalation(request, expected_level).await?)
    }
}
