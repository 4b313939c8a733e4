use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

const SEED_EMPLOYEE_IDS: &[&str] = &["e1", "e2", "e3", "s1", "m1", "hr1"];
const SEED_TEMPLATE_IDS: &[&str] = &["wf-assembly"];
const SEED_REQUEST_IDS: &[&str] = &["lr-stale-001"];
const SEED_AUDIT_EVENT_IDS: &[&str] = &["ae-seed-001"];

/// Deterministic seed dataset: one plant org, a department workflow
/// template, a pinned per-user flow, and a stale open request the sweeper
/// will pick up.
pub struct SeedDataset;

impl SeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/seed_org.sql");

    /// Load the seed dataset. Safe to run twice; every statement replaces
    /// what it seeded before.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            employees: SEED_EMPLOYEE_IDS.len(),
            templates: SEED_TEMPLATE_IDS.len(),
            requests: SEED_REQUEST_IDS.len(),
        })
    }

    /// Verify the seeded rows exist and still match the contract.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let active_employees: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM employees WHERE is_active = 1 AND id IN {}",
            sql_array_from_ids(SEED_EMPLOYEE_IDS)
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("active-employees", active_employees == (SEED_EMPLOYEE_IDS.len() - 1) as i64));

        let hr_present: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM employees WHERE role = 'hr_manager' AND is_active = 1)",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("hr-manager", hr_present == 1));

        let template_steps: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM workflow_template_steps WHERE template_id = 'wf-assembly'",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("template-steps", template_steps == 2));

        let stale_request: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM leave_requests
             WHERE id = 'lr-stale-001' AND status = 'pending' AND current_level = 1)",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("stale-request", stale_request == 1));

        let approval_rows: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM approvals WHERE request_id = 'lr-stale-001'")
                .fetch_one(pool)
                .await?;
        checks.push(("approval-rows", approval_rows == 3));

        let audit_rows: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM audit_events WHERE event_id IN {}",
            sql_array_from_ids(SEED_AUDIT_EVENT_IDS)
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("audit-events", audit_rows == SEED_AUDIT_EVENT_IDS.len() as i64));

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }

    /// Remove the seeded rows from a test database.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let requests = sql_array_from_ids(SEED_REQUEST_IDS);
        let templates = sql_array_from_ids(SEED_TEMPLATE_IDS);
        let employees = sql_array_from_ids(SEED_EMPLOYEE_IDS);
        let audits = sql_array_from_ids(SEED_AUDIT_EVENT_IDS);

        sqlx::query(&format!("DELETE FROM audit_events WHERE event_id IN {audits}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM approvals WHERE request_id IN {requests}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM leave_requests WHERE id IN {requests}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM user_flow_steps WHERE requester_id IN {employees}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "DELETE FROM workflow_template_steps WHERE template_id IN {templates}"
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!("DELETE FROM workflow_templates WHERE id IN {templates}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM employees WHERE id IN {employees}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{id}'")).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub employees: usize,
    pub templates: usize,
    pub requests: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
