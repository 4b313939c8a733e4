use chrono::Utc;

use crate::commands::CommandResult;
use furlo_core::audit::InMemoryAuditSink;
use furlo_core::config::{AppConfig, LoadOptions};
use furlo_core::domain::leave::LeaveRequestId;
use furlo_core::escalation::{EscalationPolicy, Sweeper};
use furlo_core::org::OrgSnapshot;
use furlo_db::repositories::{
    AuditEventRepository, EmployeeRepository, SqlAuditEventRepository, SqlEmployeeRepository,
    SqlLeaveRequestRepository,
};
use furlo_db::connect;

/// One escalation pass. With `--id` arguments only those requests are
/// considered and the staleness cutoff is skipped.
pub fn run(ids: &[String]) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "sweep",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "sweep",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        let employees = SqlEmployeeRepository::new(pool.clone());
        let requests = SqlLeaveRequestRepository::new(pool.clone());
        let audits = SqlAuditEventRepository::new(pool.clone());

        let snapshot = OrgSnapshot::new(
            employees.list_active().await.map_err(|error| ("org_load", error.to_string(), 5u8))?,
        );

        let sink = InMemoryAuditSink::default();
        let policy = EscalationPolicy { threshold_days: config.escalation.threshold_days };
        let sweeper = Sweeper::new(&requests, &sink, policy);

        let now = Utc::now();
        let report = if ids.is_empty() {
            sweeper.sweep(&snapshot, now).await
        } else {
            let ids: Vec<LeaveRequestId> =
                ids.iter().map(|id| LeaveRequestId(id.clone())).collect();
            sweeper.sweep_ids(&snapshot, &ids, now).await
        }
        .map_err(|error| ("escalation", error.to_string(), 6u8))?;

        // Trail write is best-effort, same as the server path.
        let _ = audits.record_all(&sink.events()).await;

        pool.close().await;
        serde_json::to_string(&report).map_err(|error| ("serialization", error.to_string(), 7u8))
    });

    match result {
        Ok(report_json) => CommandResult::success("sweep", report_json),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("sweep", error_class, message, exit_code)
        }
    }
}
