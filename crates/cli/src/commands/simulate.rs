use crate::commands::CommandResult;
use furlo_core::audit::NoopAuditSink;
use furlo_core::chain::{ChainBuilder, ChainPolicy, ChainSources};
use furlo_core::config::{AppConfig, LoadOptions};
use furlo_core::domain::employee::EmployeeId;
use furlo_core::org::OrgSnapshot;
use furlo_db::repositories::{
    EmployeeRepository, SqlEmployeeRepository, SqlWorkflowRepository, WorkflowRepository,
};
use furlo_db::connect;

/// Dry-run the chain the engine would freeze for `user` today. Reads the
/// live org and workflow configuration, writes nothing.
pub fn run(user: &str) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "simulate",
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
                "simulate",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let requester_id = EmployeeId(user.to_string());
    let result = runtime.block_on(async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        let employees = SqlEmployeeRepository::new(pool.clone());
        let workflows = SqlWorkflowRepository::new(pool.clone());

        let sources = ChainSources {
            snapshot: OrgSnapshot::new(
                employees
                    .list_active()
                    .await
                    .map_err(|error| ("org_load", error.to_string(), 5u8))?,
            ),
            templates: workflows
                .list_templates()
                .await
                .map_err(|error| ("workflow_load", error.to_string(), 5u8))?,
            user_flow: workflows
                .find_user_flow(&requester_id)
                .await
                .map_err(|error| ("workflow_load", error.to_string(), 5u8))?,
        };

        let chain = ChainBuilder::new(ChainPolicy {
            hr_self_approval: config.escalation.hr_self_approval,
        })
        .build(&sources, &requester_id, &NoopAuditSink, "simulate")
        .map_err(|error| ("chain_assembly", error.to_string(), 6u8))?;

        pool.close().await;
        serde_json::to_string(&chain).map_err(|error| ("serialization", error.to_string(), 7u8))
    });

    match result {
        Ok(chain_json) => CommandResult::success("simulate", chain_json),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("simulate", error_class, message, exit_code)
        }
    }
}
