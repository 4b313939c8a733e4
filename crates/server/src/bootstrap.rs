use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use furlo_core::chain::ChainPolicy;
use furlo_core::config::{AppConfig, ConfigError, LoadOptions};
use furlo_core::escalation::EscalationPolicy;
use furlo_core::lifecycle::{NotificationEvent, NotificationSink};
use furlo_db::repositories::{
    SqlAuditEventRepository, SqlEmployeeRepository, SqlLeaveRequestRepository,
    SqlWorkflowRepository,
};
use furlo_db::{connect, migrations, DbPool};

use crate::api::AppService;
use crate::service::ApprovalService;

/// Delivery adapter until a real channel (mail, chat) is wired in: each
/// hand-off lands in the log stream where operators already look.
pub struct LoggingNotificationSink;

impl NotificationSink for LoggingNotificationSink {
    fn notify(&self, event: NotificationEvent) {
        info!(
            event_name = "notification.dispatched",
            request_id = %event.request_id.0,
            recipient = %event.recipient.0,
            kind = ?event.kind,
            "notification handed off"
        );
    }
}

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<AppService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    let report = migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        schema_version = report.schema_version,
        migrations = report.migration_count,
        "database migrations applied"
    );

    let service = Arc::new(ApprovalService::new(
        Arc::new(SqlEmployeeRepository::new(db_pool.clone())),
        Arc::new(SqlWorkflowRepository::new(db_pool.clone())),
        Arc::new(SqlLeaveRequestRepository::new(db_pool.clone())),
        Arc::new(SqlAuditEventRepository::new(db_pool.clone())),
        Arc::new(LoggingNotificationSink),
        ChainPolicy { hr_self_approval: config.escalation.hr_self_approval },
        EscalationPolicy { threshold_days: config.escalation.threshold_days },
    ));

    Ok(Application { config, db_pool, service })
}

#[cfg(test)]
mod tests {
    use furlo_core::config::{ConfigOverrides, LoadOptions};
    use furlo_core::domain::employee::EmployeeId;
    use furlo_core::errors::ApplicationError;

    use crate::bootstrap::bootstrap;

    fn memory_options() -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_the_service() {
        let app = bootstrap(memory_options()).await.expect("bootstrap");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('employees', 'leave_requests', 'approvals', 'audit_events')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("baseline tables present");
        assert_eq!(table_count, 4);

        // Empty org: routing fails loudly, proving the service is wired to
        // the live store.
        let err = app
            .service
            .simulate_chain(&EmployeeId("nobody".to_string()))
            .await
            .expect_err("no employees yet");
        assert!(matches!(err, ApplicationError::Domain(_)));

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_rejects_a_broken_database_url() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite:///nonexistent-dir/furlo.db".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;
        assert!(result.is_err());
    }
}
