use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Where the schema stands after a migration pass; what `furlo-cli migrate`
/// prints and bootstrap logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MigrationReport {
    /// Highest applied migration version.
    pub schema_version: Option<i64>,
    pub migration_count: usize,
}

pub async fn run_pending(pool: &DbPool) -> Result<MigrationReport, MigrateError> {
    MIGRATOR.run(pool).await?;
    let versions: Vec<i64> = MIGRATOR
        .iter()
        .filter(|migration| !migration.migration_type.is_down_migration())
        .map(|migration| migration.version)
        .collect();
    Ok(MigrationReport {
        schema_version: versions.iter().max().copied(),
        migration_count: versions.len(),
    })
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use furlo_core::config::DatabaseConfig;

    use super::run_pending;
    use crate::{connect, migrations::MIGRATOR};

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "employees",
        "workflow_templates",
        "workflow_template_steps",
        "user_flow_steps",
        "leave_requests",
        "approvals",
        "audit_events",
        "idx_employees_scope",
        "idx_employees_role",
        "idx_workflow_templates_scope",
        "idx_leave_requests_status",
        "idx_leave_requests_requester",
        "idx_approvals_approver",
        "idx_audit_events_request_id",
        "idx_audit_events_occurred_at",
    ];

    async fn table_exists(pool: &sqlx::SqlitePool, name: &str) -> bool {
        sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(name)
        .fetch_one(pool)
        .await
        .expect("check table")
        .get::<i64, _>("count")
            == 1
    }

    #[tokio::test]
    async fn migrations_create_baseline_tables() {
        let pool = connect(&DatabaseConfig::in_memory()).await.expect("connect");
        let report = run_pending(&pool).await.expect("run migrations");
        assert!(report.migration_count >= 2, "schema has at least the org and leave migrations");
        assert_eq!(report.schema_version, Some(report.migration_count as i64));

        for table in [
            "employees",
            "workflow_templates",
            "workflow_template_steps",
            "user_flow_steps",
            "leave_requests",
            "approvals",
            "audit_events",
        ] {
            assert!(table_exists(&pool, table).await, "missing table {table}");
        }
    }

    #[tokio::test]
    async fn migrations_are_reversible() {
        let pool = connect(&DatabaseConfig::in_memory()).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        assert!(!table_exists(&pool, "leave_requests").await);
        assert!(!table_exists(&pool, "employees").await);
    }

    #[tokio::test]
    async fn migrations_up_down_up_preserves_schema_signature() {
        let pool = connect(&DatabaseConfig::in_memory()).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let initial_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            initial_signature.len(),
            MANAGED_SCHEMA_OBJECTS.len(),
            "initial migration pass should create all managed schema objects",
        );

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");

        let after_down_signature = managed_schema_signature(&pool).await;
        assert!(
            after_down_signature.is_empty(),
            "managed schema objects should be removed after full undo",
        );

        run_pending(&pool).await.expect("re-run migrations");

        let after_second_up_signature = managed_schema_signature(&pool).await;
        assert_eq!(
            after_second_up_signature, initial_signature,
            "up/down/up should preserve migration-managed schema signature",
        );
    }

    async fn managed_schema_signature(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
        let mut signature: Vec<(String, String, String)> = sqlx::query(
            "SELECT type, name, IFNULL(sql, '') AS sql
             FROM sqlite_master
             WHERE type IN ('table', 'index')",
        )
        .fetch_all(pool)
        .await
        .expect("load schema objects")
        .into_iter()
        .filter_map(|row| {
            let name = row.get::<String, _>("name");
            if MANAGED_SCHEMA_OBJECTS.contains(&name.as_str()) {
                Some((row.get::<String, _>("type"), name, row.get::<String, _>("sql")))
            } else {
                None
            }
        })
        .collect();
        signature.sort();
        signature
    }
}
