use sqlx::Row;

use furlo_core::domain::employee::EmployeeId;
use furlo_core::domain::workflow::{
    TemplateApprover, TemplateStep, UserFlow, UserFlowStep, WorkflowScope, WorkflowTemplate,
};

use super::{RepositoryError, WorkflowRepository};
use crate::DbPool;

pub struct SqlWorkflowRepository {
    pool: DbPool,
}

impl SqlWorkflowRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn scope_columns(scope: &WorkflowScope) -> (&'static str, &str, Option<&str>, Option<&str>) {
    match scope {
        WorkflowScope::Section { company, department, section } => {
            ("section", company, Some(department), Some(section))
        }
        WorkflowScope::Department { company, department } => {
            ("department", company, Some(department), None)
        }
        WorkflowScope::Company { company } => ("company", company, None, None),
    }
}

fn row_to_scope(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowScope, RepositoryError> {
    let kind: String =
        row.try_get("scope_kind").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let company: String =
        row.try_get("company").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let department: Option<String> =
        row.try_get("department").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let section: Option<String> =
        row.try_get("section").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    match kind.as_str() {
        "section" => Ok(WorkflowScope::Section {
            company,
            department: department
                .ok_or_else(|| RepositoryError::Decode("section scope missing department".into()))?,
            section: section
                .ok_or_else(|| RepositoryError::Decode("section scope missing section".into()))?,
        }),
        "department" => Ok(WorkflowScope::Department {
            company,
            department: department.ok_or_else(|| {
                RepositoryError::Decode("department scope missing department".into())
            })?,
        }),
        "company" => Ok(WorkflowScope::Company { company }),
        other => Err(RepositoryError::Decode(format!("unknown scope kind `{other}`"))),
    }
}

fn row_to_step(row: &sqlx::sqlite::SqliteRow) -> Result<TemplateStep, RepositoryError> {
    let level: i64 = row.try_get("level").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let kind: String =
        row.try_get("approver_kind").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let value: String =
        row.try_get("approver_value").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let approver = match kind.as_str() {
        "user" => TemplateApprover::User(EmployeeId(value)),
        "role" => TemplateApprover::Role(
            value.parse().map_err(|err| RepositoryError::Decode(format!("{err}")))?,
        ),
        other => return Err(RepositoryError::Decode(format!("unknown approver kind `{other}`"))),
    };

    Ok(TemplateStep { level: level as u32, approver })
}

#[async_trait::async_trait]
impl WorkflowRepository for SqlWorkflowRepository {
    async fn list_templates(&self) -> Result<Vec<WorkflowTemplate>, RepositoryError> {
        let template_rows = sqlx::query(
            "SELECT id, scope_kind, company, department, section
             FROM workflow_templates ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut templates = Vec::with_capacity(template_rows.len());
        for row in &template_rows {
            let id: String =
                row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
            let scope = row_to_scope(row)?;

            let step_rows = sqlx::query(
                "SELECT level, approver_kind, approver_value
                 FROM workflow_template_steps WHERE template_id = ? ORDER BY level",
            )
            .bind(&id)
            .fetch_all(&self.pool)
            .await?;
            let steps =
                step_rows.iter().map(row_to_step).collect::<Result<Vec<_>, _>>()?;

            templates.push(WorkflowTemplate { id, scope, steps });
        }
        Ok(templates)
    }

    async fn find_user_flow(
        &self,
        requester_id: &EmployeeId,
    ) -> Result<Option<UserFlow>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT level, approver_id FROM user_flow_steps
             WHERE requester_id = ? ORDER BY level",
        )
        .bind(&requester_id.0)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let steps = rows
            .iter()
            .map(|row| {
                let level: i64 =
                    row.try_get("level").map_err(|e| RepositoryError::Decode(e.to_string()))?;
                let approver_id: String = row
                    .try_get("approver_id")
                    .map_err(|e| RepositoryError::Decode(e.to_string()))?;
                Ok(UserFlowStep { level: level as u32, approver_id: EmployeeId(approver_id) })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        Ok(Some(UserFlow { requester_id: requester_id.clone(), steps }))
    }

    async fn save_template(&self, template: WorkflowTemplate) -> Result<(), RepositoryError> {
        let (kind, company, department, section) = scope_columns(&template.scope);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO workflow_templates (id, scope_kind, company, department, section)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 scope_kind = excluded.scope_kind,
                 company = excluded.company,
                 department = excluded.department,
                 section = excluded.section",
        )
        .bind(&template.id)
        .bind(kind)
        .bind(company)
        .bind(department)
        .bind(section)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM workflow_template_steps WHERE template_id = ?")
            .bind(&template.id)
            .execute(&mut *tx)
            .await?;

        for step in &template.steps {
            let (approver_kind, approver_value) = match &step.approver {
                TemplateApprover::User(id) => ("user", id.0.clone()),
                TemplateApprover::Role(role) => ("role", role.as_str().to_string()),
            };
            sqlx::query(
                "INSERT INTO workflow_template_steps (template_id, level, approver_kind, approver_value)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&template.id)
            .bind(i64::from(step.level))
            .bind(approver_kind)
            .bind(&approver_value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save_user_flow(&self, flow: UserFlow) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM user_flow_steps WHERE requester_id = ?")
            .bind(&flow.requester_id.0)
            .execute(&mut *tx)
            .await?;

        for step in &flow.steps {
            sqlx::query(
                "INSERT INTO user_flow_steps (requester_id, level, approver_id) VALUES (?, ?, ?)",
            )
            .bind(&flow.requester_id.0)
            .bind(i64::from(step.level))
            .bind(&step.approver_id.0)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use furlo_core::config::DatabaseConfig;
    use furlo_core::domain::employee::{EmployeeId, Role};
    use furlo_core::domain::workflow::{
        TemplateApprover, TemplateStep, UserFlow, UserFlowStep, WorkflowScope, WorkflowTemplate,
    };

    use super::SqlWorkflowRepository;
    use crate::repositories::WorkflowRepository;
    use crate::{connect, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect(&DatabaseConfig::in_memory()).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn template_round_trips_with_scope_and_steps() {
        let pool = setup().await;
        let repo = SqlWorkflowRepository::new(pool);

        let template = WorkflowTemplate {
            id: "wf-line-a".to_string(),
            scope: WorkflowScope::Section {
                company: "acme".to_string(),
                department: "assembly".to_string(),
                section: "line-a".to_string(),
            },
            steps: vec![
                TemplateStep { level: 1, approver: TemplateApprover::Role(Role::SectionHead) },
                TemplateStep {
                    level: 2,
                    approver: TemplateApprover::User(EmployeeId("m1".to_string())),
                },
            ],
        };
        repo.save_template(template.clone()).await.expect("save");

        let templates = repo.list_templates().await.expect("list");
        assert_eq!(templates, vec![template]);
    }

    #[tokio::test]
    async fn save_template_replaces_steps() {
        let pool = setup().await;
        let repo = SqlWorkflowRepository::new(pool);

        let mut template = WorkflowTemplate {
            id: "wf-dept".to_string(),
            scope: WorkflowScope::Department {
                company: "acme".to_string(),
                department: "assembly".to_string(),
            },
            steps: vec![TemplateStep {
                level: 1,
                approver: TemplateApprover::Role(Role::SectionHead),
            }],
        };
        repo.save_template(template.clone()).await.expect("save");

        template.steps =
            vec![TemplateStep { level: 1, approver: TemplateApprover::Role(Role::DeptManager) }];
        repo.save_template(template.clone()).await.expect("replace");

        let templates = repo.list_templates().await.expect("list");
        assert_eq!(templates[0].steps, template.steps);
    }

    #[tokio::test]
    async fn user_flow_round_trips_and_absence_is_none() {
        let pool = setup().await;
        let repo = SqlWorkflowRepository::new(pool);

        let flow = UserFlow {
            requester_id: EmployeeId("e1".to_string()),
            steps: vec![UserFlowStep { level: 1, approver_id: EmployeeId("mentor".to_string()) }],
        };
        repo.save_user_flow(flow.clone()).await.expect("save");

        let found = repo.find_user_flow(&EmployeeId("e1".to_string())).await.expect("find");
        assert_eq!(found, Some(flow));

        let missing = repo.find_user_flow(&EmployeeId("e2".to_string())).await.expect("find");
        assert!(missing.is_none());
    }
}
