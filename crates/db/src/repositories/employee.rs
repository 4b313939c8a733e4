use sqlx::Row;

use furlo_core::domain::employee::{Employee, EmployeeId, Role};

use super::{EmployeeRepository, RepositoryError};
use crate::DbPool;

pub struct SqlEmployeeRepository {
    pool: DbPool,
}

impl SqlEmployeeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_employee(row: &sqlx::sqlite::SqliteRow) -> Result<Employee, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let employee_no: String =
        row.try_get("employee_no").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let role_str: String =
        row.try_get("role").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let company: String =
        row.try_get("company").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let department: String =
        row.try_get("department").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let section: Option<String> =
        row.try_get("section").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let shift: Option<String> =
        row.try_get("shift").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let is_active: i64 =
        row.try_get("is_active").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let role: Role = role_str
        .parse()
        .map_err(|err| RepositoryError::Decode(format!("employee `{id}`: {err}")))?;

    Ok(Employee {
        id: EmployeeId(id),
        employee_no,
        role,
        company,
        department,
        section,
        shift,
        is_active: is_active != 0,
    })
}

const EMPLOYEE_COLUMNS: &str =
    "id, employee_no, role, company, department, section, shift, is_active";

#[async_trait::async_trait]
impl EmployeeRepository for SqlEmployeeRepository {
    async fn list_active(&self) -> Result<Vec<Employee>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE is_active = 1 ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_employee).collect()
    }

    async fn find_by_id(&self, id: &EmployeeId) -> Result<Option<Employee>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_employee(r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, employee: Employee) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO employees (id, employee_no, role, company, department, section, shift, is_active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 employee_no = excluded.employee_no,
                 role = excluded.role,
                 company = excluded.company,
                 department = excluded.department,
                 section = excluded.section,
                 shift = excluded.shift,
                 is_active = excluded.is_active",
        )
        .bind(&employee.id.0)
        .bind(&employee.employee_no)
        .bind(employee.role.as_str())
        .bind(&employee.company)
        .bind(&employee.department)
        .bind(&employee.section)
        .bind(&employee.shift)
        .bind(i64::from(employee.is_active))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
