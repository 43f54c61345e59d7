use sqlx::{sqlite::SqliteRow, Row};

use kahawa_core::domain::employee::{normalize_identity, Employee, EmployeeId, EmployeeStatus};

use super::{encode_json, parse_json, parse_timestamp, EmployeeRepository, RepositoryError};
use crate::DbPool;

const SELECT_COLUMNS: &str = "SELECT
        id,
        full_name,
        email,
        phone,
        role,
        department,
        permissions_json,
        status,
        created_at,
        updated_at
     FROM employee";

pub struct SqlEmployeeRepository {
    pool: DbPool,
}

impl SqlEmployeeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl EmployeeRepository for SqlEmployeeRepository {
    async fn find_by_id(&self, id: &EmployeeId) -> Result<Option<Employee>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(employee_from_row).transpose()
    }

    async fn find_by_identity(&self, identity: &str) -> Result<Option<Employee>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE lower(email) = ?"))
            .bind(normalize_identity(identity))
            .fetch_optional(&self.pool)
            .await?;

        row.map(employee_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Employee>, RepositoryError> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY full_name ASC, email ASC"))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(employee_from_row).collect()
    }

    async fn save(&self, employee: Employee) -> Result<(), RepositoryError> {
        let permissions = encode_json("permissions_json", &employee.permissions)?;

        sqlx::query(
            "INSERT INTO employee (
                id,
                full_name,
                email,
                phone,
                role,
                department,
                permissions_json,
                status,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                full_name = excluded.full_name,
                email = excluded.email,
                phone = excluded.phone,
                role = excluded.role,
                department = excluded.department,
                permissions_json = excluded.permissions_json,
                status = excluded.status,
                updated_at = excluded.updated_at",
        )
        .bind(&employee.id.0)
        .bind(&employee.full_name)
        .bind(normalize_identity(&employee.email))
        .bind(employee.phone.as_deref())
        .bind(&employee.role)
        .bind(&employee.department)
        .bind(permissions)
        .bind(employee.status.as_str())
        .bind(employee.created_at.to_rfc3339())
        .bind(employee.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|error| match &error {
            sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Duplicate {
                entity: "employee email",
                id: normalize_identity(&employee.email),
            },
            _ => RepositoryError::Database(error),
        })?;

        Ok(())
    }
}

fn employee_from_row(row: SqliteRow) -> Result<Employee, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = EmployeeStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown employee status `{status_raw}`")))?;
    let permissions_raw = row.try_get::<String, _>("permissions_json")?;

    Ok(Employee {
        id: EmployeeId(row.try_get("id")?),
        full_name: row.try_get("full_name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        role: row.try_get("role")?,
        department: row.try_get("department")?,
        permissions: parse_json("permissions_json", &permissions_raw)?,
        status,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use kahawa_core::domain::employee::{Employee, EmployeeId, EmployeeStatus};

    use super::SqlEmployeeRepository;
    use crate::migrations;
    use crate::repositories::{EmployeeRepository, RepositoryError};
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn sql_employee_repo_round_trip_and_identity_lookup() {
        let pool = setup_pool().await;
        let repo = SqlEmployeeRepository::new(pool.clone());
        let employee = sample_employee("EMP-001", "brian@kahawa.test", "finance_manager");

        repo.save(employee.clone()).await.expect("save");

        assert_eq!(repo.find_by_id(&employee.id).await.expect("by id"), Some(employee.clone()));
        assert_eq!(
            repo.find_by_identity("  Brian@Kahawa.TEST ").await.expect("by identity"),
            Some(employee.clone())
        );
        assert_eq!(repo.find_by_identity("nobody@kahawa.test").await.expect("missing"), None);

        pool.close().await;
    }

    #[tokio::test]
    async fn sql_employee_repo_upsert_updates_role_and_status() {
        let pool = setup_pool().await;
        let repo = SqlEmployeeRepository::new(pool.clone());
        let mut employee = sample_employee("EMP-002", "carol@kahawa.test", "staff");
        repo.save(employee.clone()).await.expect("save");

        employee.role = "admin".to_owned();
        employee.status = EmployeeStatus::Inactive;
        employee.permissions = vec!["reports:view".to_owned()];
        employee.updated_at = parse_ts("2026-03-05T10:00:00Z");
        repo.save(employee.clone()).await.expect("upsert");

        let listed = repo.list().await.expect("list");
        assert_eq!(listed, vec![employee]);

        pool.close().await;
    }

    #[tokio::test]
    async fn email_is_unique_across_employees() {
        let pool = setup_pool().await;
        let repo = SqlEmployeeRepository::new(pool.clone());
        repo.save(sample_employee("EMP-003", "dora@kahawa.test", "staff")).await.expect("save");

        let clash = repo.save(sample_employee("EMP-004", "dora@kahawa.test", "staff")).await;
        assert!(matches!(clash, Err(RepositoryError::Duplicate { .. })));

        pool.close().await;
    }

    fn sample_employee(id: &str, email: &str, role: &str) -> Employee {
        Employee {
            id: EmployeeId(id.to_owned()),
            full_name: email.split('@').next().unwrap_or(email).to_owned(),
            email: email.to_owned(),
            phone: Some("+256781121639".to_owned()),
            role: role.to_owned(),
            department: "Finance".to_owned(),
            permissions: Vec::new(),
            status: EmployeeStatus::Active,
            created_at: parse_ts("2026-03-01T08:00:00Z"),
            updated_at: parse_ts("2026-03-01T08:00:00Z"),
        }
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("timestamp").with_timezone(&Utc)
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }
}
