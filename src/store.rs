//! Database store for schools, areas, codes, couriers and tasks

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    Area, BindingStatus, CodeApplication, CodeRecord, Courier, CourierLevel, LocationCode, School,
};
use crate::routing::task::{Task, TaskStatus};

const TASK_COLUMNS: &str = "id, pickup_code, delivery_code, status, assigned_courier_id, version, \
     created_at, claimed_at, delivered_at, expires_at, updated_at";

const COURIER_COLUMNS: &str =
    "id, name, level, managed_prefix, parent_id, performance_score, is_active, created_at, updated_at";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn parse_uuid(raw: &str, field: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| AppError::Internal(format!("Invalid {} UUID: {}", field, e)))
}

fn parse_opt_uuid(raw: Option<String>, field: &str) -> Result<Option<Uuid>> {
    raw.map(|s| parse_uuid(&s, field)).transpose()
}

/// Database store
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // School and area operations

    pub async fn insert_school(&self, school: &School) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schools (code, name, is_active, managed_by, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&school.code)
        .bind(&school.name)
        .bind(school.is_active)
        .bind(school.managed_by.map(|u| u.to_string()))
        .bind(school.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::CodeNotAvailable(format!("school {} already exists", school.code))
            } else {
                e.into()
            }
        })?;

        Ok(())
    }

    pub async fn get_school(&self, code: &str) -> Result<Option<School>> {
        let row = sqlx::query_as::<_, SchoolRow>(
            r#"
            SELECT code, name, is_active, managed_by, created_at
            FROM schools
            WHERE code = ?
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_into()).transpose()
    }

    pub async fn insert_area(&self, area: &Area) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO areas (school, area, name, is_active, managed_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&area.school)
        .bind(&area.area)
        .bind(&area.name)
        .bind(area.is_active)
        .bind(area.managed_by.map(|u| u.to_string()))
        .bind(area.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::CodeNotAvailable(format!(
                    "area {}{} already exists",
                    area.school, area.area
                ))
            } else {
                e.into()
            }
        })?;

        Ok(())
    }

    pub async fn get_area(&self, school: &str, area: &str) -> Result<Option<Area>> {
        let row = sqlx::query_as::<_, AreaRow>(
            r#"
            SELECT school, area, name, is_active, managed_by, created_at
            FROM areas
            WHERE school = ? AND area = ?
            "#,
        )
        .bind(school)
        .bind(area)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_into()).transpose()
    }

    /// Deactivate an area and retire every code inside it; returns retired code count
    pub async fn deactivate_area(&self, school: &str, area: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE areas SET is_active = 0 WHERE school = ? AND area = ?")
            .bind(school)
            .bind(area)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Area {}{} not found", school, area)));
        }

        let retired = sqlx::query(
            "UPDATE codes SET is_active = 0 WHERE school = ? AND area = ? AND is_active = 1",
        )
        .bind(school)
        .bind(area)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(retired)
    }

    /// Deactivate a school, its areas and their codes; returns retired code count
    pub async fn deactivate_school(&self, school: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE schools SET is_active = 0 WHERE code = ?")
            .bind(school)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("School {} not found", school)));
        }

        sqlx::query("UPDATE areas SET is_active = 0 WHERE school = ?")
            .bind(school)
            .execute(&mut *tx)
            .await?;

        let retired = sqlx::query("UPDATE codes SET is_active = 0 WHERE school = ? AND is_active = 1")
            .bind(school)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(retired)
    }

    // Code operations

    pub async fn get_code(&self, code: &LocationCode) -> Result<Option<CodeRecord>> {
        let row = sqlx::query_as::<_, CodeRow>(
            r#"
            SELECT code, point_type, binding_status, is_public, is_active, managed_by, created_at
            FROM codes
            WHERE code = ?
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_into()).transpose()
    }

    /// Point segments in an area that are activated, retired or reserved
    pub async fn taken_points(&self, school: &str, area: &str) -> Result<HashSet<String>> {
        let prefix = format!("{}{}", school, area);
        let points: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT point FROM codes WHERE school = ? AND area = ?
            UNION
            SELECT substr(code, 5, 2) FROM code_applications
            WHERE status = 'pending' AND substr(code, 1, 4) = ?
            "#,
        )
        .bind(school)
        .bind(area)
        .bind(&prefix)
        .fetch_all(&self.pool)
        .await?;

        Ok(points.into_iter().map(|(p,)| p).collect())
    }

    pub async fn insert_application(&self, application: &CodeApplication) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO code_applications (id, code, point_type, is_public, requested_by, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(application.id.to_string())
        .bind(application.code.as_str())
        .bind(application.point_type.as_str())
        .bind(application.is_public)
        .bind(&application.requested_by)
        .bind(application.status.as_str())
        .bind(application.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::CodeNotAvailable(format!("code {} is already reserved", application.code))
            } else {
                e.into()
            }
        })?;

        Ok(())
    }

    pub async fn get_application(&self, id: Uuid) -> Result<CodeApplication> {
        let row = sqlx::query_as::<_, ApplicationRow>(
            r#"
            SELECT id, code, point_type, is_public, requested_by, status, reviewed_by, created_at, reviewed_at
            FROM code_applications
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Application {} not found", id)))?;

        row.try_into()
    }

    /// Mark a pending application approved and activate its code, atomically
    pub async fn activate_code(
        &self,
        application: &CodeApplication,
        approver_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<CodeRecord> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE code_applications
            SET status = 'approved', reviewed_by = ?, reviewed_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(approver_id.to_string())
        .bind(now)
        .bind(application.id.to_string())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::InvalidStateTransition(format!(
                "application {} is no longer pending",
                application.id
            )));
        }

        let code = &application.code;
        sqlx::query(
            r#"
            INSERT INTO codes (code, school, area, point, point_type, binding_status, is_public, is_active, managed_by, application_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?)
            "#,
        )
        .bind(code.as_str())
        .bind(code.school())
        .bind(code.area())
        .bind(code.point())
        .bind(application.point_type.as_str())
        .bind(BindingStatus::Approved.as_str())
        .bind(application.is_public)
        .bind(approver_id.to_string())
        .bind(application.id.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::CodeNotAvailable(format!("code {} is already active", code))
            } else {
                e.into()
            }
        })?;

        tx.commit().await?;

        Ok(CodeRecord {
            code: code.clone(),
            point_type: application.point_type,
            binding_status: BindingStatus::Approved,
            is_public: application.is_public,
            is_active: true,
            managed_by: Some(approver_id),
            created_at: now,
        })
    }

    pub async fn reject_application(
        &self,
        id: Uuid,
        reviewer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE code_applications
            SET status = 'rejected', reviewed_by = ?, reviewed_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(reviewer_id.to_string())
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // Courier operations

    pub async fn get_courier(&self, id: Uuid) -> Result<Courier> {
        let row = sqlx::query_as::<_, CourierRow>(&format!(
            "SELECT {} FROM couriers WHERE id = ?",
            COURIER_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Courier {} not found", id)))?;

        row.try_into()
    }

    pub async fn list_couriers(&self) -> Result<Vec<Courier>> {
        fetch_couriers(&self.pool).await
    }

    /// Insert a courier after `check` accepts the current courier table.
    ///
    /// The scope check, the insert and the scope manager update share one
    /// transaction, so a courier never lands in a retired school or area.
    pub async fn insert_courier_checked<F>(&self, courier: &Courier, check: F) -> Result<()>
    where
        F: FnOnce(&[Courier]) -> Result<()>,
    {
        let mut tx = self.pool.begin().await?;
        ensure_scope_active(&mut tx, &courier.managed_prefix).await?;
        let snapshot = fetch_couriers(&mut *tx).await?;
        check(&snapshot)?;

        sqlx::query(
            r#"
            INSERT INTO couriers (id, name, level, managed_prefix, parent_id, performance_score, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(courier.id.to_string())
        .bind(&courier.name)
        .bind(courier.level.as_u8() as i64)
        .bind(&courier.managed_prefix)
        .bind(courier.parent_id.map(|u| u.to_string()))
        .bind(courier.performance_score)
        .bind(courier.is_active)
        .bind(courier.created_at)
        .bind(courier.updated_at)
        .execute(&mut *tx)
        .await?;

        // School and area couriers become the recorded manager of their scope
        let prefix = courier.managed_prefix.as_str();
        let scope = match courier.level {
            CourierLevel::School => Some(
                sqlx::query("UPDATE schools SET managed_by = ? WHERE code = ?")
                    .bind(courier.id.to_string())
                    .bind(prefix),
            ),
            CourierLevel::Area => Some(
                sqlx::query("UPDATE areas SET managed_by = ? WHERE school = ? AND area = ?")
                    .bind(courier.id.to_string())
                    .bind(&prefix[0..2])
                    .bind(&prefix[2..4]),
            ),
            CourierLevel::Point | CourierLevel::Global => None,
        };
        if let Some(query) = scope {
            if query.execute(&mut *tx).await?.rows_affected() == 0 {
                return Err(AppError::NotFound(format!("Scope {} not found", prefix)));
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Change a courier's parent after `check` accepts the current courier table
    pub async fn update_parent_checked<F>(
        &self,
        id: Uuid,
        parent_id: Option<Uuid>,
        check: F,
    ) -> Result<()>
    where
        F: FnOnce(&[Courier]) -> Result<()>,
    {
        let mut tx = self.pool.begin().await?;
        let snapshot = fetch_couriers(&mut *tx).await?;
        check(&snapshot)?;

        sqlx::query("UPDATE couriers SET parent_id = ?, updated_at = ? WHERE id = ?")
            .bind(parent_id.map(|u| u.to_string()))
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Deactivate couriers and re-point children in one transaction
    pub async fn apply_deactivation(
        &self,
        deactivate: &[Uuid],
        reparent: &[(Uuid, Option<Uuid>)],
    ) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        for (child, new_parent) in reparent {
            sqlx::query("UPDATE couriers SET parent_id = ?, updated_at = ? WHERE id = ?")
                .bind(new_parent.map(|u| u.to_string()))
                .bind(now)
                .bind(child.to_string())
                .execute(&mut *tx)
                .await?;
        }

        for id in deactivate {
            sqlx::query("UPDATE couriers SET is_active = 0, updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn update_performance_score(&self, id: Uuid, score: f64) -> Result<()> {
        let result =
            sqlx::query("UPDATE couriers SET performance_score = ?, updated_at = ? WHERE id = ?")
                .bind(score)
                .bind(Utc::now())
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Courier {} not found", id)));
        }
        Ok(())
    }

    // Task operations

    pub async fn insert_task(&self, task: &Task) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, pickup_code, delivery_code, status, assigned_courier_id, version,
                               created_at, claimed_at, delivered_at, expires_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(task.pickup_code.as_str())
        .bind(task.delivery_code.as_str())
        .bind(task.status.as_str())
        .bind(task.assigned_courier_id.map(|u| u.to_string()))
        .bind(task.version)
        .bind(task.created_at)
        .bind(task.claimed_at)
        .bind(task.delivered_at)
        .bind(task.expires_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Task> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM tasks WHERE id = ?",
            TASK_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Task {} not found", id)))?;

        row.try_into()
    }

    /// Write `task` only if the stored version still equals `expected_version`.
    ///
    /// `task.version` must already be `expected_version + 1`. Returns `false`
    /// when another writer got there first.
    pub async fn commit_task(&self, task: &Task, expected_version: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?, assigned_courier_id = ?, version = ?, claimed_at = ?,
                delivered_at = ?, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(task.status.as_str())
        .bind(task.assigned_courier_id.map(|u| u.to_string()))
        .bind(task.version)
        .bind(task.claimed_at)
        .bind(task.delivered_at)
        .bind(task.updated_at)
        .bind(task.id.to_string())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// All tasks not yet delivered, cancelled or expired
    pub async fn list_open_tasks(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM tasks WHERE status IN ('available', 'accepted', 'collected', 'in_transit') \
             ORDER BY created_at ASC",
            TASK_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Available tasks whose pickup code starts with `prefix`
    pub async fn list_available_tasks(&self, prefix: &str) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM tasks WHERE status = 'available' AND substr(pickup_code, 1, ?) = ? \
             ORDER BY created_at ASC",
            TASK_COLUMNS
        ))
        .bind(prefix.len() as i64)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Tasks currently held by a courier
    pub async fn active_task_count(&self, courier_id: Uuid) -> Result<u32> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM tasks
            WHERE assigned_courier_id = ? AND status IN ('accepted', 'collected', 'in_transit')
            "#,
        )
        .bind(courier_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u32)
    }

    pub async fn active_task_counts(&self) -> Result<HashMap<Uuid, u32>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT assigned_courier_id, COUNT(*) FROM tasks
            WHERE assigned_courier_id IS NOT NULL AND status IN ('accepted', 'collected', 'in_transit')
            GROUP BY assigned_courier_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, count)| Ok((parse_uuid(&id, "courier")?, count as u32)))
            .collect()
    }
}

/// School and area named by a managed prefix must both be active
async fn ensure_scope_active(conn: &mut SqliteConnection, prefix: &str) -> Result<()> {
    if prefix.len() >= 2 {
        let school = &prefix[0..2];
        let active: Option<bool> =
            sqlx::query_scalar("SELECT is_active FROM schools WHERE code = ?")
                .bind(school)
                .fetch_optional(&mut *conn)
                .await?;
        if active != Some(true) {
            return Err(AppError::InvalidCodeFormat(format!(
                "school {} is not an active school",
                school
            )));
        }
    }
    if prefix.len() >= 4 {
        let active: Option<bool> =
            sqlx::query_scalar("SELECT is_active FROM areas WHERE school = ? AND area = ?")
                .bind(&prefix[0..2])
                .bind(&prefix[2..4])
                .fetch_optional(&mut *conn)
                .await?;
        if active != Some(true) {
            return Err(AppError::InvalidCodeFormat(format!(
                "area {} is not an active area",
                &prefix[0..4]
            )));
        }
    }
    Ok(())
}

async fn fetch_couriers<'e, E>(executor: E) -> Result<Vec<Courier>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, CourierRow>(&format!(
        "SELECT {} FROM couriers ORDER BY level DESC, created_at ASC",
        COURIER_COLUMNS
    ))
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(|r| r.try_into()).collect()
}

// Internal row types for sqlx

#[derive(sqlx::FromRow)]
struct SchoolRow {
    code: String,
    name: String,
    is_active: bool,
    managed_by: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<SchoolRow> for School {
    type Error = AppError;

    fn try_from(row: SchoolRow) -> Result<Self> {
        Ok(School {
            code: row.code,
            name: row.name,
            is_active: row.is_active,
            managed_by: parse_opt_uuid(row.managed_by, "managed_by")?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AreaRow {
    school: String,
    area: String,
    name: String,
    is_active: bool,
    managed_by: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AreaRow> for Area {
    type Error = AppError;

    fn try_from(row: AreaRow) -> Result<Self> {
        Ok(Area {
            school: row.school,
            area: row.area,
            name: row.name,
            is_active: row.is_active,
            managed_by: parse_opt_uuid(row.managed_by, "managed_by")?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CodeRow {
    code: String,
    point_type: String,
    binding_status: String,
    is_public: bool,
    is_active: bool,
    managed_by: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<CodeRow> for CodeRecord {
    type Error = AppError;

    fn try_from(row: CodeRow) -> Result<Self> {
        Ok(CodeRecord {
            code: LocationCode::parse(&row.code)
                .map_err(|e| AppError::Internal(format!("Stored code is malformed: {}", e)))?,
            point_type: row.point_type.parse().map_err(AppError::Internal)?,
            binding_status: row.binding_status.parse().map_err(AppError::Internal)?,
            is_public: row.is_public,
            is_active: row.is_active,
            managed_by: parse_opt_uuid(row.managed_by, "managed_by")?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ApplicationRow {
    id: String,
    code: String,
    point_type: String,
    is_public: bool,
    requested_by: String,
    status: String,
    reviewed_by: Option<String>,
    created_at: DateTime<Utc>,
    reviewed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ApplicationRow> for CodeApplication {
    type Error = AppError;

    fn try_from(row: ApplicationRow) -> Result<Self> {
        Ok(CodeApplication {
            id: parse_uuid(&row.id, "application")?,
            code: LocationCode::parse(&row.code)
                .map_err(|e| AppError::Internal(format!("Stored code is malformed: {}", e)))?,
            point_type: row.point_type.parse().map_err(AppError::Internal)?,
            is_public: row.is_public,
            requested_by: row.requested_by,
            status: row.status.parse().map_err(AppError::Internal)?,
            reviewed_by: parse_opt_uuid(row.reviewed_by, "reviewed_by")?,
            created_at: row.created_at,
            reviewed_at: row.reviewed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CourierRow {
    id: String,
    name: String,
    level: i64,
    managed_prefix: String,
    parent_id: Option<String>,
    performance_score: f64,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CourierRow> for Courier {
    type Error = AppError;

    fn try_from(row: CourierRow) -> Result<Self> {
        let level: CourierLevel = u8::try_from(row.level)
            .map_err(|e| AppError::Internal(format!("Invalid courier level: {}", e)))?
            .try_into()
            .map_err(AppError::Internal)?;

        Ok(Courier {
            id: parse_uuid(&row.id, "courier")?,
            name: row.name,
            level,
            managed_prefix: row.managed_prefix,
            parent_id: parse_opt_uuid(row.parent_id, "parent_id")?,
            performance_score: row.performance_score,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    pickup_code: String,
    delivery_code: String,
    status: String,
    assigned_courier_id: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = AppError;

    fn try_from(row: TaskRow) -> Result<Self> {
        let status: TaskStatus = row
            .status
            .parse()
            .map_err(|e| AppError::Internal(format!("Invalid status: {}", e)))?;

        Ok(Task {
            id: parse_uuid(&row.id, "task")?,
            pickup_code: LocationCode::parse(&row.pickup_code)
                .map_err(|e| AppError::Internal(format!("Stored code is malformed: {}", e)))?,
            delivery_code: LocationCode::parse(&row.delivery_code)
                .map_err(|e| AppError::Internal(format!("Stored code is malformed: {}", e)))?,
            status,
            assigned_courier_id: parse_opt_uuid(row.assigned_courier_id, "assigned_courier_id")?,
            version: row.version,
            created_at: row.created_at,
            claimed_at: row.claimed_at,
            delivered_at: row.delivered_at,
            expires_at: row.expires_at,
            updated_at: row.updated_at,
        })
    }
}
