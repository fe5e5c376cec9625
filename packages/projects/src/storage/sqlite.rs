// ABOUTME: SQLite-backed ProjectStorage using raw sqlx queries
// ABOUTME: Lifecycle fields are written together so the container invariant is never split

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{migrate::MigrateDatabase, Row};
use tracing::{debug, info};

use super::{StorageError, StorageResult};
use crate::types::{Project, ProjectStatus, ProjectType, UpdateProjectRequest};

/// Open (creating if needed) the project database and apply pragmas
pub async fn connect_pool(database_url: &str) -> StorageResult<SqlitePool> {
    if !database_url.contains(":memory:") && !sqlx::Sqlite::database_exists(database_url).await? {
        debug!("Creating database at: {}", database_url);
        sqlx::Sqlite::create_database(database_url).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(database_url)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous = NORMAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    Ok(pool)
}

/// Lifecycle columns that must change as one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleState {
    pub status: ProjectStatus,
    pub container_id: Option<String>,
    pub last_error: Option<String>,
}

pub struct ProjectStorage {
    pool: SqlitePool,
}

impl ProjectStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Project storage migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn parse_timestamp(value: &str) -> StorageResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StorageError::InvalidStatus(format!("timestamp '{}': {}", value, e)))
    }

    fn row_to_project(row: &SqliteRow) -> StorageResult<Project> {
        let type_str: String = row.try_get("project_type")?;
        let project_type = ProjectType::from_str(&type_str)
            .ok_or_else(|| StorageError::InvalidStatus(format!("project type '{}'", type_str)))?;

        let status_str: String = row.try_get("status")?;
        let status = ProjectStatus::from_str(&status_str)
            .ok_or_else(|| StorageError::InvalidStatus(format!("status '{}'", status_str)))?;

        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Project {
            id: row.try_get("id")?,
            project_type,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            repo_url: row.try_get("repo_url")?,
            branch: row.try_get("branch")?,
            spec: row.try_get("spec")?,
            status,
            container_id: row.try_get("container_id")?,
            owner_id: row.try_get("owner_id")?,
            thread_id: row.try_get("thread_id")?,
            last_error: row.try_get("last_error")?,
            created_at: Self::parse_timestamp(&created_at)?,
            updated_at: Self::parse_timestamp(&updated_at)?,
        })
    }

    pub async fn insert(&self, project: &Project) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO projects (
                id, project_type, title, description, repo_url, branch, spec,
                status, container_id, owner_id, thread_id, last_error, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&project.id)
        .bind(project.project_type.as_str())
        .bind(&project.title)
        .bind(&project.description)
        .bind(&project.repo_url)
        .bind(&project.branch)
        .bind(&project.spec)
        .bind(project.status.as_str())
        .bind(&project.container_id)
        .bind(&project.owner_id)
        .bind(&project.thread_id)
        .bind(&project.last_error)
        .bind(project.created_at.to_rfc3339())
        .bind(project.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(project_id = %project.id, "Inserted project");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> StorageResult<Option<Project>> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_project).transpose()
    }

    /// Newest first
    pub async fn list_by_owner(
        &self,
        owner_id: &str,
        skip: i64,
        limit: i64,
    ) -> StorageResult<Vec<Project>> {
        let rows = sqlx::query(
            "SELECT * FROM projects WHERE owner_id = ? ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
        )
        .bind(owner_id)
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_project).collect()
    }

    pub async fn count_by_owner(&self, owner_id: &str) -> StorageResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM projects WHERE owner_id = ?")
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("total")?)
    }

    /// Apply descriptive field changes; lifecycle columns are untouched
    pub async fn update_details(
        &self,
        id: &str,
        update: &UpdateProjectRequest,
    ) -> StorageResult<Project> {
        let mut parts = Vec::new();
        if update.title.is_some() {
            parts.push("title = ?");
        }
        if update.description.is_some() {
            parts.push("description = ?");
        }
        if update.spec.is_some() {
            parts.push("spec = ?");
        }
        if update.repo_url.is_some() {
            parts.push("repo_url = ?");
        }
        if update.branch.is_some() {
            parts.push("branch = ?");
        }
        parts.push("updated_at = ?");

        let query_str = format!("UPDATE projects SET {} WHERE id = ?", parts.join(", "));
        let mut query = sqlx::query(&query_str);
        if let Some(title) = &update.title {
            query = query.bind(title);
        }
        if let Some(description) = &update.description {
            query = query.bind(description);
        }
        if let Some(spec) = &update.spec {
            query = query.bind(spec);
        }
        if let Some(repo_url) = &update.repo_url {
            query = query.bind(repo_url);
        }
        if let Some(branch) = &update.branch {
            query = query.bind(branch);
        }
        query = query.bind(Utc::now().to_rfc3339()).bind(id);

        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        self.get(id).await?.ok_or(StorageError::NotFound)
    }

    /// Write status, container reference, and last error in a single statement
    pub async fn set_lifecycle(&self, id: &str, state: &LifecycleState) -> StorageResult<Project> {
        let result = sqlx::query(
            "UPDATE projects SET status = ?, container_id = ?, last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(state.status.as_str())
        .bind(&state.container_id)
        .bind(&state.last_error)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        debug!(project_id = %id, status = %state.status, "Updated project lifecycle");
        self.get(id).await?.ok_or(StorageError::NotFound)
    }

    /// Bind the project to a conversation thread unless it already has one
    ///
    /// Returns the thread id the project ends up bound to.
    pub async fn bind_thread(&self, id: &str, thread_id: &str) -> StorageResult<String> {
        sqlx::query(
            "UPDATE projects SET thread_id = ?, updated_at = ? WHERE id = ? AND thread_id IS NULL",
        )
        .bind(thread_id)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        let project = self.get(id).await?.ok_or(StorageError::NotFound)?;
        Ok(project.thread_id.unwrap_or_else(|| thread_id.to_string()))
    }

    pub async fn delete(&self, id: &str) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        info!(project_id = %id, "Deleted project record");
        Ok(())
    }
}
