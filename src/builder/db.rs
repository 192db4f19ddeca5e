use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use super::models::*;

/// Async-safe handle to the build database.
///
/// Wraps `BuilderDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BuilderDb>>,
}

impl DbHandle {
    pub fn new(db: BuilderDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BuilderDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct BuilderDb {
    conn: Connection,
}

impl BuilderDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS projects (
                    id TEXT PRIMARY KEY,
                    description TEXT NOT NULL,
                    project_type TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'queued',
                    workspace_path TEXT NOT NULL,
                    preferred_stack TEXT,
                    deploy_target TEXT NOT NULL DEFAULT 'localhost',
                    local_port INTEGER,
                    deploy_url TEXT,
                    production_url TEXT,
                    error TEXT,
                    build_prompt TEXT,
                    commit_sha TEXT,
                    github_url TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS build_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    phase TEXT NOT NULL,
                    message TEXT NOT NULL,
                    timestamp TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_build_logs_project ON build_logs(project_id);
                CREATE INDEX IF NOT EXISTS idx_projects_created ON projects(created_at);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Projects ─────────────────────────────────────────────────────

    pub fn insert_project(&self, project: &BuildProject) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO projects (
                    id, description, project_type, status, workspace_path,
                    preferred_stack, deploy_target, local_port, deploy_url,
                    production_url, error, build_prompt, commit_sha, github_url,
                    created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    project.id,
                    project.description,
                    project.project_type.as_str(),
                    project.status.as_str(),
                    project.workspace_path,
                    project.preferred_stack,
                    project.deploy_target.as_str(),
                    project.local_port,
                    project.deploy_url,
                    project.production_url,
                    project.error,
                    project.build_prompt,
                    project.commit_sha,
                    project.github_url,
                    project.created_at,
                    project.updated_at,
                ],
            )
            .context("Failed to insert project")?;
        Ok(())
    }

    pub fn get_project(&self, id: &str) -> Result<Option<BuildProject>> {
        self.conn
            .query_row(
                "SELECT id, description, project_type, status, workspace_path,
                        preferred_stack, deploy_target, local_port, deploy_url,
                        production_url, error, build_prompt, commit_sha, github_url,
                        created_at, updated_at
                 FROM projects WHERE id = ?1",
                params![id],
                row_to_project,
            )
            .optional()
            .context("Failed to query project")
    }

    pub fn list_projects(&self) -> Result<Vec<BuildProject>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, description, project_type, status, workspace_path,
                    preferred_stack, deploy_target, local_port, deploy_url,
                    production_url, error, build_prompt, commit_sha, github_url,
                    created_at, updated_at
             FROM projects ORDER BY created_at DESC, rowid DESC",
        )?;
        let projects = stmt
            .query_map([], row_to_project)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to list projects")?;
        Ok(projects)
    }

    /// Unconditional status write. The pipeline task is the sole caller;
    /// cancellation and failure use the conditional writers below.
    pub fn update_status(&self, id: &str, status: BuildStatus) -> Result<Option<BuildProject>> {
        self.conn
            .execute(
                "UPDATE projects SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, status.as_str(), now()],
            )
            .context("Failed to update status")?;
        self.get_project(id)
    }

    /// Transition to `failed` and record the error, unless the project
    /// already reached a terminal state. Returns the updated row, or
    /// `None` if the conditional write did not apply.
    pub fn fail_project(&self, id: &str, error: &str) -> Result<Option<BuildProject>> {
        let changed = self
            .conn
            .execute(
                "UPDATE projects SET status = 'failed', error = ?2, updated_at = ?3
                 WHERE id = ?1 AND status NOT IN ('complete', 'failed', 'cancelled')",
                params![id, error, now()],
            )
            .context("Failed to mark project failed")?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_project(id)
    }

    /// Transition to `cancelled` unless the project already reached a
    /// terminal state. The cancelled-vs-finished race resolves here:
    /// whichever writer lands first wins, the other becomes a no-op.
    pub fn cancel_project(&self, id: &str) -> Result<Option<BuildProject>> {
        let changed = self
            .conn
            .execute(
                "UPDATE projects SET status = 'cancelled', updated_at = ?2
                 WHERE id = ?1 AND status NOT IN ('complete', 'failed', 'cancelled')",
                params![id, now()],
            )
            .context("Failed to cancel project")?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_project(id)
    }

    pub fn set_build_prompt(&self, id: &str, prompt: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE projects SET build_prompt = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, prompt, now()],
            )
            .context("Failed to record build prompt")?;
        Ok(())
    }

    pub fn set_local_port(&self, id: &str, port: u16) -> Result<()> {
        self.conn
            .execute(
                "UPDATE projects SET local_port = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, port, now()],
            )
            .context("Failed to record local port")?;
        Ok(())
    }

    pub fn set_deploy_urls(
        &self,
        id: &str,
        deploy_url: &str,
        production_url: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE projects SET deploy_url = ?2, production_url = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![id, deploy_url, production_url, now()],
            )
            .context("Failed to record deploy URLs")?;
        Ok(())
    }

    pub fn set_repository_info(&self, id: &str, commit_sha: &str, github_url: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE projects SET commit_sha = ?2, github_url = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![id, commit_sha, github_url, now()],
            )
            .context("Failed to record repository info")?;
        Ok(())
    }

    // ── Build logs ───────────────────────────────────────────────────

    pub fn append_log(&self, project_id: &str, phase: &str, message: &str) -> Result<BuildLogEntry> {
        let timestamp = now();
        self.conn
            .execute(
                "INSERT INTO build_logs (project_id, phase, message, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![project_id, phase, message, timestamp],
            )
            .context("Failed to append build log")?;
        let id = self.conn.last_insert_rowid();
        Ok(BuildLogEntry {
            id,
            project_id: project_id.to_string(),
            phase: phase.to_string(),
            message: message.to_string(),
            timestamp,
        })
    }

    /// All log rows for a project, totally ordered by insertion.
    pub fn get_logs(&self, project_id: &str) -> Result<Vec<BuildLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, phase, message, timestamp
             FROM build_logs WHERE project_id = ?1 ORDER BY id",
        )?;
        let logs = stmt
            .query_map(params![project_id], |row| {
                Ok(BuildLogEntry {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    phase: row.get(2)?,
                    message: row.get(3)?,
                    timestamp: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to fetch build logs")?;
        Ok(logs)
    }
}

fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<BuildProject> {
    let project_type: String = row.get(2)?;
    let status: String = row.get(3)?;
    let deploy_target: String = row.get(6)?;
    Ok(BuildProject {
        id: row.get(0)?,
        description: row.get(1)?,
        project_type: ProjectType::from_str(&project_type).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
        })?,
        status: BuildStatus::from_str(&status).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
        })?,
        workspace_path: row.get(4)?,
        preferred_stack: row.get(5)?,
        deploy_target: DeployTarget::from_str(&deploy_target).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, e.into())
        })?,
        local_port: row.get(7)?,
        deploy_url: row.get(8)?,
        production_url: row.get(9)?,
        error: row.get(10)?,
        build_prompt: row.get(11)?,
        commit_sha: row.get(12)?,
        github_url: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}
