use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use uuid::Uuid;

use super::agent::{AgentOutcome, AgentRunner};
use super::db::DbHandle;
use super::deploy::Deployer;
use super::events::ProgressBus;
use super::models::*;
use super::prompts;
use super::session::SessionManager;
use super::workspace::WorkspaceManager;
use crate::errors::BuildError;

/// First port probed when assigning a local dev-server port.
const LOCAL_PORT_START: u16 = 3000;

/// Pure-read result of `get_project_status`. `project` is `None` for an
/// unknown id; reads never fail with not-found.
#[derive(Debug, Serialize)]
pub struct ProjectStatus {
    pub project: Option<BuildProject>,
    pub logs: Vec<BuildLogEntry>,
}

/// Whether the pipeline task may keep driving phases forward.
enum Step {
    Continue,
    /// Cancelled/failed concurrently, project gone, or parked for input.
    Halt,
}

/// The build pipeline state machine.
///
/// Owns every `BuildProject`'s lifecycle: each `start_build` spawns one
/// asynchronous task that is the sole writer of that project's status.
/// Every phase entry persists the new status, appends one `BuildLogEntry`,
/// and publishes one `BuildProgressEvent`. Cancellation is cooperative:
/// `cancel_build` kills the agent process and writes `cancelled`; the
/// pipeline task observes that at its next checkpoint and stops without
/// overwriting (last writer wins).
#[derive(Clone)]
pub struct BuildOrchestrator {
    db: DbHandle,
    workspaces: Arc<WorkspaceManager>,
    bus: Arc<ProgressBus>,
    agent: Arc<dyn AgentRunner>,
    deployer: Arc<dyn Deployer>,
    sessions: Arc<SessionManager>,
}

impl BuildOrchestrator {
    pub fn new(
        db: DbHandle,
        workspaces: Arc<WorkspaceManager>,
        bus: Arc<ProgressBus>,
        agent: Arc<dyn AgentRunner>,
        deployer: Arc<dyn Deployer>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            db,
            workspaces,
            bus,
            agent,
            deployer,
            sessions,
        }
    }

    pub fn bus(&self) -> &Arc<ProgressBus> {
        &self.bus
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn workspaces(&self) -> &Arc<WorkspaceManager> {
        &self.workspaces
    }

    // ── Public operations ────────────────────────────────────────────

    /// Validate the request, create the project row in `queued`, allocate
    /// its workspace, and schedule the pipeline. Returns immediately —
    /// the caller never blocks on pipeline completion, and pipeline
    /// failures are only observable via status polling or the event bus.
    pub async fn start_build(&self, req: BuildRequest) -> Result<String, BuildError> {
        if req.description.trim().is_empty() {
            return Err(BuildError::Validation {
                field: "description",
                value: req.description,
            });
        }
        let project_type: ProjectType =
            req.project_type
                .parse()
                .map_err(|_| BuildError::Validation {
                    field: "project_type",
                    value: req.project_type.clone(),
                })?;
        let deploy_target = match req.deploy_target.as_deref() {
            None | Some("") => DeployTarget::Localhost,
            Some(raw) => raw.parse().map_err(|_| BuildError::Validation {
                field: "deploy_target",
                value: raw.to_string(),
            })?,
        };

        let id = Uuid::new_v4().to_string();
        let workspace = self.workspaces.create_workspace(&id)?;
        let project = BuildProject::new(
            id.clone(),
            req.description,
            project_type,
            deploy_target,
            req.preferred_stack,
            workspace.to_string_lossy().to_string(),
        );

        self.insert_queued(project).await?;
        self.spawn_pipeline(id.clone(), None);
        Ok(id)
    }

    /// Re-invoke the agent against the existing workspace with a
    /// modification prompt, then re-run the pipeline tail. Valid while
    /// the project is non-terminal or has just completed; status history
    /// is not reset. Also the resume path for parked interactive builds.
    pub async fn modify_existing_project(
        &self,
        project_id: &str,
        change_description: &str,
    ) -> Result<(), BuildError> {
        let project = self.require_project(project_id).await?;
        if matches!(project.status, BuildStatus::Failed | BuildStatus::Cancelled) {
            return Err(BuildError::InvalidState(format!(
                "Cannot modify a {} build",
                project.status
            )));
        }
        // The pipeline task is the sole writer of a project's status. A
        // modification run may only start when no task is driving: either
        // the build completed, or it parked on an interactive session.
        if project.status != BuildStatus::Complete
            && self.sessions.get_session_by_project(project_id).is_none()
        {
            return Err(BuildError::InvalidState(format!(
                "Project {} is actively {}; wait for it to pause or finish",
                project_id, project.status
            )));
        }

        let prompt = prompts::modification_prompt(change_description);
        let this = self.clone();
        let id = project_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = this.resume_pipeline(&id, &prompt).await {
                tracing::error!(project = %id, error = %format!("{:#}", e), "modification run failed");
                this.try_fail(&id, &format!("{:#}", e)).await;
            }
        });
        Ok(())
    }

    /// Cancel a running build: transition to `cancelled`, then kill the
    /// agent process. Returns false when the project already reached a
    /// terminal state — including losing the race with a concurrently
    /// finishing pipeline, which is a no-op, not an error.
    ///
    /// The status write happens before the kill so the pipeline task's
    /// post-run checkpoint deterministically observes the cancellation
    /// rather than racing its own failure write against ours.
    pub async fn cancel_build(&self, project_id: &str) -> Result<bool, BuildError> {
        let project = self.require_project(project_id).await?;
        if project.status.is_terminal() {
            return Ok(false);
        }

        let cancelled = {
            let id = project_id.to_string();
            self.db
                .call(move |db| db.cancel_project(&id))
                .await
                .map_err(BuildError::Database)?
        };

        match cancelled {
            Some(_) => {
                self.agent.cancel(project_id).await;
                self.log_and_publish(project_id, BuildStatus::Cancelled, "Build cancelled")
                    .await
                    .map_err(BuildError::Database)?;
                self.sessions.close_for_project(project_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Create a brand-new project from a failed one: fresh id, fresh
    /// empty workspace, prompt seeded from the original description plus
    /// the failure error plus caller modifications. The source project
    /// row is left untouched as a historical record.
    pub async fn retry_build(
        &self,
        project_id: &str,
        modifications: Option<String>,
    ) -> Result<String, BuildError> {
        let source = self.require_project(project_id).await?;
        if source.status != BuildStatus::Failed {
            return Err(BuildError::InvalidState(format!(
                "Only failed builds can be retried; project {} is {}",
                project_id, source.status
            )));
        }

        let id = Uuid::new_v4().to_string();
        let workspace = self.workspaces.create_workspace(&id)?;
        let project = BuildProject::new(
            id.clone(),
            source.description.clone(),
            source.project_type,
            source.deploy_target,
            source.preferred_stack.clone(),
            workspace.to_string_lossy().to_string(),
        );

        let seed = prompts::retry_prompt(
            &source.description,
            source.error.as_deref().unwrap_or("unknown failure"),
            modifications.as_deref(),
        );

        self.insert_queued(project).await?;
        self.spawn_pipeline(id.clone(), Some(seed));
        Ok(id)
    }

    /// Pure read. Unknown ids yield `project: None`, never an error.
    pub async fn get_project_status(&self, project_id: &str) -> Result<ProjectStatus, BuildError> {
        let id = project_id.to_string();
        let (project, logs) = self
            .db
            .call(move |db| {
                let project = db.get_project(&id)?;
                let logs = db.get_logs(&id)?;
                Ok((project, logs))
            })
            .await
            .map_err(BuildError::Database)?;
        Ok(ProjectStatus { project, logs })
    }

    /// All projects, most recent first.
    pub async fn list_projects(&self) -> Result<Vec<BuildProject>, BuildError> {
        self.db
            .call(|db| db.list_projects())
            .await
            .map_err(BuildError::Database)
    }

    // ── Pipeline internals ───────────────────────────────────────────

    fn spawn_pipeline(&self, project_id: String, prompt_seed: Option<String>) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.run_pipeline(&project_id, prompt_seed).await {
                tracing::error!(project = %project_id, error = %format!("{:#}", e), "pipeline infrastructure failure");
                this.try_fail(&project_id, &format!("{:#}", e)).await;
            }
        });
    }

    /// Fresh pipeline run: planning → building → tail.
    async fn run_pipeline(&self, project_id: &str, prompt_seed: Option<String>) -> Result<()> {
        if matches!(
            self.enter_phase(project_id, BuildStatus::Planning, "Planning project structure")
                .await?,
            Step::Halt
        ) {
            return Ok(());
        }

        let Some(project) = self.get_project(project_id).await? else {
            return Ok(());
        };
        let prompt = prompt_seed.unwrap_or_else(|| {
            prompts::build_prompt(
                &project.description,
                project.project_type,
                project.preferred_stack.as_deref(),
            )
        });
        {
            let id = project_id.to_string();
            let recorded = prompt.clone();
            self.db
                .call(move |db| db.set_build_prompt(&id, &recorded))
                .await?;
        }

        if matches!(
            self.run_building_phase(project_id, &prompt, "Invoking code-generation agent")
                .await?,
            Step::Halt
        ) {
            return Ok(());
        }
        self.finish_pipeline(project_id).await
    }

    /// Resume path: re-enter building with the given prompt, then run the
    /// tail. Used by modification and interactive continuation.
    async fn resume_pipeline(&self, project_id: &str, prompt: &str) -> Result<()> {
        if matches!(
            self.run_building_phase(project_id, prompt, "Resuming build")
                .await?,
            Step::Halt
        ) {
            return Ok(());
        }
        self.finish_pipeline(project_id).await
    }

    /// Enter `building`, run the agent, and resolve its outcome. Parks
    /// the pipeline (without advancing phase) when the agent asks for
    /// input.
    async fn run_building_phase(
        &self,
        project_id: &str,
        prompt: &str,
        entry_message: &str,
    ) -> Result<Step> {
        if matches!(
            self.enter_phase(project_id, BuildStatus::Building, entry_message)
                .await?,
            Step::Halt
        ) {
            return Ok(Step::Halt);
        }
        let Some(project) = self.get_project(project_id).await? else {
            return Ok(Step::Halt);
        };
        self.run_agent(project_id, &project, prompt).await
    }

    /// Pipeline tail shared by fresh and resumed runs:
    /// testing → (deploying | local port) → complete.
    async fn finish_pipeline(&self, project_id: &str) -> Result<()> {
        if matches!(
            self.enter_phase(project_id, BuildStatus::Testing, "Verifying build")
                .await?,
            Step::Halt
        ) {
            return Ok(());
        }
        let Some(project) = self.get_project(project_id).await? else {
            return Ok(());
        };
        let test_prompt = prompts::test_prompt(project.project_type);
        if matches!(
            self.run_agent(project_id, &project, &test_prompt).await?,
            Step::Halt
        ) {
            return Ok(());
        }

        let completion_message = if project.deploy_target == DeployTarget::Localhost {
            // No deploy phase for local targets; assign the dev-server port.
            let port = match project.local_port {
                Some(port) => port,
                None => {
                    let port = self.workspaces.find_free_port(LOCAL_PORT_START)?;
                    let id = project_id.to_string();
                    self.db.call(move |db| db.set_local_port(&id, port)).await?;
                    port
                }
            };
            format!("Build complete; dev server port {}", port)
        } else {
            if matches!(
                self.enter_phase(
                    project_id,
                    BuildStatus::Deploying,
                    &format!("Deploying to {}", project.deploy_target),
                )
                .await?,
                Step::Halt
            ) {
                return Ok(());
            }
            let workspace = PathBuf::from(&project.workspace_path);
            match self.deployer.deploy(&workspace, project.deploy_target).await {
                Ok(outcome) => {
                    let id = project_id.to_string();
                    let url = outcome.url.clone();
                    let production = outcome.production_url.clone();
                    self.db
                        .call(move |db| db.set_deploy_urls(&id, &url, production.as_deref()))
                        .await?;
                    format!("Build complete; deployed to {}", outcome.url)
                }
                Err(e) => {
                    if self.observed_cancelled(project_id).await? {
                        return Ok(());
                    }
                    self.fail_build(project_id, &e.to_string()).await?;
                    return Ok(());
                }
            }
        };

        if matches!(
            self.enter_phase(project_id, BuildStatus::Complete, &completion_message)
                .await?,
            Step::Halt
        ) {
            return Ok(());
        }
        self.sessions.close_for_project(project_id);
        Ok(())
    }

    /// Invoke the agent and resolve its outcome against the current
    /// project state. The post-run cancellation check resolves the
    /// kill-vs-natural-exit race in favour of whatever the status row
    /// already says.
    async fn run_agent(
        &self,
        project_id: &str,
        project: &BuildProject,
        prompt: &str,
    ) -> Result<Step> {
        let workspace = PathBuf::from(&project.workspace_path);
        let outcome = self.agent.run(project_id, &workspace, prompt).await;

        if self.observed_cancelled(project_id).await? {
            return Ok(Step::Halt);
        }

        match outcome {
            Ok(AgentOutcome::Completed { .. }) => Ok(Step::Continue),
            Ok(AgentOutcome::NeedsInput {
                question, options, ..
            }) => {
                let session = self.sessions.create_session(project_id, &question, options);
                let notice = format!("Waiting for input: {}", session.pending_question);
                {
                    let id = project_id.to_string();
                    let message = notice.clone();
                    self.db
                        .call(move |db| db.append_log(&id, "message", &message))
                        .await?;
                }
                self.bus.publish(BuildProgressEvent::message(project_id, &notice));
                tracing::info!(project = project_id, session = %session.id, "pipeline parked for input");
                Ok(Step::Halt)
            }
            Ok(AgentOutcome::Failed { error, .. }) => {
                self.fail_build(project_id, &error).await?;
                Ok(Step::Halt)
            }
            Err(e) => {
                self.fail_build(project_id, &format!("{:#}", e)).await?;
                Ok(Step::Halt)
            }
        }
    }

    /// Persist a phase entry: one status write, one log row, one event.
    /// Halts when the project is gone or was concurrently cancelled or
    /// failed (the pipeline never overwrites a losing race).
    async fn enter_phase(
        &self,
        project_id: &str,
        status: BuildStatus,
        message: &str,
    ) -> Result<Step> {
        let Some(current) = self.get_project(project_id).await? else {
            tracing::warn!(project = project_id, "project row vanished mid-pipeline");
            return Ok(Step::Halt);
        };
        if matches!(current.status, BuildStatus::Cancelled | BuildStatus::Failed) {
            return Ok(Step::Halt);
        }

        {
            let id = project_id.to_string();
            self.db.call(move |db| db.update_status(&id, status)).await?;
        }
        self.log_and_publish(project_id, status, message).await?;
        tracing::info!(project = project_id, phase = status.as_str(), "phase entered");
        Ok(Step::Continue)
    }

    /// Record a failure: conditional `failed` write, then the matching
    /// log entry and event — skipped entirely if the project already
    /// reached a terminal state.
    async fn fail_build(&self, project_id: &str, error: &str) -> Result<()> {
        let failed = {
            let id = project_id.to_string();
            let error = error.to_string();
            self.db.call(move |db| db.fail_project(&id, &error)).await?
        };
        if failed.is_some() {
            self.log_and_publish(project_id, BuildStatus::Failed, error)
                .await?;
            self.sessions.close_for_project(project_id);
            tracing::warn!(project = project_id, error, "build failed");
        }
        Ok(())
    }

    /// Best-effort failure used from spawned-task error paths.
    async fn try_fail(&self, project_id: &str, error: &str) {
        if let Err(e) = self.fail_build(project_id, error).await {
            tracing::error!(project = project_id, error = %format!("{:#}", e), "could not record failure");
        }
    }

    async fn log_and_publish(
        &self,
        project_id: &str,
        status: BuildStatus,
        message: &str,
    ) -> Result<()> {
        {
            let id = project_id.to_string();
            let message = message.to_string();
            self.db
                .call(move |db| db.append_log(&id, status.as_str(), &message))
                .await?;
        }
        self.bus
            .publish(BuildProgressEvent::phase_change(project_id, status, message));
        Ok(())
    }

    async fn insert_queued(&self, project: BuildProject) -> Result<(), BuildError> {
        let id = project.id.clone();
        self.db
            .call(move |db| db.insert_project(&project))
            .await
            .map_err(BuildError::Database)?;
        self.log_and_publish(&id, BuildStatus::Queued, "Build queued")
            .await
            .map_err(BuildError::Database)?;
        Ok(())
    }

    async fn get_project(&self, project_id: &str) -> Result<Option<BuildProject>> {
        let id = project_id.to_string();
        self.db.call(move |db| db.get_project(&id)).await
    }

    async fn require_project(&self, project_id: &str) -> Result<BuildProject, BuildError> {
        self.get_project(project_id)
            .await
            .map_err(BuildError::Database)?
            .ok_or_else(|| BuildError::ProjectNotFound {
                id: project_id.to_string(),
            })
    }

    async fn observed_cancelled(&self, project_id: &str) -> Result<bool> {
        Ok(self
            .get_project(project_id)
            .await?
            .map(|p| p.status == BuildStatus::Cancelled)
            .unwrap_or(true))
    }
}
