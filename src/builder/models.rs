use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// RFC 3339 UTC timestamp with millisecond precision.
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    WebApp,
    Api,
    Cli,
    Library,
    FullStack,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebApp => "web_app",
            Self::Api => "api",
            Self::Cli => "cli",
            Self::Library => "library",
            Self::FullStack => "full_stack",
        }
    }
}

impl std::fmt::Display for ProjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web_app" => Ok(Self::WebApp),
            "api" => Ok(Self::Api),
            "cli" => Ok(Self::Cli),
            "library" => Ok(Self::Library),
            "full_stack" => Ok(Self::FullStack),
            _ => Err(format!("Invalid project type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeployTarget {
    Localhost,
    Vercel,
    Netlify,
    Fly,
}

impl DeployTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Localhost => "localhost",
            Self::Vercel => "vercel",
            Self::Netlify => "netlify",
            Self::Fly => "fly",
        }
    }
}

impl std::fmt::Display for DeployTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeployTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "localhost" => Ok(Self::Localhost),
            "vercel" => Ok(Self::Vercel),
            "netlify" => Ok(Self::Netlify),
            "fly" => Ok(Self::Fly),
            _ => Err(format!("Invalid deploy target: {}", s)),
        }
    }
}

/// Phase enumeration of the build pipeline. Transitions are monotonic
/// forward; `Complete`, `Failed`, and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Queued,
    Planning,
    Building,
    Testing,
    Deploying,
    Complete,
    Failed,
    Cancelled,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Planning => "planning",
            Self::Building => "building",
            Self::Testing => "testing",
            Self::Deploying => "deploying",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    /// A build can be cancelled from any state prior to a terminal one.
    pub fn is_cancellable(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "planning" => Ok(Self::Planning),
            "building" => Ok(Self::Building),
            "testing" => Ok(Self::Testing),
            "deploying" => Ok(Self::Deploying),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid build status: {}", s)),
        }
    }
}

/// The unit of work: one user-requested project build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildProject {
    pub id: String,
    pub description: String,
    pub project_type: ProjectType,
    pub status: BuildStatus,
    pub workspace_path: String,
    pub preferred_stack: Option<String>,
    pub deploy_target: DeployTarget,
    pub local_port: Option<u16>,
    pub deploy_url: Option<String>,
    pub production_url: Option<String>,
    pub error: Option<String>,
    pub build_prompt: Option<String>,
    pub commit_sha: Option<String>,
    pub github_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl BuildProject {
    pub fn new(
        id: String,
        description: String,
        project_type: ProjectType,
        deploy_target: DeployTarget,
        preferred_stack: Option<String>,
        workspace_path: String,
    ) -> Self {
        let ts = now();
        Self {
            id,
            description,
            project_type,
            status: BuildStatus::Queued,
            workspace_path,
            preferred_stack,
            deploy_target,
            local_port: None,
            deploy_url: None,
            production_url: None,
            error: None,
            build_prompt: None,
            commit_sha: None,
            github_url: None,
            created_at: ts.clone(),
            updated_at: ts,
        }
    }
}

/// Immutable append-only audit trail row. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildLogEntry {
    pub id: i64,
    pub project_id: String,
    pub phase: String,
    pub message: String,
    pub timestamp: String,
}

/// Transient progress notification broadcast on the event bus.
/// Not persisted; late subscribers only ever see the `connected` ack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildProgressEvent {
    pub project_id: String,
    pub phase: String,
    pub message: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

impl BuildProgressEvent {
    /// Event marking entry into a pipeline phase.
    pub fn phase_change(project_id: &str, status: BuildStatus, message: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            phase: status.as_str().to_string(),
            message: message.to_string(),
            timestamp: now(),
            progress: None,
        }
    }

    /// Mid-phase message (agent output chunks, waiting-for-input notices).
    /// Not a phase transition; carries the `message` phase marker.
    pub fn message(project_id: &str, message: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            phase: "message".to_string(),
            message: message.to_string(),
            timestamp: now(),
            progress: None,
        }
    }

    /// Acknowledgment synthesized for each new subscriber.
    pub fn connected(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            phase: "connected".to_string(),
            message: "Subscribed to build progress".to_string(),
            timestamp: now(),
            progress: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    WaitingForInput,
    Answered,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingForInput => "waiting_for_input",
            Self::Answered => "answered",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting_for_input" => Ok(Self::WaitingForInput),
            "answered" => Ok(Self::Answered),
            "closed" => Ok(Self::Closed),
            _ => Err(format!("Invalid session status: {}", s)),
        }
    }
}

/// Record of an agent run paused awaiting a human answer.
/// At most one non-closed session exists per project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractiveSession {
    pub id: String,
    pub project_id: String,
    pub status: SessionStatus,
    pub pending_question: String,
    pub pending_options: Vec<String>,
    pub created_at: String,
}

/// Incoming build request. Enumerated fields arrive as strings and are
/// validated against the fixed enumerations before any state is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    pub description: String,
    pub project_type: String,
    #[serde(default)]
    pub preferred_stack: Option<String>,
    #[serde(default)]
    pub deploy_target: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_type_roundtrip() {
        for s in &["web_app", "api", "cli", "library", "full_stack"] {
            let parsed: ProjectType = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("desktop".parse::<ProjectType>().is_err());
    }

    #[test]
    fn test_deploy_target_roundtrip() {
        for s in &["localhost", "vercel", "netlify", "fly"] {
            let parsed: DeployTarget = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("heroku".parse::<DeployTarget>().is_err());
    }

    #[test]
    fn test_build_status_roundtrip() {
        for s in &[
            "queued",
            "planning",
            "building",
            "testing",
            "deploying",
            "complete",
            "failed",
            "cancelled",
        ] {
            let parsed: BuildStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<BuildStatus>().is_err());
    }

    #[test]
    fn test_session_status_roundtrip() {
        for s in &["waiting_for_input", "answered", "closed"] {
            let parsed: SessionStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("open".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(BuildStatus::Complete.is_terminal());
        assert!(BuildStatus::Failed.is_terminal());
        assert!(BuildStatus::Cancelled.is_terminal());
        for s in &[
            BuildStatus::Queued,
            BuildStatus::Planning,
            BuildStatus::Building,
            BuildStatus::Testing,
            BuildStatus::Deploying,
        ] {
            assert!(!s.is_terminal());
            assert!(s.is_cancellable());
        }
        assert!(!BuildStatus::Complete.is_cancellable());
    }

    #[test]
    fn test_serde_produces_snake_case_strings() {
        assert_eq!(
            serde_json::to_string(&BuildStatus::Building).unwrap(),
            "\"building\""
        );
        assert_eq!(
            serde_json::to_string(&ProjectType::FullStack).unwrap(),
            "\"full_stack\""
        );
        assert_eq!(
            serde_json::to_string(&SessionStatus::WaitingForInput).unwrap(),
            "\"waiting_for_input\""
        );
        assert_eq!(
            serde_json::from_str::<DeployTarget>("\"vercel\"").unwrap(),
            DeployTarget::Vercel
        );
    }

    #[test]
    fn test_new_project_starts_queued() {
        let project = BuildProject::new(
            "p1".into(),
            "todo app".into(),
            ProjectType::WebApp,
            DeployTarget::Localhost,
            None,
            "/tmp/p1".into(),
        );
        assert_eq!(project.status, BuildStatus::Queued);
        assert_eq!(project.created_at, project.updated_at);
        assert!(project.error.is_none());
        assert!(project.local_port.is_none());
    }

    #[test]
    fn test_progress_event_phase_matches_status() {
        let event = BuildProgressEvent::phase_change("p1", BuildStatus::Planning, "Planning");
        assert_eq!(event.phase, "planning");
        assert_eq!(event.project_id, "p1");
        assert!(event.progress.is_none());
    }

    #[test]
    fn test_connected_event_shape() {
        let event = BuildProgressEvent::connected("p1");
        assert_eq!(event.phase, "connected");
        let json = serde_json::to_string(&event).unwrap();
        // progress is omitted when unset
        assert!(!json.contains("progress"));
    }

    #[test]
    fn test_build_request_optional_fields_default() {
        let req: BuildRequest = serde_json::from_str(
            r#"{"description": "todo app", "project_type": "web_app"}"#,
        )
        .unwrap();
        assert!(req.preferred_stack.is_none());
        assert!(req.deploy_target.is_none());
    }
}
