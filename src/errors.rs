//! Typed error hierarchy for the foundry orchestrator.
//!
//! `BuildError` covers every failure a caller of the orchestrator can
//! observe synchronously. Failures inside the asynchronous pipeline are
//! never surfaced through this type to the `start_build` caller; they are
//! recorded on the project row and published as a `failed` progress event.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Invalid {field}: '{value}'")]
    Validation { field: &'static str, value: String },

    #[error("Project {id} not found")]
    ProjectNotFound { id: String },

    #[error("Session {id} not found")]
    SessionNotFound { id: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Agent failed: {0}")]
    Agent(String),

    #[error("Deploy failed: {0}")]
    Deploy(String),

    #[error("Workspace I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Lock poisoned")]
    LockPoisoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_names_field_and_value() {
        let err = BuildError::Validation {
            field: "project_type",
            value: "mainframe".into(),
        };
        assert!(err.to_string().contains("project_type"));
        assert!(err.to_string().contains("mainframe"));
    }

    #[test]
    fn project_not_found_carries_id() {
        let err = BuildError::ProjectNotFound { id: "p-123".into() };
        match &err {
            BuildError::ProjectNotFound { id } => assert_eq!(id, "p-123"),
            _ => panic!("Expected ProjectNotFound"),
        }
        assert!(err.to_string().contains("p-123"));
    }

    #[test]
    fn io_error_converts_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: BuildError = io_err.into();
        match &err {
            BuildError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::PermissionDenied),
            _ => panic!("Expected Io variant"),
        }
    }

    #[test]
    fn variants_are_distinct() {
        let agent = BuildError::Agent("exit 1".into());
        let deploy = BuildError::Deploy("exit 1".into());
        assert!(matches!(agent, BuildError::Agent(_)));
        assert!(!matches!(agent, BuildError::Deploy(_)));
        assert!(matches!(deploy, BuildError::Deploy(_)));
    }

    #[test]
    fn all_variants_implement_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&BuildError::LockPoisoned);
        assert_std_error(&BuildError::InvalidState("already complete".into()));
    }
}
