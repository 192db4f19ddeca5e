use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use super::models::{InteractiveSession, SessionStatus, now};
use crate::errors::BuildError;

/// Tracks agent runs paused mid-execution waiting for a human answer.
///
/// An explicit registry object with process lifetime, shared by `Arc`.
/// At most one non-closed session exists per project; the orchestrator
/// decides when sessions are created and closed, this type only holds
/// their state.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, InteractiveSession>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Create a session for a paused run. Any prior non-closed session
    /// for the project is closed first.
    pub fn create_session(
        &self,
        project_id: &str,
        question: &str,
        options: Vec<String>,
    ) -> InteractiveSession {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        for session in sessions.values_mut() {
            if session.project_id == project_id && session.status != SessionStatus::Closed {
                session.status = SessionStatus::Closed;
            }
        }
        let session = InteractiveSession {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            status: SessionStatus::WaitingForInput,
            pending_question: question.to_string(),
            pending_options: options,
            created_at: now(),
        };
        sessions.insert(session.id.clone(), session.clone());
        session
    }

    pub fn get_session(&self, session_id: &str) -> Option<InteractiveSession> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(session_id).cloned()
    }

    /// The project's active session (waiting or answered), if any.
    pub fn get_session_by_project(&self, project_id: &str) -> Option<InteractiveSession> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .values()
            .find(|s| s.project_id == project_id && s.status != SessionStatus::Closed)
            .cloned()
    }

    /// Record the human answer: `waiting_for_input -> answered`.
    pub fn add_user_response(
        &self,
        session_id: &str,
        _response: &str,
    ) -> Result<InteractiveSession, BuildError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| BuildError::SessionNotFound {
                id: session_id.to_string(),
            })?;
        if session.status != SessionStatus::WaitingForInput {
            return Err(BuildError::InvalidState(format!(
                "Session {} is {}, not waiting for input",
                session_id, session.status
            )));
        }
        session.status = SessionStatus::Answered;
        Ok(session.clone())
    }

    /// Deterministically compose the prompt that resumes the agent on the
    /// same workspace, embedding the original question and the answer.
    pub fn continuation_prompt(
        &self,
        session_id: &str,
        response: &str,
    ) -> Result<String, BuildError> {
        let session = self
            .get_session(session_id)
            .ok_or_else(|| BuildError::SessionNotFound {
                id: session_id.to_string(),
            })?;
        Ok(format!(
            "Continue building the project in this workspace.\n\n\
             You previously paused and asked:\n{}\n\n\
             The user answered:\n{}\n\n\
             Apply the answer and carry on from where you left off.",
            session.pending_question, response
        ))
    }

    /// Close the project's active session, if any. Called by the
    /// orchestrator when a run reaches a terminal phase.
    pub fn close_for_project(&self, project_id: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        for session in sessions.values_mut() {
            if session.project_id == project_id {
                session.status = SessionStatus::Closed;
            }
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
