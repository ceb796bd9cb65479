//! Error types for the execution engine
//!
//! Defines the action-level and worker-level error taxonomy.

use thiserror::Error;

/// Errors produced by running a single action against a session
#[derive(Error, Clone, Debug, PartialEq)]
pub enum ActionError {
    #[error("Request failed: {0}")]
    Http(String),

    #[error("Request timed out after {0} ms")]
    HttpTimeout(u64),

    #[error("Connection refused to {0}")]
    ConnectionRefused(String),

    #[error("WebSocket error: {0}")]
    Ws(String),

    #[error("WebSocket already connected")]
    WsAlreadyConnected,

    #[error("WebSocket not connected")]
    WsNotConnected,

    #[error("WebSocket receive timed out")]
    WsRecvTimeout,

    #[error("Unknown callback `{0}`")]
    UnknownCallback(String),

    #[error("Callback failed: {0}")]
    Callback(String),

    #[error("Timed out joining task `{0}`")]
    JoinTimeout(String),

    #[error("Forked task panicked: {0}")]
    TaskPanic(String),

    #[error("Scenario init failed: {0}")]
    Init(String),
}

impl ActionError {
    /// True for the join-timeout error recorded under the synthetic `await` key
    pub fn is_join_timeout(&self) -> bool {
        matches!(self, ActionError::JoinTimeout(_))
    }
}

/// Errors that resolve a worker handle instead of a final session
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Scenario `{scenario}` exceeded its timeout of {timeout_ms} ms")]
    ScenarioTimeout { scenario: String, timeout_ms: u64 },

    #[error("Worker for `{scenario}` panicked: {message}")]
    Panic { scenario: String, message: String },

    #[error("Environment shut down before `{scenario}` completed")]
    EnvironmentShutdown { scenario: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_error_display() {
        let err = ActionError::JoinTimeout("work".to_string());
        assert_eq!(err.to_string(), "Timed out joining task `work`");
        assert!(err.is_join_timeout());
        assert!(!ActionError::WsRecvTimeout.is_join_timeout());
    }

    #[test]
    fn test_worker_error_display() {
        let err = WorkerError::ScenarioTimeout {
            scenario: "checkout".to_string(),
            timeout_ms: 5000,
        };
        assert!(err.to_string().contains("checkout"));
        assert!(err.to_string().contains("5000"));
    }
}
