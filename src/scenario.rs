//! Scenario trait and execution entry point
//!
//! A scenario is a user-defined program over a session: `init` prepares it,
//! `run` composes session operations, and `call` dispatches the named
//! callbacks that forks and function actions refer to. Referring to
//! callbacks by name keeps forks serializable across worker boundaries.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::config::Config;
use crate::error::ActionError;
use crate::session::{Session, SessionError, SessionResult};
use crate::transport::Transports;
use crate::value::{ActionKey, Value};

/// A user-defined program over a session
#[async_trait]
pub trait Scenario: Send + Sync + 'static {
    /// Module identifier, used in session ids and merged tagging
    fn name(&self) -> &str;

    /// Prepare the fresh session; the default accepts it unchanged
    async fn init(&self, session: Session) -> SessionResult {
        session.ok()
    }

    /// The scenario body; the returned session is final
    async fn run(&self, session: Session) -> Session;

    /// Dispatch a registered callback by name
    ///
    /// Function, fork and loop actions address user code through this hook.
    async fn call(&self, session: Session, name: &str, args: Vec<Value>) -> SessionResult {
        let _ = args;
        let error = ActionError::UnknownCallback(name.to_string());
        session.error(error)
    }
}

/// Run a scenario to completion on a fresh session
///
/// An `init` error is recorded on the session, which is returned without
/// running the body.
pub async fn execute(
    scenario: Arc<dyn Scenario>,
    config: Config,
    transports: Transports,
) -> Session {
    let session = Session::new(scenario.clone(), config, transports);
    debug!(
        "Starting scenario `{}` as session {}",
        scenario.name(),
        session.id()
    );

    let session = match scenario.init(session).await {
        Ok(session) => session,
        Err(err) => {
            let SessionError { mut session, error } = *err;
            error!("Init failed for session {}: {}", session.id(), error);
            session.record_error(ActionKey::Init, error);
            return session;
        }
    };

    let session = scenario.run(session).await;
    debug!("Scenario `{}` finished session {}", scenario.name(), session.id());
    session
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock;
    use crate::value::MetricKey;

    struct Pinger;

    #[async_trait]
    impl Scenario for Pinger {
        fn name(&self) -> &str {
            "pinger"
        }

        async fn init(&self, session: Session) -> SessionResult {
            session.assign("ready", true).ok()
        }

        async fn run(&self, session: Session) -> Session {
            session.get("/ping").await
        }
    }

    struct BrokenInit;

    #[async_trait]
    impl Scenario for BrokenInit {
        fn name(&self) -> &str {
            "broken_init"
        }

        async fn init(&self, session: Session) -> SessionResult {
            session.error(ActionError::Callback("no fixtures".to_string()))
        }

        async fn run(&self, session: Session) -> Session {
            session.get("/never").await
        }
    }

    #[tokio::test]
    async fn test_execute_runs_init_then_run() {
        let session = execute(Arc::new(Pinger), Config::new(), mock::http_only()).await;

        assert!(session.id().starts_with("pinger "));
        assert_eq!(session.get_assign("ready"), Some(&Value::Bool(true)));
        assert!(session
            .get_metric(&MetricKey::Http {
                path: "/ping".to_string()
            })
            .is_some());
    }

    #[tokio::test]
    async fn test_init_error_skips_run() {
        let session = execute(Arc::new(BrokenInit), Config::new(), mock::http_only()).await;

        assert!(session.get_error(&ActionKey::Init).is_some());
        assert!(session.results().is_empty());
    }
}
