//! Worker supervision
//!
//! A worker runs exactly one scenario to completion on its own task and
//! resolves to the final session, a timeout, or a panic. Workers never
//! affect their peers.

use std::sync::Arc;

use tokio::time::timeout;
use tracing::info;

use crate::config::{Config, Timeout};
use crate::error::WorkerError;
use crate::scenario::{self, Scenario};
use crate::session::Session;
use crate::transport::Transports;

/// Spawns supervised scenario executions
pub struct Worker;

impl Worker {
    /// Start one scenario asynchronously and return a joinable handle
    pub fn start(
        scenario: Arc<dyn Scenario>,
        config: Config,
        transports: Transports,
    ) -> WorkerHandle {
        let scenario_name = scenario.name().to_string();
        let handle = tokio::spawn(scenario::execute(scenario, config.clone(), transports));

        WorkerHandle {
            scenario_name,
            config,
            handle,
        }
    }

    /// Start `concurrency` independent workers for the same scenario
    pub fn start_many(
        concurrency: usize,
        scenario: Arc<dyn Scenario>,
        config: Config,
        transports: Transports,
    ) -> Vec<WorkerHandle> {
        info!(
            "Starting {} workers for scenario `{}`",
            concurrency,
            scenario.name()
        );

        (0..concurrency)
            .map(|_| Worker::start(scenario.clone(), config.clone(), transports.clone()))
            .collect()
    }
}

/// A joinable handle to a running worker
pub struct WorkerHandle {
    scenario_name: String,
    config: Config,
    handle: tokio::task::JoinHandle<Session>,
}

impl WorkerHandle {
    pub fn scenario_name(&self) -> &str {
        &self.scenario_name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Join with this worker's own `scenario_timeout`, unbounded by default
    pub async fn join(self) -> Result<Session, WorkerError> {
        let limit = self.config.scenario_timeout().unwrap_or(Timeout::Infinity);
        self.join_within(limit).await
    }

    /// Join under an explicit limit; on expiry the worker is killed
    pub async fn join_within(self, limit: Timeout) -> Result<Session, WorkerError> {
        let WorkerHandle {
            scenario_name,
            handle,
            ..
        } = self;

        match limit {
            Timeout::Infinity => handle.await.map_err(|e| WorkerError::Panic {
                scenario: scenario_name,
                message: e.to_string(),
            }),
            Timeout::Finite(limit) => {
                let abort = handle.abort_handle();
                match timeout(limit, handle).await {
                    Ok(Ok(session)) => Ok(session),
                    Ok(Err(e)) => Err(WorkerError::Panic {
                        scenario: scenario_name,
                        message: e.to_string(),
                    }),
                    Err(_) => {
                        abort.abort();
                        Err(WorkerError::ScenarioTimeout {
                            scenario: scenario_name,
                            timeout_ms: limit.as_millis() as u64,
                        })
                    }
                }
            }
        }
    }

    /// Kill the worker as part of an environment-wide shutdown
    pub fn shutdown(self) -> WorkerError {
        self.handle.abort();
        WorkerError::EnvironmentShutdown {
            scenario: self.scenario_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock;
    use async_trait::async_trait;
    use std::time::{Duration, Instant};

    struct Quick;

    #[async_trait]
    impl Scenario for Quick {
        fn name(&self) -> &str {
            "quick"
        }

        async fn run(&self, session: Session) -> Session {
            session.get("/ping").await
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Scenario for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        async fn run(&self, session: Session) -> Session {
            session.delay(Duration::from_secs(2)).await
        }
    }

    struct Crashy;

    #[async_trait]
    impl Scenario for Crashy {
        fn name(&self) -> &str {
            "crashy"
        }

        async fn run(&self, _session: Session) -> Session {
            panic!("scripted crash")
        }
    }

    #[tokio::test]
    async fn test_worker_runs_scenario_to_completion() {
        let handle = Worker::start(Arc::new(Quick), Config::new(), mock::http_only());
        let session = handle.join().await.unwrap();

        assert!(session.id().starts_with("quick "));
        assert_eq!(session.results().len(), 1);
    }

    #[tokio::test]
    async fn test_scenario_timeout_kills_worker() {
        let config = Config::new().with_scenario_timeout(Timeout::from_millis(50));
        let handle = Worker::start(Arc::new(Sleepy), config, mock::http_only());

        let start = Instant::now();
        let result = handle.join().await;
        assert!(start.elapsed() < Duration::from_millis(500));

        match result {
            Err(WorkerError::ScenarioTimeout { scenario, .. }) => assert_eq!(scenario, "sleepy"),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected a timeout"),
        }
    }

    #[tokio::test]
    async fn test_panicking_worker_resolves_to_error() {
        let handle = Worker::start(Arc::new(Crashy), Config::new(), mock::http_only());

        match handle.join().await {
            Err(WorkerError::Panic { scenario, .. }) => assert_eq!(scenario, "crashy"),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected a panic"),
        }
    }

    #[tokio::test]
    async fn test_start_many_spawns_concurrency_workers() {
        let handles = Worker::start_many(3, Arc::new(Quick), Config::new(), mock::http_only());
        assert_eq!(handles.len(), 3);

        for handle in handles {
            assert!(handle.join().await.is_ok());
        }
    }
}
