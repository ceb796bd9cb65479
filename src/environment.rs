//! Environment batches
//!
//! An environment is the top-level batch: an ordered list of run specs
//! (scenario × concurrency × config) over a default config. Running one
//! starts every worker, awaits them under the batch timeout policy and
//! returns a `Results` aggregate of the completed sessions.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

use crate::config::{Config, Timeout};
use crate::merge;
use crate::scenario::Scenario;
use crate::session::{Session, SessionRecord};
use crate::transport::Transports;
use crate::worker::{Worker, WorkerHandle};

/// One entry in an environment's scenario list
struct RunSpec {
    scenario: Arc<dyn Scenario>,
    concurrency: usize,
    name: Option<String>,
    config: Config,
}

/// A batch of scenarios to run against a target
pub struct Environment {
    name: String,
    default_config: Config,
    runs: Vec<RunSpec>,
    transports: Option<Transports>,
}

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_config: Config::new(),
            runs: Vec::new(),
            transports: None,
        }
    }

    /// Base config every run spec is overlaid onto
    pub fn default_config(mut self, config: Config) -> Self {
        self.default_config = config;
        self
    }

    /// Replace the default reqwest/tungstenite transports
    pub fn with_transports(mut self, transports: Transports) -> Self {
        self.transports = Some(transports);
        self
    }

    /// Register a scenario with one worker
    pub fn add_run(self, scenario: Arc<dyn Scenario>, config: Config) -> Self {
        self.add_spec(scenario, 1, None, config)
    }

    /// Register a scenario under an explicit session name
    pub fn add_named_run(
        self,
        scenario: Arc<dyn Scenario>,
        name: impl Into<String>,
        config: Config,
    ) -> Self {
        self.add_spec(scenario, 1, Some(name.into()), config)
    }

    /// Register a scenario with a concurrency multiplier
    pub fn add_concurrent_run(
        self,
        concurrency: usize,
        scenario: Arc<dyn Scenario>,
        config: Config,
    ) -> Self {
        self.add_spec(scenario, concurrency, None, config)
    }

    /// Register a named scenario with a concurrency multiplier
    pub fn add_concurrent_named_run(
        self,
        concurrency: usize,
        scenario: Arc<dyn Scenario>,
        name: impl Into<String>,
        config: Config,
    ) -> Self {
        self.add_spec(scenario, concurrency, Some(name.into()), config)
    }

    fn add_spec(
        mut self,
        scenario: Arc<dyn Scenario>,
        concurrency: usize,
        name: Option<String>,
        config: Config,
    ) -> Self {
        self.runs.push(RunSpec {
            scenario,
            concurrency,
            name,
            config,
        });
        self
    }

    /// The batch-wide cap from `environment_timeout`, unbounded by default
    pub fn timeout(&self) -> Timeout {
        self.default_config.environment_timeout()
    }

    /// Run the whole batch and aggregate the completed sessions
    pub async fn run(self) -> Result<Results> {
        let environment = self.name.clone();
        let env_timeout = self.timeout();
        let start_ms = Utc::now().timestamp_millis();

        info!(
            "Starting environment `{}` with {} run specs",
            environment,
            self.runs.len()
        );

        let handles = self.start_workers_with_config()?;
        let total = handles.len();
        let sessions = await_workers(handles, env_timeout).await;

        let end_ms = Utc::now().timestamp_millis();
        info!(
            "Environment `{}` finished: {}/{} sessions completed in {}ms",
            environment,
            sessions.len(),
            total,
            end_ms - start_ms
        );

        Ok(Results {
            environment,
            start_ms,
            end_ms,
            duration_ms: (end_ms - start_ms).max(0) as u64,
            sessions,
        })
    }

    /// Flatten the run specs into started workers, honoring concurrency
    ///
    /// Per-spec config precedence is left to right: default, then the spec
    /// name as `session_name`, then the spec config.
    pub fn start_workers_with_config(self) -> Result<Vec<WorkerHandle>> {
        let transports = match self.transports {
            Some(transports) => transports,
            None => Transports::default_stack()?,
        };

        let mut handles = Vec::new();
        for spec in self.runs {
            let mut config = self.default_config.clone();
            if let Some(name) = spec.name {
                config = config.with_session_name(name);
            }
            let config = config.merged(&spec.config);

            handles.extend(Worker::start_many(
                spec.concurrency,
                spec.scenario,
                config,
                transports.clone(),
            ));
        }

        Ok(handles)
    }
}

/// Join every worker under the batch timeout policy
///
/// The bound is the maximum of the per-pair `scenario_timeout`s (any
/// `infinity`, or none specified, means unbounded), capped by the
/// environment timeout. Workers that miss the bound are killed and their
/// slots are simply missing from the result.
pub async fn await_workers(handles: Vec<WorkerHandle>, env_timeout: Timeout) -> Vec<Session> {
    let mut any_specified = false;
    let mut any_infinite = false;
    let mut max_finite = None;

    for handle in &handles {
        match handle.config().scenario_timeout() {
            Some(Timeout::Infinity) => {
                any_specified = true;
                any_infinite = true;
            }
            Some(Timeout::Finite(d)) => {
                any_specified = true;
                max_finite = Some(max_finite.map_or(d, |m: std::time::Duration| m.max(d)));
            }
            None => {}
        }
    }

    let max_timeout = match (any_specified, any_infinite, max_finite) {
        (true, false, Some(max)) => Timeout::Finite(max),
        _ => Timeout::Infinity,
    };

    let bound = match (max_timeout, env_timeout) {
        (Timeout::Finite(a), Timeout::Finite(b)) => Timeout::Finite(a.min(b)),
        (Timeout::Finite(a), Timeout::Infinity) => Timeout::Finite(a),
        (Timeout::Infinity, Timeout::Finite(b)) => Timeout::Finite(b),
        (Timeout::Infinity, Timeout::Infinity) => Timeout::Infinity,
    };

    let mut sessions = Vec::new();

    match bound {
        Timeout::Infinity => {
            for handle in handles {
                match handle.join().await {
                    Ok(session) => sessions.push(session),
                    Err(e) => error!("{}", e),
                }
            }
        }
        Timeout::Finite(limit) => {
            let deadline = Instant::now() + limit;
            for handle in handles {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    error!("{}", handle.shutdown());
                    continue;
                }

                let own = handle
                    .config()
                    .scenario_timeout()
                    .and_then(|t| t.as_duration());
                let cap = own.map_or(remaining, |d| d.min(remaining));

                match handle.join_within(Timeout::Finite(cap)).await {
                    Ok(session) => sessions.push(session),
                    Err(e) => error!("{}", e),
                }
            }
        }
    }

    sessions
}

/// The aggregate outcome of one environment run
pub struct Results {
    pub environment: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub duration_ms: u64,
    pub sessions: Vec<Session>,
}

impl Results {
    /// Fold all completed sessions into one, tagged by session name
    pub fn into_merged(self) -> Option<Session> {
        merge::merge_sessions(self.sessions)
    }

    /// Serializable snapshot for external reporters
    pub fn record(&self) -> ResultsRecord {
        ResultsRecord {
            environment: self.environment.clone(),
            start_ms: self.start_ms,
            end_ms: self.end_ms,
            duration_ms: self.duration_ms,
            sessions: self.sessions.iter().map(Session::record).collect(),
        }
    }
}

/// `Results` with sessions snapshotted for serialization
#[derive(Clone, Debug, Serialize)]
pub struct ResultsRecord {
    pub environment: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub duration_ms: u64,
    pub sessions: Vec<SessionRecord>,
}
