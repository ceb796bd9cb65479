//! Session execution engine for distributed load generation
//!
//! Scenarios are user programs over a [`Session`]: a scripted sequence of
//! HTTP, WebSocket and user-function actions, with forked child sessions
//! whose results and metrics are merged back at join time. An
//! [`Environment`] fans scenarios out across concurrent workers and
//! aggregates the completed sessions into a [`Results`] record.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use stampede::{Config, Environment, Scenario, Session, SessionResult, Value};
//!
//! struct Browse;
//!
//! #[async_trait]
//! impl Scenario for Browse {
//!     fn name(&self) -> &str {
//!         "browse"
//!     }
//!
//!     async fn run(&self, session: Session) -> Session {
//!         session
//!             .get("/")
//!             .await
//!             .cc_spread("visit", 10, Duration::from_secs(1))
//!             .await
//!             .await_tasks("visit")
//!             .await
//!     }
//!
//!     async fn call(&self, session: Session, name: &str, _args: Vec<Value>) -> SessionResult {
//!         match name {
//!             "visit" => session.get("/item").await.ok(),
//!             _ => session.ok(),
//!         }
//!     }
//! }
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let results = Environment::new("storefront")
//!     .default_config(Config::new().with_base_url("http://localhost:8080"))
//!     .add_concurrent_run(50, Arc::new(Browse), Config::new())
//!     .run()
//!     .await?;
//! println!("{} sessions completed", results.sessions.len());
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod config;
pub mod environment;
pub mod error;
pub mod merge;
pub mod report;
pub mod scenario;
pub mod session;
pub mod transport;
pub mod util;
pub mod value;
pub mod worker;

pub use action::{Action, Callback, HttpOptions};
pub use config::{Config, Timeout, DEFAULT_TIMEOUT_MS};
pub use environment::{Environment, Results, ResultsRecord};
pub use error::{ActionError, WorkerError};
pub use report::{LatencyStats, Percentiles, RunSummary};
pub use scenario::{execute, Scenario};
pub use session::{JoinTarget, Session, SessionError, SessionRecord, SessionResult, TaskHandle};
pub use transport::{
    HttpRequest, HttpResponse, HttpTransport, Method, Transports, WsConnection, WsFrame,
    WsTransport,
};
pub use value::{ActionKey, MetricKey, TaggedKey, Value};
pub use worker::{Worker, WorkerHandle};
