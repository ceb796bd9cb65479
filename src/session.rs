//! Session state and operations
//!
//! A session is the mutable execution context threaded through a scenario:
//! identity, config, user assigns, per-action results, per-name metrics,
//! live forked tasks and accumulated errors. A session is owned by exactly
//! one executing task at a time; forks get independent child sessions whose
//! state is merged back at join time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error};
use uuid::Uuid;

use crate::action::{Action, Callback, HttpOptions};
use crate::config::Config;
use crate::error::ActionError;
use crate::merge;
use crate::scenario::Scenario;
use crate::transport::{Method, Transports, WsConnection, WsFrame};
use crate::value::{ActionKey, MetricKey, Value};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// A joinable handle to a forked child session
///
/// Dropping an unjoined handle aborts the fork, so killing a scenario
/// releases everything it spawned.
pub struct TaskHandle {
    id: u64,
    name: String,
    inner: Option<JoinHandle<Session>>,
}

impl TaskHandle {
    pub(crate) fn new(name: String, handle: JoinHandle<Session>) -> Self {
        Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            name,
            inner: Some(handle),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn take(mut self) -> JoinHandle<Session> {
        self.inner.take().expect("task handle already joined")
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if let Some(handle) = &self.inner {
            handle.abort();
        }
    }
}

/// The error envelope of a failed action, still carrying the session
pub struct SessionError {
    pub session: Session,
    pub error: ActionError,
}

/// The uniform result envelope produced by running an action
pub type SessionResult = Result<Session, Box<SessionError>>;

/// What `await_tasks` joins: a task name, several names, or a single handle
pub enum JoinTarget {
    Name(String),
    Names(Vec<String>),
    Handle(TaskHandle),
}

impl From<&str> for JoinTarget {
    fn from(name: &str) -> Self {
        JoinTarget::Name(name.to_string())
    }
}

impl From<String> for JoinTarget {
    fn from(name: String) -> Self {
        JoinTarget::Name(name)
    }
}

impl From<Vec<String>> for JoinTarget {
    fn from(names: Vec<String>) -> Self {
        JoinTarget::Names(names)
    }
}

impl From<Vec<&str>> for JoinTarget {
    fn from(names: Vec<&str>) -> Self {
        JoinTarget::Names(names.into_iter().map(String::from).collect())
    }
}

impl From<TaskHandle> for JoinTarget {
    fn from(task: TaskHandle) -> Self {
        JoinTarget::Handle(task)
    }
}

struct WsHandle {
    path: String,
    conn: Box<dyn WsConnection>,
}

/// The mutable execution context of one scenario instance
pub struct Session {
    id: String,
    scenario: Arc<dyn Scenario>,
    config: Config,
    assigns: HashMap<String, Value>,
    pub(crate) results: HashMap<ActionKey, Vec<Value>>,
    pub(crate) metrics: HashMap<MetricKey, Vec<Value>>,
    errors: HashMap<ActionKey, ActionError>,
    async_tasks: HashMap<String, Vec<TaskHandle>>,
    transports: Transports,
    ws_conn: Option<WsHandle>,
}

impl Session {
    /// Create a fresh session owned by the given scenario
    pub fn new(scenario: Arc<dyn Scenario>, config: Config, transports: Transports) -> Self {
        let id = format!("{} {}", scenario.name(), Uuid::new_v4());
        Self {
            id,
            scenario,
            config,
            assigns: HashMap::new(),
            results: HashMap::new(),
            metrics: HashMap::new(),
            errors: HashMap::new(),
            async_tasks: HashMap::new(),
            transports,
            ws_conn: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Logical name: the `session_name` config key, or the scenario name
    pub fn name(&self) -> &str {
        self.config
            .session_name()
            .unwrap_or_else(|| self.scenario.name())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scenario(&self) -> Arc<dyn Scenario> {
        self.scenario.clone()
    }

    pub(crate) fn transports(&self) -> &Transports {
        &self.transports
    }

    /// Per-action and per-join cap from config, 10 s by default
    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    /// Wrap into the success envelope
    pub fn ok(self) -> SessionResult {
        Ok(self)
    }

    /// Wrap into the error envelope
    pub fn error(self, error: ActionError) -> SessionResult {
        Err(Box::new(SessionError {
            session: self,
            error,
        }))
    }

    // ---- assigns ----

    /// Set a user value, overwriting any previous one
    pub fn assign(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.assigns.insert(key.into(), value.into());
        self
    }

    /// Replace a user value with a function of its current value
    pub fn update_assign(mut self, key: &str, f: impl FnOnce(Value) -> Value) -> Self {
        let current = self.assigns.remove(key).unwrap_or(Value::Null);
        self.assigns.insert(key.to_string(), f(current));
        self
    }

    pub fn get_assign(&self, key: &str) -> Option<&Value> {
        self.assigns.get(key)
    }

    // ---- results, metrics, errors ----

    /// Record a result under an action key, newest first
    pub fn add_result(&mut self, key: ActionKey, value: Value) {
        merge::coalesce(&mut self.results, key, value);
    }

    /// Record a metric sample under a metric key, newest first
    pub fn add_metric(&mut self, key: MetricKey, value: Value) {
        merge::coalesce(&mut self.metrics, key, value);
    }

    pub(crate) fn record_error(&mut self, key: ActionKey, error: ActionError) {
        self.errors.insert(key, error);
    }

    pub fn results(&self) -> &HashMap<ActionKey, Vec<Value>> {
        &self.results
    }

    pub fn metrics(&self) -> &HashMap<MetricKey, Vec<Value>> {
        &self.metrics
    }

    pub fn errors(&self) -> &HashMap<ActionKey, ActionError> {
        &self.errors
    }

    pub fn get_result(&self, key: &ActionKey) -> Option<&[Value]> {
        self.results.get(key).map(Vec::as_slice)
    }

    /// Newest value under an action key
    pub fn first_result(&self, key: &ActionKey) -> Option<&Value> {
        self.results.get(key).and_then(|values| values.first())
    }

    pub fn get_metric(&self, key: &MetricKey) -> Option<&[Value]> {
        self.metrics.get(key).map(Vec::as_slice)
    }

    pub fn get_error(&self, key: &ActionKey) -> Option<&ActionError> {
        self.errors.get(key)
    }

    // ---- async task tracking ----

    /// Track a live fork under a task name, newest first
    pub fn add_async_task(&mut self, name: &str, task: TaskHandle) {
        self.async_tasks
            .entry(name.to_string())
            .or_default()
            .insert(0, task);
    }

    /// Drop a tracked fork; the last removal under a name removes the key
    pub fn remove_async_task(&mut self, name: &str, task_id: u64) {
        if let Some(tasks) = self.async_tasks.get_mut(name) {
            tasks.retain(|t| t.id != task_id);
            if tasks.is_empty() {
                self.async_tasks.remove(name);
            }
        }
    }

    /// Take every tracked fork under a name, removing the key
    pub fn take_tasks(&mut self, name: &str) -> Vec<TaskHandle> {
        self.async_tasks.remove(name).unwrap_or_default()
    }

    pub fn async_task_count(&self, name: &str) -> usize {
        self.async_tasks.get(name).map_or(0, Vec::len)
    }

    pub fn has_async_tasks(&self, name: &str) -> bool {
        self.async_tasks.contains_key(name)
    }

    // ---- forking ----

    /// Independent child session: parent config and assigns, empty state
    ///
    /// Connection handles are not duplicated; a fork that needs a WebSocket
    /// must establish its own.
    pub fn fork(&self) -> Session {
        Session {
            id: format!("{} {}", self.scenario.name(), Uuid::new_v4()),
            scenario: self.scenario.clone(),
            config: self.config.clone(),
            assigns: self.assigns.clone(),
            results: HashMap::new(),
            metrics: HashMap::new(),
            errors: HashMap::new(),
            async_tasks: HashMap::new(),
            transports: self.transports.clone(),
            ws_conn: None,
        }
    }

    // ---- running actions ----

    /// Run an action under the uniform failure policy: errors are recorded
    /// on the session and execution continues
    pub async fn run_action(self, action: Action) -> Session {
        let key = action.key();
        match action.run(self).await {
            Ok(session) => {
                debug!("{} completed for session {}", key, session.id);
                session
            }
            Err(err) => {
                let SessionError { mut session, error } = *err;
                error!("{} failed for session {}: {}", key, session.id, error);
                session.errors.insert(key, error);
                session
            }
        }
    }

    /// GET a path against the configured base URL
    pub async fn get(self, path: &str) -> Session {
        self.request(Method::Get, path, HttpOptions::default())
            .await
    }

    pub async fn post(self, path: &str, options: HttpOptions) -> Session {
        self.request(Method::Post, path, options).await
    }

    pub async fn put(self, path: &str, options: HttpOptions) -> Session {
        self.request(Method::Put, path, options).await
    }

    pub async fn patch(self, path: &str, options: HttpOptions) -> Session {
        self.request(Method::Patch, path, options).await
    }

    pub async fn delete(self, path: &str, options: HttpOptions) -> Session {
        self.request(Method::Delete, path, options).await
    }

    /// Run an HTTP action with full options
    pub async fn request(self, method: Method, path: &str, options: HttpOptions) -> Session {
        self.run_action(Action::Http {
            method,
            path: path.to_string(),
            options,
        })
        .await
    }

    /// Open a WebSocket; errors if one is already connected
    pub async fn ws_connect(self, path: &str) -> Session {
        self.run_action(Action::WsConnect {
            path: path.to_string(),
            reconnect: false,
        })
        .await
    }

    /// Open a WebSocket, replacing any existing connection
    pub async fn ws_reconnect(self, path: &str) -> Session {
        self.run_action(Action::WsConnect {
            path: path.to_string(),
            reconnect: true,
        })
        .await
    }

    pub async fn ws_send(self, frame: impl Into<WsFrame>) -> Session {
        self.run_action(Action::WsSend {
            frame: frame.into(),
            await_ack: false,
        })
        .await
    }

    /// Send a frame and wait for the next frame as an acknowledgement
    pub async fn ws_send_ack(self, frame: impl Into<WsFrame>) -> Session {
        self.run_action(Action::WsSend {
            frame: frame.into(),
            await_ack: true,
        })
        .await
    }

    /// Wait for the next frame, up to the session timeout
    pub async fn ws_recv(self) -> Session {
        self.run_action(Action::WsRecv { timeout: None }).await
    }

    /// Wait for the next frame with an explicit limit
    pub async fn ws_recv_within(self, limit: Duration) -> Session {
        self.run_action(Action::WsRecv {
            timeout: Some(limit),
        })
        .await
    }

    /// Invoke a user function with the session and arguments
    pub async fn call(self, callback: impl Into<Callback>, args: Vec<Value>) -> Session {
        self.run_action(Action::Function {
            callback: callback.into(),
            args,
        })
        .await
    }

    /// Fork a child session running the named callback
    pub async fn spawn_task(self, name: &str, args: Vec<Value>) -> Session {
        self.run_action(Action::Async {
            name: name.to_string(),
            args,
        })
        .await
    }

    /// Fan out `rate` forks of the named callback evenly across `interval`
    pub async fn cc_spread(self, name: &str, rate: u32, interval: Duration) -> Session {
        self.run_action(Action::SpreadAsync {
            name: name.to_string(),
            rate,
            interval,
            args: Vec::new(),
        })
        .await
    }

    /// Repeat the named callback until `duration` has elapsed
    pub async fn loop_for(self, name: &str, duration: Duration) -> Session {
        self.run_action(Action::Loop {
            action: Box::new(Action::Function {
                callback: Callback::named(name),
                args: Vec::new(),
            }),
            duration,
        })
        .await
    }

    /// Run a nested scenario on a child session and merge its state back
    pub async fn run_scenario(self, scenario: Arc<dyn Scenario>, overlay: Config) -> Session {
        self.run_action(Action::RunScenario { scenario, overlay })
            .await
    }

    /// Suspend the scenario without doing any I/O
    pub async fn delay(self, duration: Duration) -> Session {
        sleep(duration).await;
        self
    }

    // ---- joining ----

    /// Join forks: results and metrics of each child are tagged with the
    /// task name and merged in, and the handles are removed
    pub async fn await_tasks(self, target: impl Into<JoinTarget>) -> Session {
        match target.into() {
            JoinTarget::Name(name) => self.join_named(&name).await,
            JoinTarget::Names(names) => {
                let mut session = self;
                for name in names {
                    session = session.join_named(&name).await;
                }
                session
            }
            JoinTarget::Handle(task) => self.join_handle(task).await,
        }
    }

    /// Stable alias for `await_tasks`
    pub async fn await_all(self, target: impl Into<JoinTarget>) -> Session {
        self.await_tasks(target).await
    }

    async fn join_named(mut self, name: &str) -> Session {
        let tasks = self.take_tasks(name);
        let mut session = self;
        for task in tasks {
            session = session.join_handle(task).await;
        }
        session
    }

    async fn join_handle(mut self, task: TaskHandle) -> Session {
        let name = task.name().to_string();
        let limit = self.timeout();
        let handle = task.take();
        let abort = handle.abort_handle();

        match timeout(limit, handle).await {
            Ok(Ok(child)) => {
                debug!("Joined task `{}` into session {}", name, self.id);
                merge::merge_results(&mut self, merge::tag_results(&name, child.results));
                merge::merge_metrics(&mut self, merge::tag_metrics(&name, child.metrics));
                self
            }
            Ok(Err(join_err)) => {
                error!("Task `{}` crashed: {}", name, join_err);
                self.record_error(
                    ActionKey::Await { name: name.clone() },
                    ActionError::TaskPanic(join_err.to_string()),
                );
                self
            }
            Err(_) => {
                error!(
                    "Task `{}` not finished after {}ms; killing it",
                    name,
                    limit.as_millis()
                );
                abort.abort();
                self.record_error(
                    ActionKey::Await { name: name.clone() },
                    ActionError::JoinTimeout(name),
                );
                self
            }
        }
    }

    /// Join forks under `name`, then feed each tagged result to `callback`
    ///
    /// The callback's return value is discarded; the session is returned
    /// unchanged after the loop.
    pub async fn with_response<F>(self, name: &str, mut callback: F) -> Session
    where
        F: FnMut(&Session, &Value),
    {
        let session = self.await_tasks(name).await;
        let key = ActionKey::Async {
            name: name.to_string(),
        };

        if let Some(entries) = session.results.get(&key) {
            for entry in entries {
                if let Value::Async { value, .. } = entry {
                    callback(&session, value.as_ref());
                }
            }
        }

        session
    }

    // ---- WebSocket plumbing ----

    pub(crate) fn ws_connected(&self) -> bool {
        self.ws_conn.is_some()
    }

    pub(crate) fn set_ws_conn(&mut self, path: String, conn: Box<dyn WsConnection>) {
        self.ws_conn = Some(WsHandle { path, conn });
    }

    pub(crate) fn ws_path(&self) -> Option<String> {
        self.ws_conn.as_ref().map(|ws| ws.path.clone())
    }

    pub(crate) async fn ws_send_frame(&mut self, frame: WsFrame) -> Result<(), ActionError> {
        match &mut self.ws_conn {
            Some(ws) => ws.conn.send(frame).await,
            None => Err(ActionError::WsNotConnected),
        }
    }

    pub(crate) async fn ws_recv_frame(&mut self, limit: Duration) -> Result<WsFrame, ActionError> {
        let ws = self.ws_conn.as_mut().ok_or(ActionError::WsNotConnected)?;
        timeout(limit, ws.conn.recv())
            .await
            .map_err(|_| ActionError::WsRecvTimeout)?
    }

    /// Serializable snapshot for external reporters
    pub fn record(&self) -> SessionRecord {
        SessionRecord {
            id: self.id.clone(),
            name: self.name().to_string(),
            results: self
                .results
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            metrics: self
                .metrics
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            errors: self
                .errors
                .iter()
                .map(|(k, e)| (k.to_string(), e.to_string()))
                .collect(),
        }
    }
}

/// A session snapshot with stringified keys, ready for serialization
#[derive(Clone, Debug, Serialize)]
pub struct SessionRecord {
    pub id: String,
    pub name: String,
    pub results: HashMap<String, Vec<Value>>,
    pub metrics: HashMap<String, Vec<Value>>,
    pub errors: HashMap<String, String>,
}
