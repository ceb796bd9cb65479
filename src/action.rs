//! Actions the engine can run against a session
//!
//! An action is a tagged command value with one operation: run it against a
//! session, producing either the mutated session or an error envelope that
//! still carries the session. The uniform failure policy (record the error,
//! keep going) is applied by `Session::run_action`, not here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::error;

use crate::config::Config;
use crate::error::ActionError;
use crate::merge;
use crate::scenario::Scenario;
use crate::session::{Session, SessionError, SessionResult, TaskHandle};
use crate::transport::{join_url, ws_url, HttpRequest, Method, WsFrame};
use crate::util::Timer;
use crate::value::{ActionKey, MetricKey, Value};

/// Options for an HTTP action
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HttpOptions {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Option<Duration>,
}

impl HttpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Override the session timeout for this request only
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The future returned by an inline callback
pub type CallbackFuture = BoxFuture<'static, SessionResult>;

/// An inline user callback over a session
pub type CallbackFn = dyn Fn(Session, Vec<Value>) -> CallbackFuture + Send + Sync;

/// A user function: either registered by name on the scenario, or inline
#[derive(Clone)]
pub enum Callback {
    Named(String),
    Inline { name: String, f: Arc<CallbackFn> },
}

impl Callback {
    pub fn named(name: impl Into<String>) -> Self {
        Callback::Named(name.into())
    }

    pub fn inline<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Session, Vec<Value>) -> CallbackFuture + Send + Sync + 'static,
    {
        Callback::Inline {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Callback::Named(name) => name,
            Callback::Inline { name, .. } => name,
        }
    }
}

impl From<&str> for Callback {
    fn from(name: &str) -> Self {
        Callback::named(name)
    }
}

/// A command the engine can execute against a session
#[derive(Clone)]
pub enum Action {
    Http {
        method: Method,
        path: String,
        options: HttpOptions,
    },
    WsConnect {
        path: String,
        reconnect: bool,
    },
    WsSend {
        frame: WsFrame,
        await_ack: bool,
    },
    WsRecv {
        timeout: Option<Duration>,
    },
    Function {
        callback: Callback,
        args: Vec<Value>,
    },
    Async {
        name: String,
        args: Vec<Value>,
    },
    Loop {
        action: Box<Action>,
        duration: Duration,
    },
    SpreadAsync {
        name: String,
        rate: u32,
        interval: Duration,
        args: Vec<Value>,
    },
    RunScenario {
        scenario: Arc<dyn Scenario>,
        overlay: Config,
    },
}

impl Action {
    /// Structural identity of this action, used as its result and error key
    pub fn key(&self) -> ActionKey {
        match self {
            Action::Http {
                method,
                path,
                options,
            } => ActionKey::Http {
                method: *method,
                path: path.clone(),
                options: options.clone(),
            },
            Action::WsConnect { path, .. } => ActionKey::WsConnect { path: path.clone() },
            Action::WsSend { frame, .. } => ActionKey::WsSend {
                frame: frame.clone(),
            },
            Action::WsRecv { timeout } => ActionKey::WsRecv { timeout: *timeout },
            Action::Function { callback, .. } => ActionKey::Function {
                name: callback.name().to_string(),
            },
            Action::Async { name, .. } => ActionKey::Async { name: name.clone() },
            Action::Loop { action, duration } => ActionKey::Loop {
                action: Box::new(action.key()),
                duration: *duration,
            },
            Action::SpreadAsync {
                name,
                rate,
                interval,
                ..
            } => ActionKey::Spread {
                name: name.clone(),
                rate: *rate,
                interval: *interval,
            },
            Action::RunScenario { scenario, .. } => ActionKey::RunScenario {
                name: scenario.name().to_string(),
            },
        }
    }

    /// Run this action against a session
    ///
    /// Boxed so `Loop` can recurse through `Session::run_action`.
    pub fn run(self, session: Session) -> BoxFuture<'static, SessionResult> {
        match self {
            Action::Http {
                method,
                path,
                options,
            } => Box::pin(async move {
                let key = ActionKey::Http {
                    method,
                    path: path.clone(),
                    options: options.clone(),
                };
                let timeout = options.timeout.unwrap_or_else(|| session.timeout());

                let mut path_and_query = path.clone();
                if !options.query.is_empty() {
                    let query = options
                        .query
                        .iter()
                        .map(|(k, v)| format!("{k}={v}"))
                        .collect::<Vec<_>>()
                        .join("&");
                    path_and_query = format!("{path}?{query}");
                }

                let request = HttpRequest {
                    method,
                    url: join_url(session.config().base_url(), &path_and_query),
                    headers: options.headers.clone(),
                    body: options.body.clone(),
                    timeout,
                };

                let http = session.transports().http.clone();
                let timer = Timer::start();

                match http.send(request).await {
                    Ok(response) => {
                        let elapsed_ms = timer.elapsed_ms();
                        let mut session = session;
                        session.add_result(key, Value::Response(response));
                        session.add_metric(MetricKey::Http { path }, Value::Float(elapsed_ms));
                        Ok(session)
                    }
                    Err(e) => session.error(e),
                }
            }),

            Action::WsConnect { path, reconnect } => Box::pin(async move {
                if session.ws_connected() && !reconnect {
                    return session.error(ActionError::WsAlreadyConnected);
                }

                let url = ws_url(session.config().base_url(), &path);
                let ws = session.transports().ws.clone();

                match ws.connect(&url).await {
                    Ok(conn) => {
                        let mut session = session;
                        session.set_ws_conn(path, conn);
                        Ok(session)
                    }
                    Err(e) => session.error(e),
                }
            }),

            Action::WsSend { frame, await_ack } => Box::pin(async move {
                let mut session = session;
                let timer = Timer::start();

                if let Err(e) = session.ws_send_frame(frame).await {
                    return session.error(e);
                }

                if await_ack {
                    let limit = session.timeout();
                    if let Err(e) = session.ws_recv_frame(limit).await {
                        return session.error(e);
                    }
                }

                let elapsed_ms = timer.elapsed_ms();
                let path = session.ws_path().unwrap_or_default();
                session.add_metric(MetricKey::WsSend { path }, Value::Float(elapsed_ms));
                Ok(session)
            }),

            Action::WsRecv { timeout } => Box::pin(async move {
                let key = ActionKey::WsRecv { timeout };
                let mut session = session;
                let limit = timeout.unwrap_or_else(|| session.timeout());
                let timer = Timer::start();

                match session.ws_recv_frame(limit).await {
                    Ok(frame) => {
                        let elapsed_ms = timer.elapsed_ms();
                        let path = session.ws_path().unwrap_or_default();
                        session.add_result(key, Value::Frame(frame));
                        session.add_metric(MetricKey::WsRecv { path }, Value::Float(elapsed_ms));
                        Ok(session)
                    }
                    Err(e) => session.error(e),
                }
            }),

            Action::Function { callback, args } => Box::pin(async move {
                match callback {
                    Callback::Named(name) => {
                        let scenario = session.scenario();
                        scenario.call(session, &name, args).await
                    }
                    Callback::Inline { f, .. } => f(session, args).await,
                }
            }),

            Action::Async { name, args } => Box::pin(async move {
                let mut session = session;
                let child = session.fork();
                let scenario = child.scenario();
                let task_name = name.clone();

                let handle = tokio::spawn(async move {
                    match scenario.call(child, &task_name, args).await {
                        Ok(child) => child,
                        Err(err) => {
                            let SessionError { mut session, error } = *err;
                            error!(
                                "Callback `{}` failed in forked session {}: {}",
                                task_name,
                                session.id(),
                                error
                            );
                            session.record_error(ActionKey::Function { name: task_name }, error);
                            session
                        }
                    }
                });

                session.add_async_task(&name, TaskHandle::new(name.clone(), handle));
                Ok(session)
            }),

            Action::Loop { action, duration } => Box::pin(async move {
                // The deadline is fixed at entry; a slow final iteration may overrun it.
                let deadline = Instant::now() + duration;
                let mut session = session;

                while Instant::now() < deadline {
                    session = session.run_action((*action).clone()).await;
                }

                Ok(session)
            }),

            Action::SpreadAsync {
                name,
                rate,
                interval,
                args,
            } => Box::pin(async move {
                let mut session = session;
                if rate == 0 {
                    return Ok(session);
                }

                let gap = interval / rate;
                for i in 0..rate {
                    if i > 0 {
                        sleep(gap).await;
                    }
                    session = session
                        .run_action(Action::Async {
                            name: name.clone(),
                            args: args.clone(),
                        })
                        .await;
                }

                Ok(session)
            }),

            Action::RunScenario { scenario, overlay } => Box::pin(async move {
                let mut session = session;
                let config = session.config().merged(&overlay);
                let transports = session.transports().clone();

                let handle = tokio::spawn(crate::scenario::execute(scenario, config, transports));

                match handle.await {
                    Ok(child) => {
                        merge::merge_results(&mut session, child.results);
                        merge::merge_metrics(&mut session, child.metrics);
                        Ok(session)
                    }
                    Err(e) => session.error(ActionError::TaskPanic(e.to_string())),
                }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_options_builder() {
        let options = HttpOptions::new()
            .header("Host", "example.com")
            .query("page", "2")
            .body("{}")
            .timeout(Duration::from_secs(1));

        assert_eq!(options.headers.len(), 1);
        assert_eq!(options.query.len(), 1);
        assert_eq!(options.timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_action_key_distinguishes_paths() {
        let a = Action::Http {
            method: Method::Get,
            path: "/a".to_string(),
            options: HttpOptions::default(),
        };
        let b = Action::Http {
            method: Method::Get,
            path: "/b".to_string(),
            options: HttpOptions::default(),
        };

        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_loop_key_includes_inner() {
        let inner = Action::Function {
            callback: Callback::named("tick"),
            args: Vec::new(),
        };
        let outer = Action::Loop {
            action: Box::new(inner),
            duration: Duration::from_millis(500),
        };

        assert_eq!(outer.key().to_string(), "loop(call tick, 500ms)");
    }

    #[test]
    fn test_callback_name() {
        assert_eq!(Callback::named("work").name(), "work");
        let inline = Callback::inline("ping", |session, _args| Box::pin(async move { session.ok() }));
        assert_eq!(inline.name(), "ping");
    }
}
