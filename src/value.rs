//! Value and key models for session state
//!
//! Everything a session stores (assigns, results, metrics) is a `Value`,
//! keyed by the structural identity of the action or metric that produced it.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::action::HttpOptions;
use crate::transport::{HttpResponse, Method, WsFrame};

/// The uniform datum stored in session maps
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Response(HttpResponse),
    Frame(WsFrame),
    /// A child entry merged in at join time, tagged with its original key
    Async { key: TaggedKey, value: Box<Value> },
    /// A value overlaid with the name of the session it came from
    Named { session: String, value: Box<Value> },
    Json(serde_json::Value),
}

impl Value {
    /// Strip provenance tags down to the underlying value
    pub fn untagged(&self) -> &Value {
        match self {
            Value::Async { value, .. } => value.untagged(),
            Value::Named { value, .. } => value.untagged(),
            other => other,
        }
    }

    /// Numeric view, used for metric samples
    pub fn as_f64(&self) -> Option<f64> {
        match self.untagged() {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.untagged() {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.untagged() {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The session name recorded by a cross-session merge, if any
    pub fn session_name(&self) -> Option<&str> {
        match self {
            Value::Named { session, .. } => Some(session),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<HttpResponse> for Value {
    fn from(v: HttpResponse) -> Self {
        Value::Response(v)
    }
}

impl From<WsFrame> for Value {
    fn from(v: WsFrame) -> Self {
        Value::Frame(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

/// Structural identity of an action: same variant, same fields, same key
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKey {
    /// Synthetic key for scenario init failures
    Init,
    Http {
        method: Method,
        path: String,
        options: HttpOptions,
    },
    WsConnect {
        path: String,
    },
    WsSend {
        frame: WsFrame,
    },
    WsRecv {
        timeout: Option<Duration>,
    },
    Function {
        name: String,
    },
    Async {
        name: String,
    },
    Loop {
        action: Box<ActionKey>,
        duration: Duration,
    },
    Spread {
        name: String,
        rate: u32,
        interval: Duration,
    },
    RunScenario {
        name: String,
    },
    /// Synthetic key for join timeouts recorded by `await_tasks`
    Await {
        name: String,
    },
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKey::Init => write!(f, "init"),
            ActionKey::Http { method, path, .. } => write!(f, "{method} {path}"),
            ActionKey::WsConnect { path } => write!(f, "ws_connect {path}"),
            ActionKey::WsSend { .. } => write!(f, "ws_send"),
            ActionKey::WsRecv { .. } => write!(f, "ws_recv"),
            ActionKey::Function { name } => write!(f, "call {name}"),
            ActionKey::Async { name } => write!(f, "async {name}"),
            ActionKey::Loop { action, duration } => {
                write!(f, "loop({action}, {}ms)", duration.as_millis())
            }
            ActionKey::Spread { name, rate, interval } => {
                write!(f, "spread {name} {rate}x/{}ms", interval.as_millis())
            }
            ActionKey::RunScenario { name } => write!(f, "scenario {name}"),
            ActionKey::Await { name } => write!(f, "await {name}"),
        }
    }
}

/// Identity of a timing or user metric
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKey {
    Http { path: String },
    WsSend { path: String },
    WsRecv { path: String },
    Custom(String),
}

impl MetricKey {
    pub fn custom(name: impl Into<String>) -> Self {
        MetricKey::Custom(name.into())
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKey::Http { path } => write!(f, "http {path}"),
            MetricKey::WsSend { path } => write!(f, "ws_send {path}"),
            MetricKey::WsRecv { path } => write!(f, "ws_recv {path}"),
            MetricKey::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// The original key of a tagged child entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TaggedKey {
    Result(ActionKey),
    Metric(MetricKey),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_key_equality() {
        let a = ActionKey::Http {
            method: Method::Get,
            path: "/a".to_string(),
            options: HttpOptions::default(),
        };
        let b = ActionKey::Http {
            method: Method::Get,
            path: "/b".to_string(),
            options: HttpOptions::default(),
        };

        assert_ne!(a, b);
        assert_eq!(a.to_string(), "GET /a");
    }

    #[test]
    fn test_value_untagged() {
        let value = Value::Named {
            session: "a".to_string(),
            value: Box::new(Value::Async {
                key: TaggedKey::Metric(MetricKey::custom("ticks")),
                value: Box::new(Value::Int(7)),
            }),
        };

        assert_eq!(value.untagged(), &Value::Int(7));
        assert_eq!(value.as_f64(), Some(7.0));
        assert_eq!(value.session_name(), Some("a"));
    }

    #[test]
    fn test_value_from() {
        assert_eq!(Value::from(3), Value::Int(3));
        assert_eq!(Value::from("x"), Value::String("x".to_string()));
        assert_eq!(Value::from(1.5).as_f64(), Some(1.5));
    }

    #[test]
    fn test_metric_key_display() {
        assert_eq!(MetricKey::Http { path: "/a".into() }.to_string(), "http /a");
        assert_eq!(MetricKey::custom("ticks").to_string(), "ticks");
    }
}
