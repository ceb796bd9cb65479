//! Transport seam between the engine and the network
//!
//! The engine drives traffic through the `HttpTransport` and `WsTransport`
//! traits; the default adapters live in the submodules. Swapping the
//! transports out is how tests run the engine without a network.

pub mod http;
#[cfg(test)]
pub mod mock;
pub mod ws;

pub use http::ReqwestTransport;
pub use ws::TungsteniteTransport;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ActionError;

/// HTTP request methods supported by the engine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A fully resolved HTTP request handed to the transport
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
}

/// HTTP response as seen by the session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub duration_ms: u64,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status_code)
    }

    pub fn get_header(&self, name: &str) -> Option<&String> {
        self.headers.get(&name.to_lowercase())
    }

    pub fn body_contains(&self, text: &str) -> bool {
        self.body.contains(text)
    }
}

/// A single WebSocket frame
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WsFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl WsFrame {
    /// Text payload, if this is a text frame
    pub fn text(&self) -> Option<&str> {
        match self {
            WsFrame::Text(s) => Some(s),
            WsFrame::Binary(_) => None,
        }
    }
}

impl From<&str> for WsFrame {
    fn from(s: &str) -> Self {
        WsFrame::Text(s.to_string())
    }
}

impl From<String> for WsFrame {
    fn from(s: String) -> Self {
        WsFrame::Text(s)
    }
}

/// Sends HTTP requests on behalf of sessions
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ActionError>;
}

/// Opens WebSocket connections on behalf of sessions
#[async_trait]
pub trait WsTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn WsConnection>, ActionError>;
}

/// A live WebSocket connection owned by exactly one session
#[async_trait]
pub trait WsConnection: Send {
    async fn send(&mut self, frame: WsFrame) -> Result<(), ActionError>;

    /// Wait for the next data frame
    async fn recv(&mut self) -> Result<WsFrame, ActionError>;

    async fn close(&mut self);
}

/// The transport handles threaded through every session and its forks
#[derive(Clone)]
pub struct Transports {
    pub http: Arc<dyn HttpTransport>,
    pub ws: Arc<dyn WsTransport>,
}

impl Transports {
    /// Default stack: reqwest for HTTP, tokio-tungstenite for WebSocket
    pub fn default_stack() -> Result<Self> {
        Ok(Self {
            http: Arc::new(ReqwestTransport::new()?),
            ws: Arc::new(TungsteniteTransport::new()),
        })
    }
}

/// Join a request path onto an optional base URL
pub fn join_url(base: Option<&str>, path: &str) -> String {
    match base {
        Some(base) => {
            if path.starts_with("http://") || path.starts_with("https://") {
                path.to_string()
            } else {
                format!("{}{}", base.trim_end_matches('/'), path)
            }
        }
        None => path.to_string(),
    }
}

/// Derive a WebSocket URL from an optional HTTP base URL and a path
pub fn ws_url(base: Option<&str>, path: &str) -> String {
    if path.starts_with("ws://") || path.starts_with("wss://") {
        return path.to_string();
    }
    match base {
        Some(base) => {
            let ws_base = base
                .replacen("https://", "wss://", 1)
                .replacen("http://", "ws://", 1);
            format!("{}{}", ws_base.trim_end_matches('/'), path)
        }
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_as_str() {
        assert_eq!(Method::Get.as_str(), "GET");
        assert_eq!(Method::Patch.to_string(), "PATCH");
    }

    #[test]
    fn test_http_response_helpers() {
        let resp = HttpResponse {
            status_code: 200,
            headers: HashMap::new(),
            body: "Hello World".to_string(),
            duration_ms: 12,
        };

        assert!(resp.is_success());
        assert!(!resp.is_server_error());
        assert!(resp.body_contains("Hello"));
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url(None, "/a"), "/a");
        assert_eq!(join_url(Some("http://host:8080/"), "/a"), "http://host:8080/a");
        assert_eq!(
            join_url(Some("http://host"), "https://other/x"),
            "https://other/x"
        );
    }

    #[test]
    fn test_ws_url() {
        assert_eq!(ws_url(Some("http://host:8080"), "/chat"), "ws://host:8080/chat");
        assert_eq!(ws_url(Some("https://host"), "/chat"), "wss://host/chat");
        assert_eq!(ws_url(None, "ws://host/chat"), "ws://host/chat");
    }

    #[test]
    fn test_ws_frame_text() {
        let frame: WsFrame = "ping".into();
        assert_eq!(frame.text(), Some("ping"));
        assert_eq!(WsFrame::Binary(vec![1, 2]).text(), None);
    }
}
