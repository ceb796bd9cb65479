//! Scripted in-memory transports for engine tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use super::{
    HttpRequest, HttpResponse, HttpTransport, Transports, WsConnection, WsFrame, WsTransport,
};
use crate::error::ActionError;

/// HTTP transport answering from a canned script
#[derive(Default)]
pub struct MockHttp {
    latency: Duration,
    bodies: HashMap<String, String>,
    failing: HashSet<String>,
}

impl MockHttp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every request by the given duration
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Respond to the given URL with a specific body
    pub fn body(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.bodies.insert(url.into(), body.into());
        self
    }

    /// Fail every request to the given URL
    pub fn fail_on(mut self, url: impl Into<String>) -> Self {
        self.failing.insert(url.into());
        self
    }
}

#[async_trait]
impl HttpTransport for MockHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ActionError> {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        if self.failing.contains(&request.url) {
            return Err(ActionError::Http(format!("scripted failure for {}", request.url)));
        }

        let body = self
            .bodies
            .get(&request.url)
            .cloned()
            .unwrap_or_else(|| "ok".to_string());

        Ok(HttpResponse {
            status_code: 200,
            headers: HashMap::new(),
            body,
            duration_ms: self.latency.as_millis() as u64,
        })
    }
}

/// WebSocket transport whose connections replay scripted frames
#[derive(Default)]
pub struct MockWs {
    incoming: Vec<WsFrame>,
    refuse: bool,
    sent: Arc<Mutex<Vec<WsFrame>>>,
}

impl MockWs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame every new connection will receive
    pub fn frame(mut self, frame: impl Into<WsFrame>) -> Self {
        self.incoming.push(frame.into());
        self
    }

    /// Refuse all connection attempts
    pub fn refuse_connections(mut self) -> Self {
        self.refuse = true;
        self
    }

    /// Shared log of every frame sent over any connection
    pub fn sent_log(&self) -> Arc<Mutex<Vec<WsFrame>>> {
        self.sent.clone()
    }
}

#[async_trait]
impl WsTransport for MockWs {
    async fn connect(&self, url: &str) -> Result<Box<dyn WsConnection>, ActionError> {
        if self.refuse {
            return Err(ActionError::Ws(format!("scripted refusal for {url}")));
        }

        Ok(Box::new(MockWsConnection {
            incoming: self.incoming.iter().cloned().collect(),
            sent: self.sent.clone(),
        }))
    }
}

struct MockWsConnection {
    incoming: VecDeque<WsFrame>,
    sent: Arc<Mutex<Vec<WsFrame>>>,
}

#[async_trait]
impl WsConnection for MockWsConnection {
    async fn send(&mut self, frame: WsFrame) -> Result<(), ActionError> {
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Result<WsFrame, ActionError> {
        match self.incoming.pop_front() {
            Some(frame) => Ok(frame),
            // Out of script: hang until the caller's timeout fires.
            None => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn close(&mut self) {}
}

/// Bundle mock transports for a test session
pub fn transports(http: MockHttp, ws: MockWs) -> Transports {
    Transports {
        http: Arc::new(http),
        ws: Arc::new(ws),
    }
}

/// Transports that answer every HTTP request with 200 "ok" and refuse WS
pub fn http_only() -> Transports {
    transports(MockHttp::new(), MockWs::new())
}
