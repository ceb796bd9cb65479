//! Default HTTP adapter
//!
//! Drives requests through a shared reqwest client.

use std::collections::HashMap;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{HttpRequest, HttpResponse, HttpTransport};
use crate::error::ActionError;

/// HTTP transport backed by reqwest
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a new transport with a pooled client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ActionError> {
        debug!("Sending {} request to {}", request.method, request.url);

        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| ActionError::Http(e.to_string()))?;

        let mut req_builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key.as_str(), value.as_str());
        }

        if let Some(body) = &request.body {
            req_builder = req_builder.body(body.clone());
        }

        let timeout_ms = request.timeout.as_millis() as u64;
        let start = Instant::now();

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ActionError::HttpTimeout(timeout_ms)
            } else if e.is_connect() {
                ActionError::ConnectionRefused(request.url.clone())
            } else {
                ActionError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.to_string(), v.to_string());
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| ActionError::Http(e.to_string()))?;

        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(
            "Response: {} {} in {}ms",
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            duration_ms
        );

        Ok(HttpResponse {
            status_code: status.as_u16(),
            headers,
            body,
            duration_ms,
        })
    }
}
