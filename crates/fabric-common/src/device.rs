//! Command transport towards switch control agents.
//!
//! Every configuration change is a JSON document sent to the agent
//! responsible for a switch. [`DeviceTransport`] is the seam the
//! orchestrators talk to; [`HttpDeviceClient`] is the production
//! implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{FabricError, FabricResult};

/// Placeholder in an agent URL template replaced by the switch management IP.
pub const MGR_PLACEHOLDER: &str = "{mgr}";

/// HTTP verb of a device command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceMethod {
    Post,
    Delete,
}

/// One command addressed to the agent of a switch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceCommand {
    pub method: DeviceMethod,
    /// Agent path, e.g. `/vlan2vxlan`.
    pub path: String,
    /// Management IP of the switch the command configures.
    pub mgr: String,
    pub payload: Value,
}

impl DeviceCommand {
    pub fn post(path: impl Into<String>, mgr: impl Into<String>, payload: Value) -> Self {
        Self {
            method: DeviceMethod::Post,
            path: path.into(),
            mgr: mgr.into(),
            payload,
        }
    }

    pub fn delete(path: impl Into<String>, mgr: impl Into<String>, payload: Value) -> Self {
        Self {
            method: DeviceMethod::Delete,
            path: path.into(),
            mgr: mgr.into(),
            payload,
        }
    }
}

/// Sends commands to switch agents and returns their JSON answer.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn send(&self, command: &DeviceCommand) -> FabricResult<Value>;
}

/// Immutable settings of the HTTP agent client.
#[derive(Debug, Clone)]
pub struct DeviceClientConfig {
    /// Agent base URL; may contain `{mgr}`.
    pub base_url: String,
    /// Per-call timeout.
    pub timeout: Duration,
}

impl DeviceClientConfig {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
        }
    }

    /// Full URL of `path` on the agent responsible for `mgr`.
    pub fn url_for(&self, mgr: &str, path: &str) -> String {
        let base = self.base_url.replace(MGR_PLACEHOLDER, mgr);
        format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

/// Agent client over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpDeviceClient {
    config: DeviceClientConfig,
    client: reqwest::Client,
}

impl HttpDeviceClient {
    pub fn new(config: DeviceClientConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &DeviceClientConfig {
        &self.config
    }
}

/// Parses an agent reply; bodies that are not JSON come back as a string value.
pub fn parse_reply(body: &str) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}

#[async_trait]
impl DeviceTransport for HttpDeviceClient {
    async fn send(&self, command: &DeviceCommand) -> FabricResult<Value> {
        let url = self.config.url_for(&command.mgr, &command.path);
        let method = match command.method {
            DeviceMethod::Post => reqwest::Method::POST,
            DeviceMethod::Delete => reqwest::Method::DELETE,
        };
        debug!(%url, ?method, "Sending device command");

        let response = self
            .client
            .request(method, &url)
            .timeout(self.config.timeout)
            .json(&command.payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FabricError::timeout(&url, self.config.timeout)
                } else {
                    FabricError::connect(&url, e.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FabricError::timeout(&url, self.config.timeout)
            } else {
                FabricError::connect(&url, e.to_string())
            }
        })?;

        if !status.is_success() {
            return Err(FabricError::connect(
                &url,
                format!("agent answered {}: {}", status, body.trim()),
            ));
        }

        Ok(parse_reply(&body))
    }
}
