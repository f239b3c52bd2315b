//! Device transport that records commands and scripts replies

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fabric_common::{DeviceCommand, DeviceMethod, DeviceTransport, FabricError, FabricResult};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;

/// A command as seen by the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    pub method: DeviceMethod,
    pub path: String,
    pub mgr: String,
    pub payload: Value,
}

impl From<&DeviceCommand> for SentCommand {
    fn from(cmd: &DeviceCommand) -> Self {
        Self {
            method: cmd.method,
            path: cmd.path.clone(),
            mgr: cmd.mgr.clone(),
            payload: cmd.payload.clone(),
        }
    }
}

/// Records every command. `/tunnel` answers with increasing tunnel ids,
/// `/tsync` with the peers configured for the queried source address,
/// everything else with `"OK"`.
pub struct RecordingTransport {
    sent: Mutex<Vec<SentCommand>>,
    peers: Mutex<HashMap<String, Vec<String>>>,
    unreachable: Mutex<HashSet<String>>,
    next_tunnel_id: AtomicU32,
    notify: Notify,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            peers: Mutex::new(HashMap::new()),
            unreachable: Mutex::new(HashSet::new()),
            next_tunnel_id: AtomicU32::new(1),
            notify: Notify::new(),
        }
    }
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tunnel peers reported by `/tsync` for tunnel source `src`.
    pub fn set_tunnel_peers(&self, src: &str, peers: &[&str]) {
        self.peers
            .lock()
            .insert(src.to_string(), peers.iter().map(|p| p.to_string()).collect());
    }

    /// Makes every command addressed to `mgr` fail.
    pub fn set_unreachable(&self, mgr: &str) {
        self.unreachable.lock().insert(mgr.to_string());
    }

    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent.lock().clone()
    }

    /// Commands sent to `path`, in send order.
    pub fn sent_to(&self, path: &str) -> Vec<SentCommand> {
        self.sent
            .lock()
            .iter()
            .filter(|c| c.path == path)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    /// Waits until at least `count` commands were sent to `path`.
    pub async fn wait_for(&self, path: &str, count: usize) -> FabricResult<Vec<SentCommand>> {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                let matching = self.sent_to(path);
                if matching.len() >= count {
                    return matching;
                }
                notified.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .map_err(|_| FabricError::timeout(path, Duration::from_secs(5)))
    }

    fn reply(&self, command: &DeviceCommand) -> Value {
        match (command.method, command.path.as_str()) {
            (DeviceMethod::Post, "/tunnel") => {
                json!({ "tunnel_id": self.next_tunnel_id.fetch_add(1, Ordering::SeqCst) })
            }
            (DeviceMethod::Post, "/tsync") => {
                let src = command.payload["src"].as_str().unwrap_or_default();
                let peers = self.peers.lock().get(src).cloned().unwrap_or_default();
                let tunnels: Vec<Value> = peers
                    .into_iter()
                    .map(|ip| json!({ "ip_address": ip }))
                    .collect();
                json!({ "tunnels": tunnels })
            }
            _ => json!("OK"),
        }
    }
}

#[async_trait]
impl DeviceTransport for RecordingTransport {
    async fn send(&self, command: &DeviceCommand) -> FabricResult<Value> {
        self.sent.lock().push(SentCommand::from(command));
        let result = if self.unreachable.lock().contains(&command.mgr) {
            Err(FabricError::connect(&command.mgr, "connection refused"))
        } else {
            Ok(self.reply(command))
        };
        self.notify.notify_waiters();
        result
    }
}
