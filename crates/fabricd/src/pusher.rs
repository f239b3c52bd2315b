//! Best-effort delivery of device commands
//!
//! Orchestrators hand push jobs to [`DevicePusher::spawn`], which runs them
//! as detached tasks so the triggering request never waits on a switch.
//! Failures are logged and counted; the ensure sweep converges what is lost.

use std::sync::Arc;

use fabric_common::{DeviceCommand, DeviceTransport, FabricResult};
use serde_json::Value;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::metrics::MetricsCollector;

#[derive(Clone)]
pub struct DevicePusher {
    transport: Arc<dyn DeviceTransport>,
    metrics: MetricsCollector,
    tracker: TaskTracker,
}

impl DevicePusher {
    pub fn new(transport: Arc<dyn DeviceTransport>, metrics: MetricsCollector) -> Self {
        Self {
            transport,
            metrics,
            tracker: TaskTracker::new(),
        }
    }

    /// Spawns `fut` on the push tracker so [`flush`](Self::flush) waits for it.
    pub fn spawn<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(fut);
    }

    /// Sends `command` and waits for it; failures are logged and counted.
    pub async fn send(&self, command: &DeviceCommand) -> Option<Value> {
        match self.request(command).await {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!(
                    path = %command.path,
                    switch = %command.mgr,
                    error = %e,
                    "Device command failed"
                );
                None
            }
        }
    }

    /// Sends `command` and returns the agent reply or the transport error.
    pub async fn request(&self, command: &DeviceCommand) -> FabricResult<Value> {
        debug!(path = %command.path, switch = %command.mgr, "Pushing device command");
        let result = self.transport.send(command).await;
        if result.is_err() {
            self.metrics.record_push_failure();
        }
        result
    }

    /// Number of pushes still in flight.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every push spawned so far has finished.
    pub async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
