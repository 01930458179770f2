//! Waiting for nodes to come up, or to come back from a reboot.
//!
//! Both waits poll the node's boot id, which the kernel regenerates on every
//! boot: a node is reachable once the id can be read, and has rebooted once
//! the id differs from the one read before the reboot.
//!
//! By default polling never gives up. A node that never comes back keeps its
//! task waiting until the whole run is interrupted; `max_attempts` bounds this.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::FlotillaError;
use crate::node::Node;
use crate::transport::{RemoteCommand, Transport};

pub const BOOT_ID_PATH: &str = "/proc/sys/kernel/random/boot_id";

/// Delay between two probes of the same node.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Reads the node's current boot id.
///
/// Any failure (unreachable host, non-zero exit, empty output) reads as
/// `None`.
pub async fn read_boot_id(transport: &dyn Transport, node: &Node) -> Option<String> {
    let command = RemoteCommand::new(["cat", BOOT_ID_PATH]).with_connect_timeout();
    match transport.run(node, &command, None).await {
        Ok(output) if output.success() => {
            let id = output.stdout.trim();
            (!id.is_empty()).then(|| id.to_string())
        }
        Ok(output) => {
            debug!("{}: boot id probe failed ({})", node.name, output.status());
            None
        }
        Err(e) => {
            debug!("{}: boot id probe failed: {}", node.name, e);
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poller {
    /// Sleep between attempts.
    pub interval: Duration,
    /// Give up after this many attempts. `None` polls forever.
    pub max_attempts: Option<usize>,
}

impl Default for Poller {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: None,
        }
    }
}

impl Poller {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Calls `probe` until it yields a value, sleeping `interval` between
    /// attempts.
    pub async fn poll_until<T, F, Fut>(&self, mut probe: F) -> Result<T, FlotillaError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            if let Some(value) = probe().await {
                return Ok(value);
            }
            if matches!(self.max_attempts, Some(max) if attempts >= max) {
                return Err(FlotillaError::PollExhausted(attempts));
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Waits until the node answers with a boot id, and returns it.
    pub async fn wait_reachable(
        &self,
        transport: &dyn Transport,
        node: &Node,
    ) -> Result<String, FlotillaError> {
        self.poll_until(move || read_boot_id(transport, node)).await
    }

    /// Waits until the node answers with a boot id other than `old_id`.
    ///
    /// `old_id` is `None` when the node could not be read before the reboot,
    /// in which case any answer counts.
    pub async fn wait_rebooted(
        &self,
        transport: &dyn Transport,
        node: &Node,
        old_id: Option<&str>,
    ) -> Result<String, FlotillaError> {
        self.poll_until(move || async move {
            read_boot_id(transport, node)
                .await
                .filter(|id| Some(id.as_str()) != old_id)
        })
        .await
    }
}
