//! Reachability checks over a freshly installed transport.

use crate::error::{EngineError, EngineResult};
use crate::system::CommandRunner;
use shared_utils::config::ProbeConfig;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pings a known server after a grace period.
pub struct ConnectivityProbe {
    runner: Arc<dyn CommandRunner>,
    ping_path: String,
    timeout_secs: u32,
    count: u32,
}

impl ConnectivityProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, ping_path: impl Into<String>) -> Self {
        Self {
            runner,
            ping_path: ping_path.into(),
            timeout_secs: 1,
            count: 5,
        }
    }

    pub fn from_config(config: &ProbeConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            ping_path: config.ping_path.clone(),
            timeout_secs: config.timeout_secs,
            count: config.count,
        }
    }

    /// Wait `grace`, then run one reachability check against `target`.
    ///
    /// `Ok(false)` means the target did not answer. Only a check tool that
    /// cannot be started is an error.
    pub fn probe(&self, target: &str, grace: Duration) -> EngineResult<bool> {
        if !grace.is_zero() {
            info!("Testing connection. Please wait {} seconds.", grace.as_secs());
            thread::sleep(grace);
        }

        let timeout = self.timeout_secs.to_string();
        let count = self.count.to_string();
        let output = self
            .runner
            .run(&self.ping_path, &["-W", &timeout, "-c", &count, target])
            .map_err(|source| EngineError::ProbeTool {
                tool: self.ping_path.clone(),
                source,
            })?;

        if output.success() {
            debug!("{} is reachable", target);
            Ok(true)
        } else {
            warn!("{} is not reachable: {}", target, output.describe());
            Ok(false)
        }
    }

    /// Up to `attempts` probes; the grace period precedes each one.
    pub fn probe_with_retries(
        &self,
        target: &str,
        grace: Duration,
        attempts: u32,
    ) -> EngineResult<bool> {
        for attempt in 1..=attempts.max(1) {
            debug!("Reachability check {}/{}", attempt, attempts.max(1));

            if self.probe(target, grace)? {
                return Ok(true);
            }
        }

        Ok(false)
    }
}
