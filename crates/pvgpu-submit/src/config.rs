//! Submission engine configuration.
//!
//! | Variable                    | Field              | Default |
//! |-----------------------------|--------------------|---------|
//! | `PVGPU_PORTS`               | `ports`            | 2       |
//! | `PVGPU_DOORBELL_TIMEOUT_US` | `doorbell_timeout` | 1000 µs |
//! | `PVGPU_QUIESCE_TIMEOUT_MS`  | `quiesce_timeout`  | 10 ms   |
//! | `PVGPU_TASKLET_DEPTH`       | `tasklet_depth`    | 64      |
//! | `PVGPU_INLINE_TASKLETS`     | `inline_tasklets`  | false   |

use std::time::Duration;

use pvgpu_core::constants::PV_MAX_PORTS;
use pvgpu_core::env::{env_get, env_get_bool, env_get_micros, env_get_millis};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitConfig {
    /// Ports filled per engine, at most `PV_MAX_PORTS`.
    pub ports: usize,
    /// Bound on waiting for the host to clear `submitted`.
    pub doorbell_timeout: Duration,
    /// Bound on waiting for a running tasklet during reset prepare.
    pub quiesce_timeout: Duration,
    /// Pending tasklet kicks the worker queue holds.
    pub tasklet_depth: usize,
    /// Run tasklets on the kicking thread instead of the worker.
    pub inline_tasklets: bool,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            ports: 2,
            doorbell_timeout: Duration::from_micros(1000),
            quiesce_timeout: Duration::from_millis(10),
            tasklet_depth: 64,
            inline_tasklets: false,
        }
    }
}

impl SubmitConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            ports: env_get("PVGPU_PORTS", d.ports),
            doorbell_timeout: env_get_micros("PVGPU_DOORBELL_TIMEOUT_US", d.doorbell_timeout),
            quiesce_timeout: env_get_millis("PVGPU_QUIESCE_TIMEOUT_MS", d.quiesce_timeout),
            tasklet_depth: env_get("PVGPU_TASKLET_DEPTH", d.tasklet_depth),
            inline_tasklets: env_get_bool("PVGPU_INLINE_TASKLETS", d.inline_tasklets),
        }
    }

    pub fn ports(mut self, n: usize) -> Self {
        self.ports = n;
        self
    }

    pub fn doorbell_timeout(mut self, d: Duration) -> Self {
        self.doorbell_timeout = d;
        self
    }

    pub fn inline_tasklets(mut self, on: bool) -> Self {
        self.inline_tasklets = on;
        self
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.ports == 0 || self.ports > PV_MAX_PORTS {
            return Err("ports must be between 1 and PV_MAX_PORTS");
        }
        if self.doorbell_timeout.is_zero() {
            return Err("doorbell_timeout must be non-zero");
        }
        if self.quiesce_timeout < self.doorbell_timeout {
            return Err("quiesce_timeout must be at least doorbell_timeout");
        }
        if self.tasklet_depth == 0 {
            return Err("tasklet_depth must be non-zero");
        }
        Ok(())
    }
}
