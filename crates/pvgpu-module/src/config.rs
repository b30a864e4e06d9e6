//! Transport configuration.
//!
//! Defaults match the host mediator's expectations; every field can be
//! overridden from the environment with [`PvConfig::from_env`].
//!
//! | Variable                 | Field          | Default   |
//! |--------------------------|----------------|-----------|
//! | `PVGPU_CAPS`             | `desired_caps` | all       |
//! | `PVGPU_FENCE_SPIN_US`    | `fence_spin`   | 5 µs      |
//! | `PVGPU_FENCE_TIMEOUT_MS` | `fence_timeout`| 10 ms     |
//! | `PVGPU_FENCE_POLL_US`    | `fence_poll`   | 0 (yield) |

use std::time::Duration;

use pvgpu_core::caps::PvCaps;
use pvgpu_core::env::{env_get_bits, env_get_micros, env_get_millis};
use pvgpu_core::wait::BoundedWait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PvConfig {
    /// Capabilities the guest asks for; the host offer is intersected with it.
    pub desired_caps: PvCaps,
    /// Busy-spin before the fence wait starts polling.
    pub fence_spin: Duration,
    /// How long to poll for a fence after the spin.
    pub fence_timeout: Duration,
    /// Sleep between polls; zero yields instead.
    pub fence_poll: Duration,
}

impl Default for PvConfig {
    fn default() -> Self {
        Self {
            desired_caps: PvCaps::all(),
            fence_spin: Duration::from_micros(5),
            fence_timeout: Duration::from_millis(10),
            fence_poll: Duration::ZERO,
        }
    }
}

impl PvConfig {
    /// Defaults overlaid with `PVGPU_*` variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            desired_caps: env_get_bits("PVGPU_CAPS")
                .map(PvCaps::from_bits_truncate)
                .unwrap_or(d.desired_caps),
            fence_spin: env_get_micros("PVGPU_FENCE_SPIN_US", d.fence_spin),
            fence_timeout: env_get_millis("PVGPU_FENCE_TIMEOUT_MS", d.fence_timeout),
            fence_poll: env_get_micros("PVGPU_FENCE_POLL_US", d.fence_poll),
        }
    }

    pub fn desired_caps(mut self, caps: PvCaps) -> Self {
        self.desired_caps = caps;
        self
    }

    pub fn fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout = timeout;
        self
    }

    pub fn fence_spin(mut self, spin: Duration) -> Self {
        self.fence_spin = spin;
        self
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.fence_spin.is_zero() && self.fence_timeout.is_zero() {
            return Err("fence wait must be bounded by a non-zero duration");
        }
        if self.fence_poll > self.fence_timeout {
            return Err("fence_poll exceeds fence_timeout");
        }
        Ok(())
    }

    pub fn fence_wait(&self) -> BoundedWait {
        BoundedWait::new(self.fence_spin, self.fence_timeout).with_poll_interval(self.fence_poll)
    }
}
