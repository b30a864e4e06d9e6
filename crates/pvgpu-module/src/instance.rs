//! `PvInstance` - capability negotiation and shared page lifetime.
//!
//! Negotiation order, as the host mediator expects it:
//!
//! 1. read the caps register, intersect with the desired set, write the
//!    result back; empty means native mode and we stop here
//! 2. allocate a zeroed page, write its address to the gpa register and
//!    read it back
//! 3. notify `SHARED_PAGE_SETUP`; the host maps the page and writes the
//!    version record
//! 4. check the version, then initialize the descriptor and slots
//!
//! Any failure after step 1 writes 0 to the caps and gpa registers, frees
//! the page and reports the error. No PV path may be used in that case.

use std::sync::Arc;

use pvgpu_core::caps::PvCaps;
use pvgpu_core::constants::{PV_MAJOR, PV_MINOR};
use pvgpu_core::error::{PvError, Result};
use pvgpu_core::regs::{g2v, PvRegisters};
use pvgpu_core::{kerror, kinfo};

use crate::actions::PvActions;
use crate::channel::PvChannel;
use crate::config::PvConfig;
use crate::page::MmapSharedPage;

pub struct PvInstanceBuilder {
    config: PvConfig,
}

impl Default for PvInstanceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PvInstanceBuilder {
    pub fn new() -> Self {
        Self {
            config: PvConfig::default(),
        }
    }

    /// Start from `PvConfig::from_env()`.
    pub fn from_env() -> Self {
        Self {
            config: PvConfig::from_env(),
        }
    }

    pub fn config(mut self, config: PvConfig) -> Self {
        self.config = config;
        self
    }

    pub fn desired_caps(mut self, caps: PvCaps) -> Self {
        self.config.desired_caps = caps;
        self
    }

    /// Negotiate with the host behind `regs`.
    ///
    /// Returns an inactive instance (no caps, no page) when the host and
    /// guest share no capability. Errors mean PV is disabled.
    pub fn build<R: PvRegisters + 'static>(self, regs: Arc<R>) -> Result<PvInstance> {
        self.config.validate().map_err(PvError::Config)?;
        let regs: Arc<dyn PvRegisters> = regs;

        let offered = regs.read_pv_caps();
        let caps = PvCaps::negotiate(self.config.desired_caps, offered);
        regs.write_pv_caps(caps.bits());

        if caps.is_empty() {
            kinfo!("vGPU running without PV (host offered {:#x})", offered);
            return Ok(PvInstance {
                regs,
                caps,
                shared: None,
            });
        }

        match establish(&regs, &self.config) {
            Ok(shared) => {
                kinfo!("vGPU PV enabled, caps {}", caps);
                Ok(PvInstance {
                    regs,
                    caps,
                    shared: Some(shared),
                })
            }
            Err(e) => {
                regs.write_pv_caps(0);
                regs.write_shared_page_gpa(0);
                kerror!("PV shared page setup failed: {}", e);
                Err(e)
            }
        }
    }
}

fn establish(regs: &Arc<dyn PvRegisters>, config: &PvConfig) -> Result<Shared> {
    let page = Arc::new(setup_shared_page(&**regs)?);
    let channel = PvChannel::new(Arc::clone(&page), Arc::clone(regs), config.fence_wait())?;
    Ok(Shared {
        page,
        channel: Arc::new(channel),
    })
}

fn setup_shared_page(regs: &dyn PvRegisters) -> Result<MmapSharedPage> {
    let page = MmapSharedPage::allocate()?;
    let gpa = regs.guest_phys(page.as_ptr() as usize);

    regs.write_shared_page_gpa(gpa);
    if regs.read_shared_page_gpa() != gpa {
        return Err(PvError::Setup("shared page address did not read back"));
    }

    regs.write_g2v_notify(g2v::SHARED_PAGE_SETUP);

    let (major, minor) = page.version().get();
    if (major, minor) != (PV_MAJOR, PV_MINOR) {
        return Err(PvError::Version { major, minor });
    }

    page.init_transport();
    Ok(page)
}

struct Shared {
    page: Arc<MmapSharedPage>,
    channel: Arc<PvChannel>,
}

/// Negotiated PV state for one device.
pub struct PvInstance {
    regs: Arc<dyn PvRegisters>,
    caps: PvCaps,
    shared: Option<Shared>,
}

impl PvInstance {
    /// Negotiated capabilities; empty after teardown.
    #[inline]
    pub fn caps(&self) -> PvCaps {
        self.caps
    }

    #[inline]
    pub fn has(&self, cap: PvCaps) -> bool {
        self.caps.contains(cap)
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.shared.is_some()
    }

    /// Fails with `NotNegotiated(cap)` unless `cap` is active.
    pub fn require(&self, cap: PvCaps) -> Result<()> {
        if self.is_active() && self.has(cap) {
            Ok(())
        } else {
            Err(PvError::NotNegotiated(cap))
        }
    }

    pub fn regs(&self) -> &Arc<dyn PvRegisters> {
        &self.regs
    }

    pub fn page(&self) -> Option<&Arc<MmapSharedPage>> {
        self.shared.as_ref().map(|s| &s.page)
    }

    pub fn channel(&self) -> Option<&Arc<PvChannel>> {
        self.shared.as_ref().map(|s| &s.channel)
    }

    /// Action encoders over this instance's channel.
    pub fn actions(&self) -> Option<PvActions> {
        self.channel().map(|ch| PvActions::new(Arc::clone(ch)))
    }

    /// Release the shared page and drop all capabilities. Idempotent.
    ///
    /// Anything still holding the page (a submission engine, a channel
    /// clone) keeps it mapped until it is dropped.
    pub fn teardown(&mut self) {
        if self.shared.take().is_some() {
            self.caps = PvCaps::empty();
            kinfo!("vGPU PV torn down");
        }
    }
}

impl Drop for PvInstance {
    fn drop(&mut self) {
        self.teardown();
    }
}
