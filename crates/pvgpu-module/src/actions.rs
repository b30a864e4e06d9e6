//! `PvActions` - encoders for every action the guest sends on the ring.
//!
//! Page-table and bind actions carry a [`PvVma`]; context actions carry a
//! [`PvHwCtx`]. Backing pages travel one of two ways:
//!
//! - one page: its address OR'ed with the PTE flags, inline in `dma_addrs`
//! - more: an auxiliary array of such entries, passed by guest-physical
//!   address; it lives until the host has replied

use std::sync::Arc;

use pvgpu_core::action::ActionCode;
use pvgpu_core::args::{PageTableRange, PvHwCtx, PvVma};
use pvgpu_core::constants::MAX_BACKING_PAGES;
use pvgpu_core::error::{PvError, Result};
use pvgpu_core::ops::Vma;

use crate::channel::PvChannel;

/// How a VMA's backing pages are described to the host.
#[derive(Debug, PartialEq, Eq)]
pub enum Backing {
    Inline(u64),
    Table(Vec<u64>),
}

impl Backing {
    pub fn for_vma(vma: &Vma, pte_flags: u64) -> Result<Self> {
        match vma.pages.as_slice() {
            [] => Ok(Self::Inline(0)),
            [page] => Ok(Self::Inline(page | pte_flags)),
            pages if pages.len() > MAX_BACKING_PAGES => Err(PvError::EncodingTooLarge {
                words: pages.len() * 2,
                max: MAX_BACKING_PAGES * 2,
            }),
            pages => Ok(Self::Table(pages.iter().map(|p| p | pte_flags).collect())),
        }
    }
}

#[derive(Clone)]
pub struct PvActions {
    channel: Arc<PvChannel>,
}

impl PvActions {
    pub fn new(channel: Arc<PvChannel>) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &Arc<PvChannel> {
        &self.channel
    }

    /// Allocate or clear page tables for a VA range. Unaligned or oversized
    /// ranges fail before anything reaches the ring.
    pub fn page_table_range(&self, action: ActionCode, range: PageTableRange) -> Result<()> {
        let block = range.to_vma()?;
        self.channel.send(action, &block.to_words())
    }

    /// Insert, bind or unbind `vma` under `table_root` (0 for the global
    /// table).
    pub fn vma(
        &self,
        action: ActionCode,
        vma: &Vma,
        flags: u32,
        pte_flags: u64,
        table_root: u64,
    ) -> Result<()> {
        let backing = Backing::for_vma(vma, pte_flags)?;
        let dma_addrs = match &backing {
            Backing::Inline(entry) => *entry,
            Backing::Table(entries) => self.channel.guest_phys(entries),
        };
        let block = PvVma {
            size: vma.num_pages() as u32,
            flags,
            start: vma.start,
            dma_addrs,
            pml4: table_root,
        };
        let result = self.channel.send(action, &block.to_words());
        drop(backing);
        result
    }

    /// Context lifecycle action.
    pub fn context(&self, action: ActionCode, engine: u32, ctx_gpa: u64) -> Result<()> {
        debug_assert!(action.is_context_action());
        let block = PvHwCtx {
            ctx_gpa,
            eng_id: engine,
        };
        self.channel.send(action, &block.to_words())
    }
}
