//! Operation families that can be served natively or over the PV channel.
//!
//! The driver picks one backend per family at negotiation time and calls it
//! through these traits; callers never branch on capabilities themselves.
//!
//! # Implementors
//!
//! - `PvPpgtt`, `PvGgtt`, `PvContextOps` (pvgpu-module): forward to the host
//! - `PpgttDispatch`, `GgttDispatch`, `ContextDispatch` (pvgpu-module):
//!   native-or-PV enums

use std::sync::atomic::{AtomicU32, Ordering};

use crate::constants::PAGE_SHIFT;
use crate::error::Result;

/// Page tables for this VMA have been allocated by the host.
pub const VMA_ALLOC: u32 = 1 << 0;
/// Bound into the global table.
pub const VMA_GLOBAL_BIND: u32 = 1 << 1;
/// Bound into a per-process table.
pub const VMA_LOCAL_BIND: u32 = 1 << 2;

/// A GPU virtual address range and the pages backing it.
#[derive(Debug)]
pub struct Vma {
    pub start: u64,
    /// Page-aligned DMA addresses, one per page.
    pub pages: Vec<u64>,
    bind_flags: AtomicU32,
}

impl Vma {
    pub fn new(start: u64, pages: Vec<u64>) -> Self {
        Self {
            start,
            pages,
            bind_flags: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn num_pages(&self) -> usize {
        self.pages.len()
    }

    /// Length in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        (self.pages.len() as u64) << PAGE_SHIFT
    }

    #[inline]
    pub fn bind_flags(&self) -> u32 {
        self.bind_flags.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_bind_flags(&self, flags: u32) {
        self.bind_flags.fetch_or(flags, Ordering::AcqRel);
    }

    #[inline]
    pub fn clear_bind_flags(&self, flags: u32) {
        self.bind_flags.fetch_and(!flags, Ordering::AcqRel);
    }

    /// Clear `flags`, returning true if any of them were set.
    #[inline]
    pub fn test_and_clear(&self, flags: u32) -> bool {
        self.bind_flags.fetch_and(!flags, Ordering::AcqRel) & flags != 0
    }
}

/// Per-process page table operations.
pub trait PageTableOps: Send + Sync {
    fn allocate_va_range(&self, start: u64, length: u64) -> Result<()>;
    fn clear_range(&self, start: u64, length: u64) -> Result<()>;
    fn insert_entries(&self, vma: &Vma, pte_flags: u64) -> Result<()>;
    fn bind_vma(&self, vma: &Vma, pte_flags: u64, flags: u32) -> Result<()>;
    /// Only tears down ranges this table actually allocated.
    fn unbind_vma(&self, vma: &Vma) -> Result<()>;
}

/// Global page table operations.
pub trait GgttOps: Send + Sync {
    fn insert_entries(&self, vma: &Vma, pte_flags: u64) -> Result<()>;
    fn bind_vma(&self, vma: &Vma, pte_flags: u64, flags: u32) -> Result<()>;
    fn unbind_vma(&self, vma: &Vma) -> Result<()>;
}

/// Hardware context lifecycle.
pub trait ContextOps: Send + Sync {
    fn alloc(&self, engine: u32, ctx_gpa: u64) -> Result<()>;
    fn destroy(&self, engine: u32, ctx_gpa: u64) -> Result<()>;
    fn pin(&self, engine: u32, ctx_gpa: u64) -> Result<()>;
    fn unpin(&self, engine: u32, ctx_gpa: u64) -> Result<()>;
    fn reset(&self, engine: u32, ctx_gpa: u64) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vma_size() {
        let vma = Vma::new(0x1000, vec![0x10_000, 0x20_000, 0x30_000]);
        assert_eq!(vma.num_pages(), 3);
        assert_eq!(vma.size(), 3 * 4096);
    }

    #[test]
    fn test_alloc_bit_test_and_clear() {
        let vma = Vma::new(0, vec![0]);
        assert!(!vma.test_and_clear(VMA_ALLOC));
        vma.set_bind_flags(VMA_ALLOC | VMA_LOCAL_BIND);
        assert!(vma.test_and_clear(VMA_ALLOC));
        assert!(!vma.test_and_clear(VMA_ALLOC));
        assert_eq!(vma.bind_flags(), VMA_LOCAL_BIND);
    }
}
