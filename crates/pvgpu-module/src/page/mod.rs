//! The shared page: one zeroed, page-aligned frame the host maps.
//!
//! [`PageView`] hands out typed references to the regions described in
//! `pvgpu_core::layout`. [`MmapSharedPage`] owns the frame and frees it on
//! drop. The host side (see `LoopbackHost`) builds a `PageView` from the
//! address the guest published.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        use unix as sys;
    } else {
        mod fallback;
        use fallback as sys;
    }
}

use std::ops::Deref;
use std::ptr::NonNull;
use std::slice;
use std::sync::atomic::AtomicU32;

use pvgpu_core::constants::{
    PAGE_SIZE, PV_CMD_OFF, PV_CMD_SIZE, PV_DESC_OFF, PV_ELSP_OFF, PV_INTERRUPT_OFF,
    PV_MAX_ENGINES, PV_VERSION_OFF, WORD_SIZE,
};
use pvgpu_core::error::Result;
use pvgpu_core::layout::{RingDescriptor, SubmissionSlot, VersionRecord};

/// Typed, non-owning view of a shared page.
#[derive(Clone, Copy)]
pub struct PageView {
    base: NonNull<u8>,
}

// Safety: every region is accessed through atomics
unsafe impl Send for PageView {}
unsafe impl Sync for PageView {}

impl PageView {
    /// # Safety
    /// - `base` must point to `PAGE_SIZE` bytes, aligned to `PAGE_SIZE`,
    ///   valid for reads and writes for as long as the view (or anything
    ///   borrowed from it) is used.
    pub unsafe fn from_ptr(base: *mut u8) -> Option<Self> {
        NonNull::new(base).map(|base| Self { base })
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    #[inline]
    unsafe fn at<T>(&self, offset: usize) -> &T {
        &*(self.base.as_ptr().add(offset) as *const T)
    }

    #[inline]
    pub fn version(&self) -> &VersionRecord {
        unsafe { self.at(PV_VERSION_OFF) }
    }

    #[inline]
    pub fn descriptor(&self) -> &RingDescriptor {
        unsafe { self.at(PV_DESC_OFF) }
    }

    /// Submission slot for `engine`, `None` past the slot table.
    #[inline]
    pub fn slot(&self, engine: usize) -> Option<&SubmissionSlot> {
        if engine >= PV_MAX_ENGINES {
            return None;
        }
        let off = PV_ELSP_OFF + engine * std::mem::size_of::<SubmissionSlot>();
        Some(unsafe { self.at(off) })
    }

    /// Command ring storage as words.
    #[inline]
    pub fn ring(&self) -> &[AtomicU32] {
        unsafe {
            slice::from_raw_parts(
                self.base.as_ptr().add(PV_CMD_OFF) as *const AtomicU32,
                PV_CMD_SIZE / WORD_SIZE,
            )
        }
    }

    /// Interrupt scratch area. Reserved; nothing in the transport writes it.
    #[inline]
    pub fn interrupt_area(&self) -> &[AtomicU32] {
        unsafe {
            slice::from_raw_parts(
                self.base.as_ptr().add(PV_INTERRUPT_OFF) as *const AtomicU32,
                (PV_ELSP_OFF - PV_INTERRUPT_OFF) / WORD_SIZE,
            )
        }
    }

    /// Point the descriptor at the ring and clear every slot. Guest side,
    /// before the first message.
    pub fn init_transport(&self) {
        self.descriptor()
            .reset(PV_CMD_OFF as u32, PV_CMD_SIZE as u32);
        for engine in 0..PV_MAX_ENGINES {
            if let Some(slot) = self.slot(engine) {
                slot.clear();
            }
        }
    }
}

/// Owned shared page.
pub struct MmapSharedPage {
    view: PageView,
}

impl MmapSharedPage {
    /// Allocate one zeroed page.
    pub fn allocate() -> Result<Self> {
        let base = sys::alloc_page(PAGE_SIZE)?;
        Ok(Self {
            view: PageView { base },
        })
    }

    #[inline]
    pub fn view(&self) -> PageView {
        self.view
    }
}

impl Deref for MmapSharedPage {
    type Target = PageView;

    fn deref(&self) -> &PageView {
        &self.view
    }
}

impl Drop for MmapSharedPage {
    fn drop(&mut self) {
        // Safety: allocated by sys::alloc_page with the same size
        unsafe { sys::free_page(self.view.base, PAGE_SIZE) };
    }
}
