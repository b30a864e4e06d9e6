//! Page allocation through the global allocator on targets without mmap.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use pvgpu_core::error::{PvError, Result};

fn layout(len: usize) -> Result<Layout> {
    Layout::from_size_align(len, len).map_err(|_| PvError::Setup("bad page layout"))
}

pub(super) fn alloc_page(len: usize) -> Result<NonNull<u8>> {
    let layout = layout(len)?;
    // Safety: layout has non-zero size
    let base = unsafe { alloc::alloc_zeroed(layout) };
    NonNull::new(base).ok_or(PvError::Setup("page allocation failed"))
}

/// # Safety
/// `base`/`len` must come from `alloc_page`.
pub(super) unsafe fn free_page(base: NonNull<u8>, len: usize) {
    if let Ok(layout) = layout(len) {
        alloc::dealloc(base.as_ptr(), layout);
    }
}
