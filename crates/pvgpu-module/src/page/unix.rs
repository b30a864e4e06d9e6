//! Page allocation via anonymous mmap.

use std::ptr::{self, NonNull};

use nix::errno::Errno;
use pvgpu_core::error::{PvError, Result};

/// mmap returns zero-filled, page-aligned memory.
pub(super) fn alloc_page(len: usize) -> Result<NonNull<u8>> {
    let base = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if base == libc::MAP_FAILED {
        return Err(PvError::Os(Errno::last() as i32));
    }
    NonNull::new(base as *mut u8).ok_or(PvError::Setup("mmap returned null"))
}

/// # Safety
/// `base`/`len` must come from `alloc_page`.
pub(super) unsafe fn free_page(base: NonNull<u8>, len: usize) {
    libc::munmap(base.as_ptr() as *mut libc::c_void, len);
}
