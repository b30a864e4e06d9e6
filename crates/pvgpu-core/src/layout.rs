//! Shared page region layouts.
//!
//! The page is one 4 KiB frame owned by the guest and mapped by the host.
//! Regions sit at fixed offsets (see [`crate::constants`]):
//!
//! ```text
//!   0     VersionRecord          host writes, guest reads
//!   256   interrupt scratch      reserved
//!   512   SubmissionSlot[6]      guest writes descs, host clears `submitted`
//!   1024  RingDescriptor         split ownership, see below
//!   2048  command ring           guest writes, host reads
//! ```
//!
//! Every cross-side field is an atomic so the guest never needs `unsafe`
//! to touch the page once it holds a reference to a region. Publication
//! follows one rule: payload stores happen-before the index/flag store that
//! makes them visible (Release), and the consumer loads that index/flag with
//! Acquire before reading the payload.

use core::mem::size_of;
use core::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};

use crate::constants::{
    PAGE_SIZE, PV_CMD_OFF, PV_DESC_OFF, PV_ELSP_OFF, PV_INTERRUPT_OFF, PV_MAX_ENGINES,
    PV_MAX_PORTS, PV_VERSION_OFF, WORD_SIZE,
};

// ── Version record ──

/// Protocol version advertised by the host during shared page setup.
#[repr(C)]
pub struct VersionRecord {
    pub major: AtomicU16,
    pub minor: AtomicU16,
}

impl VersionRecord {
    /// Snapshot as `(major, minor)`.
    #[inline]
    pub fn get(&self) -> (u16, u16) {
        (
            self.major.load(Ordering::Acquire),
            self.minor.load(Ordering::Acquire),
        )
    }

    /// Host side: publish a version.
    #[inline]
    pub fn set(&self, major: u16, minor: u16) {
        self.minor.store(minor, Ordering::Relaxed);
        self.major.store(major, Ordering::Release);
    }
}

// ── Command transport descriptor ──

/// Command transport buffer descriptor.
///
/// Ownership:
/// - guest: `addr`, `size`, `tail`
/// - host: `head`, `fence`, `status`
///
/// `head` and `tail` are byte offsets into the ring, always multiples of 4
/// and strictly less than `size`.
#[repr(C)]
pub struct RingDescriptor {
    /// Offset of the ring storage inside the shared page.
    pub addr: AtomicU32,
    /// Ring size in bytes.
    pub size: AtomicU32,
    pub head: AtomicU32,
    pub tail: AtomicU32,
    /// Last fence value the host completed.
    pub fence: AtomicU32,
    /// Completion status of that fence; 0 is success.
    pub status: AtomicU32,
}

/// Plain copy of a descriptor, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DescriptorSnapshot {
    pub addr: u32,
    pub size: u32,
    pub head: u32,
    pub tail: u32,
    pub fence: u32,
    pub status: u32,
}

impl RingDescriptor {
    /// Guest side: point the descriptor at the ring and clear all indices.
    pub fn reset(&self, addr: u32, size: u32) {
        self.addr.store(addr, Ordering::Relaxed);
        self.size.store(size, Ordering::Relaxed);
        self.head.store(0, Ordering::Relaxed);
        self.fence.store(0, Ordering::Relaxed);
        self.status.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Release);
    }

    pub fn snapshot(&self) -> DescriptorSnapshot {
        DescriptorSnapshot {
            addr: self.addr.load(Ordering::Relaxed),
            size: self.size.load(Ordering::Relaxed),
            head: self.head.load(Ordering::Acquire),
            tail: self.tail.load(Ordering::Acquire),
            fence: self.fence.load(Ordering::Acquire),
            status: self.status.load(Ordering::Acquire),
        }
    }

    /// Host side: complete `fence` with `status`.
    ///
    /// Status is stored before the fence so a guest that observes the fence
    /// also observes its status.
    #[inline]
    pub fn post_reply(&self, fence: u32, status: u32) {
        self.status.store(status, Ordering::Relaxed);
        self.fence.store(fence, Ordering::Release);
    }
}

// ── Submission slot ──

/// Per-engine workload submission slot.
///
/// The guest fills `descs`/`ctx_gpa`, then sets `submitted` and rings the
/// engine doorbell. The host clears `submitted` once it has consumed the
/// slot. Ports past the submitted run are zero.
#[repr(C)]
pub struct SubmissionSlot {
    pub descs: [AtomicU64; PV_MAX_PORTS],
    pub ctx_gpa: [AtomicU64; PV_MAX_PORTS],
    pub submitted: AtomicU32,
    _reserved: u32,
}

impl SubmissionSlot {
    #[inline]
    pub fn is_submitted(&self) -> bool {
        self.submitted.load(Ordering::Acquire) != 0
    }

    /// Write `ports` into the slot, zeroing any port past the end.
    /// Does not set `submitted`.
    pub fn fill(&self, ports: &[(u64, u64)]) {
        for n in 0..PV_MAX_PORTS {
            let (desc, gpa) = ports.get(n).copied().unwrap_or((0, 0));
            self.descs[n].store(desc, Ordering::Relaxed);
            self.ctx_gpa[n].store(gpa, Ordering::Relaxed);
        }
    }

    /// Read back `(desc, ctx_gpa)` for every port.
    pub fn ports(&self) -> [(u64, u64); PV_MAX_PORTS] {
        let mut out = [(0, 0); PV_MAX_PORTS];
        for (n, port) in out.iter_mut().enumerate() {
            *port = (
                self.descs[n].load(Ordering::Relaxed),
                self.ctx_gpa[n].load(Ordering::Relaxed),
            );
        }
        out
    }

    /// Guest side: clear the slot, including the submitted flag.
    pub fn clear(&self) {
        self.fill(&[]);
        self.submitted.store(0, Ordering::Release);
    }
}

// ── Static layout checks ──

const _: () = assert!(PV_VERSION_OFF + size_of::<VersionRecord>() <= PV_INTERRUPT_OFF);
const _: () = assert!(PV_INTERRUPT_OFF < PV_ELSP_OFF);
const _: () = assert!(size_of::<SubmissionSlot>() == 72);
const _: () = assert!(PV_ELSP_OFF % 8 == 0);
const _: () = assert!(PV_ELSP_OFF + PV_MAX_ENGINES * size_of::<SubmissionSlot>() <= PV_DESC_OFF);
const _: () = assert!(size_of::<RingDescriptor>() == 24);
const _: () = assert!(PV_DESC_OFF + size_of::<RingDescriptor>() <= PV_CMD_OFF);
const _: () = assert!(PV_CMD_OFF % WORD_SIZE == 0 && PV_CMD_OFF < PAGE_SIZE);
