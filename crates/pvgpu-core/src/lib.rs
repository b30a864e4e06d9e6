//! # pvgpu-core
//!
//! Wire-level definitions for the guest side of the vGPU paravirtual (PV)
//! transport. Everything the guest and the host mediator must agree on byte
//! for byte lives here; implementations live in `pvgpu-module` and
//! `pvgpu-submit`.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//!
//! ## Modules
//!
//! - `layout` - `repr(C)` views of the shared page regions
//! - `caps` - PV capability bitset and negotiation
//! - `action` - 16-bit action codes
//! - `message` - command transport message header codec
//! - `args` - fixed-layout argument blocks carried in message payloads
//! - `regs` - register interface to the host (external collaborator)
//! - `ops` - operation-family traits swapped between native and PV backends
//! - `wait` - bounded two-tier polling primitive
//! - `error` - Error taxonomy
//! - `spinlock` - Bounded spinlock for short critical sections
//! - `kprint` - Kernel-style leveled logging macros
//! - `env` - Environment variable utilities

pub mod layout;
pub mod caps;
pub mod action;
pub mod message;
pub mod args;
pub mod regs;
pub mod ops;
pub mod wait;
pub mod error;
pub mod spinlock;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use action::ActionCode;
pub use args::{PageTableRange, PvHwCtx, PvVma};
pub use caps::PvCaps;
pub use error::{PvError, Result};
pub use layout::{RingDescriptor, SubmissionSlot, VersionRecord};
pub use message::{Message, MessageHeader};
pub use regs::PvRegisters;
pub use spinlock::SpinLock;
pub use wait::{BoundedWait, WaitTimeout};

/// Shared page geometry.
///
/// The host mediator hard-codes the same offsets; changing any of them is a
/// protocol break and must bump `PV_MAJOR`.
pub mod constants {
    /// Size of the shared page.
    pub const PAGE_SIZE: usize = 4096;

    /// log2(PAGE_SIZE), used to turn byte lengths into page counts.
    pub const PAGE_SHIFT: u32 = 12;

    /// Protocol version the guest speaks. The host must match exactly.
    pub const PV_MAJOR: u16 = 1;
    pub const PV_MINOR: u16 = 0;

    /// Version record `{major, minor}`.
    pub const PV_VERSION_OFF: usize = 0;

    /// Interrupt scratch area (reserved, owned by the interrupt offload path).
    pub const PV_INTERRUPT_OFF: usize = PAGE_SIZE / 16;

    /// Per-engine workload submission slots.
    pub const PV_ELSP_OFF: usize = PAGE_SIZE / 8;

    /// Command transport buffer descriptor.
    pub const PV_DESC_OFF: usize = PAGE_SIZE / 4;

    /// Command transport ring storage, runs to the end of the page.
    pub const PV_CMD_OFF: usize = PAGE_SIZE / 2;
    pub const PV_CMD_SIZE: usize = PAGE_SIZE - PV_CMD_OFF;

    /// Engines with a submission slot in the shared page.
    pub const PV_MAX_ENGINES: usize = 6;

    /// Hardware submission ports per engine.
    pub const PV_MAX_PORTS: usize = 4;

    /// Ring word size in bytes. All descriptor offsets are multiples of it.
    pub const WORD_SIZE: usize = 4;

    /// Stack scratch used to assemble one message (header + fence + payload).
    pub const MSG_SCRATCH_WORDS: usize = 32;

    /// Most backing pages one VMA message may describe: one page of u64
    /// addresses in the auxiliary buffer.
    pub const MAX_BACKING_PAGES: usize = PAGE_SIZE / 8;
}
