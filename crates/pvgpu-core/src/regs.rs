//! Register interface to the host mediator.
//!
//! MMIO register access is an external collaborator: this crate only names
//! the registers the PV transport touches. A real driver maps them onto the
//! device BAR; tests use `pvgpu_module::LoopbackHost`.
//!
//! # Implementors
//!
//! - `LoopbackHost` (pvgpu-module): in-process host for tests and smoke runs

/// Values written to the guest-to-host notify register.
pub mod g2v {
    /// Shared page address has been written; host should map it and fill
    /// in the version record.
    pub const SHARED_PAGE_SETUP: u32 = 8;
    /// New messages are on the command ring.
    pub const PV_SEND_TRIGGER: u32 = 9;
}

/// Guest view of the host's PV registers.
///
/// Register writes are posted and cannot fail. Implementations must be
/// callable from any thread.
pub trait PvRegisters: Send + Sync {
    /// Shared page guest-physical address register.
    fn read_shared_page_gpa(&self) -> u64;
    fn write_shared_page_gpa(&self, gpa: u64);

    /// PV capability register. Reads return the host offer until the guest
    /// writes the negotiated set.
    fn read_pv_caps(&self) -> u32;
    fn write_pv_caps(&self, caps: u32);

    /// Guest-to-host notify register (see [`g2v`]).
    fn write_g2v_notify(&self, value: u32);

    /// Per-engine submission doorbell.
    fn write_submit_doorbell(&self, engine: usize, value: u32);

    /// Translate a guest virtual address into the address the host uses to
    /// reach it. The default is identity, which is what an in-process host
    /// wants.
    fn guest_phys(&self, va: usize) -> u64 {
        va as u64
    }
}
