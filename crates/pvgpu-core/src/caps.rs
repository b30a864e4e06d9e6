//! PV capability negotiation.
//!
//! The guest reads the host's capability register, intersects it with the
//! set it wants, and writes the result back. Only capabilities present in
//! the final set may be used; an empty set means the device runs natively.

use core::fmt;

use bitflags::bitflags;

bitflags! {
    /// Capability bitset shared with the host through the caps register.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct PvCaps: u32 {
        /// Per-process page table operations.
        const PPGTT = 1 << 0;
        /// Global page table operations.
        const GGTT = 1 << 1;
        /// Workload submission through the shared page.
        const SUBMISSION = 1 << 2;
        /// Hardware context lifecycle actions.
        const HW_CONTEXT = 1 << 3;
        /// Interrupt offload (reserved, negotiated but never driven).
        const INTERRUPT = 1 << 4;
    }
}

impl PvCaps {
    /// Intersect `desired` with whatever the host advertises.
    ///
    /// Unknown host bits are dropped rather than rejected.
    #[inline]
    pub fn negotiate(desired: PvCaps, host_bits: u32) -> PvCaps {
        desired & PvCaps::from_bits_truncate(host_bits)
    }
}

impl fmt::Display for PvCaps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                write!(f, "|")?;
            }
            write!(f, "{}", name)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_intersection() {
        // guest wants {0,1,2}, host offers {1,3}
        let desired = PvCaps::PPGTT | PvCaps::GGTT | PvCaps::SUBMISSION;
        let host = (1 << 1) | (1 << 3);
        assert_eq!(PvCaps::negotiate(desired, host), PvCaps::GGTT);
    }

    #[test]
    fn test_negotiate_empty() {
        assert!(PvCaps::negotiate(PvCaps::all(), 0).is_empty());
        assert!(PvCaps::negotiate(PvCaps::empty(), u32::MAX).is_empty());
    }

    #[test]
    fn test_unknown_host_bits_dropped() {
        let caps = PvCaps::negotiate(PvCaps::all(), u32::MAX);
        assert_eq!(caps, PvCaps::all());
        assert_eq!(caps.bits(), 0x1F);
    }

    #[test]
    fn test_display() {
        assert_eq!(PvCaps::empty().to_string(), "none");
        assert_eq!((PvCaps::PPGTT | PvCaps::SUBMISSION).to_string(), "PPGTT|SUBMISSION");
    }
}
