//! Action codes carried in the message header.
//!
//! Codes 0-9 are fixed by the host ABI. The context lifecycle codes extend
//! the table past the submission doorbell value.

use core::fmt;

/// 16-bit action code placed in bits 16-31 of a message header.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionCode {
    Default = 0,
    PpgttL4Alloc = 1,
    PpgttL4Clear = 2,
    PpgttL4Insert = 3,
    PpgttBind = 4,
    PpgttUnbind = 5,
    GgttInsert = 6,
    GgttUnbind = 7,
    GgttBind = 8,
    /// Doorbell value for workload submission; never sent on the ring.
    ElspSubmission = 9,
    CtxAlloc = 10,
    CtxDestroy = 11,
    CtxPin = 12,
    CtxUnpin = 13,
    CtxReset = 14,
}

impl ActionCode {
    pub const ALL: [ActionCode; 15] = [
        Self::Default,
        Self::PpgttL4Alloc,
        Self::PpgttL4Clear,
        Self::PpgttL4Insert,
        Self::PpgttBind,
        Self::PpgttUnbind,
        Self::GgttInsert,
        Self::GgttUnbind,
        Self::GgttBind,
        Self::ElspSubmission,
        Self::CtxAlloc,
        Self::CtxDestroy,
        Self::CtxPin,
        Self::CtxUnpin,
        Self::CtxReset,
    ];

    #[inline]
    pub const fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::PpgttL4Alloc => "PPGTT_L4_ALLOC",
            Self::PpgttL4Clear => "PPGTT_L4_CLEAR",
            Self::PpgttL4Insert => "PPGTT_L4_INSERT",
            Self::PpgttBind => "PPGTT_BIND",
            Self::PpgttUnbind => "PPGTT_UNBIND",
            Self::GgttInsert => "GGTT_INSERT",
            Self::GgttUnbind => "GGTT_UNBIND",
            Self::GgttBind => "GGTT_BIND",
            Self::ElspSubmission => "ELSP_SUBMISSION",
            Self::CtxAlloc => "CTX_ALLOC",
            Self::CtxDestroy => "CTX_DESTROY",
            Self::CtxPin => "CTX_PIN",
            Self::CtxUnpin => "CTX_UNPIN",
            Self::CtxReset => "CTX_RESET",
        }
    }

    /// True for the actions whose payload is a `PvHwCtx` block.
    pub const fn is_context_action(self) -> bool {
        matches!(
            self,
            Self::CtxAlloc | Self::CtxDestroy | Self::CtxPin | Self::CtxUnpin | Self::CtxReset
        )
    }
}

impl TryFrom<u16> for ActionCode {
    type Error = u16;

    fn try_from(code: u16) -> Result<Self, u16> {
        Self::from_code(code).ok_or(code)
    }
}

impl fmt::Display for ActionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:#x})", self.name(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_dense() {
        for (i, action) in ActionCode::ALL.iter().enumerate() {
            assert_eq!(action.code() as usize, i);
            assert_eq!(ActionCode::from_code(i as u16), Some(*action));
        }
    }

    #[test]
    fn test_abi_values() {
        assert_eq!(ActionCode::PpgttL4Alloc.code(), 1);
        assert_eq!(ActionCode::GgttBind.code(), 8);
        assert_eq!(ActionCode::ElspSubmission.code(), 9);
    }

    #[test]
    fn test_unknown_code() {
        assert_eq!(ActionCode::try_from(15), Err(15));
        assert_eq!(ActionCode::try_from(0xFFFF), Err(0xFFFF));
    }

    #[test]
    fn test_display() {
        assert_eq!(ActionCode::ElspSubmission.to_string(), "ELSP_SUBMISSION(0x9)");
    }
}
