//! Fixed-layout argument blocks carried in message payloads.
//!
//! Both blocks are packed little-endian, u64 fields split low word first.

use crate::constants::{PAGE_SHIFT, PAGE_SIZE};
use crate::error::{PvError, Result};

#[inline]
fn split(v: u64) -> [u32; 2] {
    [v as u32, (v >> 32) as u32]
}

#[inline]
fn join(lo: u32, hi: u32) -> u64 {
    (lo as u64) | ((hi as u64) << 32)
}

/// VMA argument block for page-table and bind actions.
///
/// `dma_addrs` holds either one page address OR'ed with its PTE flags (for a
/// one-page VMA) or the guest-physical address of an auxiliary array of
/// such entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PvVma {
    /// Length in pages.
    pub size: u32,
    pub flags: u32,
    pub start: u64,
    pub dma_addrs: u64,
    /// Page-table root.
    pub pml4: u64,
}

impl PvVma {
    pub const WORDS: usize = 8;

    pub fn to_words(&self) -> [u32; Self::WORDS] {
        let [s_lo, s_hi] = split(self.start);
        let [d_lo, d_hi] = split(self.dma_addrs);
        let [p_lo, p_hi] = split(self.pml4);
        [self.size, self.flags, s_lo, s_hi, d_lo, d_hi, p_lo, p_hi]
    }

    pub fn from_words(words: &[u32]) -> Result<Self> {
        if words.len() != Self::WORDS {
            return Err(PvError::Malformed("vma block must be 8 words"));
        }
        Ok(Self {
            size: words[0],
            flags: words[1],
            start: join(words[2], words[3]),
            dma_addrs: join(words[4], words[5]),
            pml4: join(words[6], words[7]),
        })
    }
}

/// `{table_root, start, length}` for allocate/clear of a VA range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableRange {
    pub table_root: u64,
    pub start: u64,
    /// Length in bytes. Sent as a page count.
    pub length: u64,
}

impl PageTableRange {
    /// Pack into a VMA block. `start` and `length` must be page-aligned and
    /// the page count must fit the 32-bit `size` field.
    pub fn to_vma(&self) -> Result<PvVma> {
        let mask = PAGE_SIZE as u64 - 1;
        if self.start & mask != 0 || self.length & mask != 0 {
            return Err(PvError::Malformed("page table range not page-aligned"));
        }
        let pages = self.length >> PAGE_SHIFT;
        let size = u32::try_from(pages).map_err(|_| PvError::EncodingTooLarge {
            words: usize::try_from(pages).unwrap_or(usize::MAX),
            max: u32::MAX as usize,
        })?;
        Ok(PvVma {
            size,
            flags: 0,
            start: self.start,
            dma_addrs: 0,
            pml4: self.table_root,
        })
    }

    pub fn from_vma(vma: &PvVma) -> Self {
        Self {
            table_root: vma.pml4,
            start: vma.start,
            length: (vma.size as u64) << PAGE_SHIFT,
        }
    }
}

/// Hardware context argument block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PvHwCtx {
    pub ctx_gpa: u64,
    pub eng_id: u32,
}

impl PvHwCtx {
    pub const WORDS: usize = 3;

    pub fn to_words(&self) -> [u32; Self::WORDS] {
        let [lo, hi] = split(self.ctx_gpa);
        [lo, hi, self.eng_id]
    }

    pub fn from_words(words: &[u32]) -> Result<Self> {
        if words.len() != Self::WORDS {
            return Err(PvError::Malformed("hw context block must be 3 words"));
        }
        Ok(Self {
            ctx_gpa: join(words[0], words[1]),
            eng_id: words[2],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vma_word_order() {
        let vma = PvVma {
            size: 3,
            flags: 0x10,
            start: 0x1_2345_6000,
            dma_addrs: 0xAAAA_BBBB_CCCC_D000,
            pml4: 0x7000,
        };
        let w = vma.to_words();
        assert_eq!(w[0], 3);
        assert_eq!(w[1], 0x10);
        assert_eq!(w[2], 0x2345_6000);
        assert_eq!(w[3], 0x1);
        assert_eq!(w[4], 0xCCCC_D000);
        assert_eq!(w[5], 0xAAAA_BBBB);
        assert_eq!(PvVma::from_words(&w).unwrap(), vma);
    }

    #[test]
    fn test_range_to_pages() {
        let range = PageTableRange {
            table_root: 0x9000,
            start: 0x10_0000,
            length: 16 * 4096,
        };
        let vma = range.to_vma().unwrap();
        assert_eq!(vma.size, 16);
        assert_eq!(PageTableRange::from_vma(&vma), range);
    }

    #[test]
    fn test_range_page_count_overflow() {
        let range = PageTableRange {
            table_root: 0x9000,
            start: 0,
            length: 1 << 44,
        };
        assert!(matches!(
            range.to_vma(),
            Err(PvError::EncodingTooLarge { .. })
        ));

        // the largest count that still fits
        let max = PageTableRange {
            length: (u32::MAX as u64) << PAGE_SHIFT,
            ..range
        };
        let vma = max.to_vma().unwrap();
        assert_eq!(vma.size, u32::MAX);
        assert_eq!(PageTableRange::from_vma(&vma), max);
    }

    #[test]
    fn test_range_unaligned_rejected() {
        let tail = PageTableRange {
            table_root: 0,
            start: 0x10_0000,
            length: 4096 + 100,
        };
        assert!(matches!(tail.to_vma(), Err(PvError::Malformed(_))));
        let start = PageTableRange {
            start: 0x10_0010,
            length: 4096,
            ..tail
        };
        assert!(matches!(start.to_vma(), Err(PvError::Malformed(_))));
    }

    #[test]
    fn test_hwctx_words() {
        let ctx = PvHwCtx {
            ctx_gpa: 0xDEAD_BEEF_0000_1000,
            eng_id: 2,
        };
        assert_eq!(ctx.to_words(), [0x0000_1000, 0xDEAD_BEEF, 2]);
        assert_eq!(PvHwCtx::from_words(&ctx.to_words()).unwrap(), ctx);
        assert!(PvHwCtx::from_words(&[1, 2]).is_err());
    }
}
