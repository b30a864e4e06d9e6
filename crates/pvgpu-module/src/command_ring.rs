//! `CommandRing` - guest producer side of the command transport ring.
//!
//! Single producer (the channel, under its send lock), single consumer
//! (the host). Indices live in the shared `RingDescriptor` as byte offsets;
//! this side works in words and converts at the boundary.
//!
//! # Occupancy
//!
//! ```text
//! used = tail >= head ? tail - head : size - head + tail
//! ```
//!
//! A message of `len + 1` words is accepted only if
//! `used + len + 1 < size`, so one word always stays free and `head == tail`
//! unambiguously means empty.
//!
//! # Publication
//!
//! Header, fence and payload words are stored Relaxed, then `tail` is
//! stored Release. The host never sees a tail covering words it cannot read.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use pvgpu_core::constants::WORD_SIZE;
use pvgpu_core::error::{PvError, Result};
use pvgpu_core::message::MessageHeader;

use crate::page::MmapSharedPage;

pub struct CommandRing {
    page: Arc<MmapSharedPage>,
    /// Ring size in words, cached from the descriptor at construction.
    size: u32,
}

impl CommandRing {
    /// Wrap the ring of an initialized page (see `PageView::init_transport`).
    pub fn new(page: Arc<MmapSharedPage>) -> Result<Self> {
        let bytes = page.descriptor().size.load(Ordering::Relaxed);
        let size = bytes / WORD_SIZE as u32;
        if size < 2 || size as usize > page.ring().len() || bytes % WORD_SIZE as u32 != 0 {
            return Err(PvError::Setup("ring descriptor not initialized"));
        }
        Ok(Self { page, size })
    }

    /// Ring size in words.
    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Host head, in words, validated against the ring size.
    fn head(&self) -> Result<u32> {
        let head = self.page.descriptor().head.load(Ordering::Acquire);
        if head % WORD_SIZE as u32 != 0 || head / WORD_SIZE as u32 >= self.size {
            return Err(PvError::Malformed("host ring head out of range"));
        }
        Ok(head / WORD_SIZE as u32)
    }

    #[inline]
    fn tail(&self) -> u32 {
        self.page.descriptor().tail.load(Ordering::Relaxed) / WORD_SIZE as u32
    }

    /// Words currently queued and not yet consumed by the host.
    pub fn occupancy(&self) -> Result<u32> {
        let head = self.head()?;
        let tail = self.tail();
        Ok(if tail >= head {
            tail - head
        } else {
            self.size - head + tail
        })
    }

    /// Append one message and publish the new tail.
    ///
    /// Fails with `RingFull` without touching the ring when the message does
    /// not fit.
    pub fn write_message(&mut self, action: u16, fence: u32, payload: &[u32]) -> Result<()> {
        let header = MessageHeader::new(action, payload.len())?;
        let used = self.occupancy()?;
        let len = header.len();
        if used + len + 1 >= self.size {
            return Err(PvError::RingFull);
        }

        let ring = self.page.ring();
        let mut tail = self.tail();
        let mut push = |word: u32| {
            ring[tail as usize].store(word, Ordering::Relaxed);
            tail = (tail + 1) % self.size;
        };
        push(header.raw());
        push(fence);
        for &word in payload {
            push(word);
        }

        self.page
            .descriptor()
            .tail
            .store(tail * WORD_SIZE as u32, Ordering::Release);
        Ok(())
    }
}
