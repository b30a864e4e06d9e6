//! `PvChannel` - fence-tagged request/reply over the command ring.
//!
//! One synchronous request in flight per send: the caller holds the send
//! lock from fence allocation until the host's reply (or a timeout), which
//! serializes every message on the ring.
//!
//! ```text
//! send(action, payload)
//!   lock
//!   fence = next_fence()            wraps, skips 0
//!   ring.write_message(...)         RingFull -> return, no notify
//!   regs.write_g2v_notify(PV_SEND_TRIGGER)
//!   wait(desc.fence == fence)       spin, then poll, bounded
//!   desc.status == 0 ? Ok : Protocol(status)
//! ```

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pvgpu_core::action::ActionCode;
use pvgpu_core::error::{PvError, Result};
use pvgpu_core::message::MAX_PAYLOAD_WORDS;
use pvgpu_core::regs::{g2v, PvRegisters};
use pvgpu_core::wait::BoundedWait;
use pvgpu_core::{kerror, ktrace};

use crate::command_ring::CommandRing;
use crate::page::MmapSharedPage;

struct Sender {
    ring: CommandRing,
    next_fence: u32,
}

impl Sender {
    /// Strictly increasing for the life of the channel; 0 is never issued
    /// since it is the descriptor's initial value.
    fn next_fence(&mut self) -> u32 {
        self.next_fence = self.next_fence.wrapping_add(1);
        if self.next_fence == 0 {
            self.next_fence = 1;
        }
        self.next_fence
    }
}

pub struct PvChannel {
    page: Arc<MmapSharedPage>,
    regs: Arc<dyn PvRegisters>,
    sender: Mutex<Sender>,
    fence_wait: BoundedWait,
}

impl PvChannel {
    pub fn new(
        page: Arc<MmapSharedPage>,
        regs: Arc<dyn PvRegisters>,
        fence_wait: BoundedWait,
    ) -> Result<Self> {
        let ring = CommandRing::new(Arc::clone(&page))?;
        Ok(Self {
            page,
            regs,
            sender: Mutex::new(Sender {
                ring,
                next_fence: 0,
            }),
            fence_wait,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Sender> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send one action and wait for the host to complete it.
    ///
    /// Only a zero status is success; anything else comes back as
    /// `PvError::Protocol(status)`.
    pub fn send(&self, action: ActionCode, payload: &[u32]) -> Result<()> {
        if payload.len() > MAX_PAYLOAD_WORDS {
            return Err(PvError::EncodingTooLarge {
                words: payload.len(),
                max: MAX_PAYLOAD_WORDS,
            });
        }

        let mut sender = self.lock();
        let fence = sender.next_fence();
        if let Err(e) = sender.ring.write_message(action.code(), fence, payload) {
            kerror!("PV: send action {:#X} failed: {}", action.code(), e);
            return Err(e);
        }
        ktrace!("PV: sent {} fence={} words={}", action, fence, payload.len());

        self.regs.write_g2v_notify(g2v::PV_SEND_TRIGGER);

        let desc = self.page.descriptor();
        if self
            .fence_wait
            .wait(|| desc.fence.load(Ordering::Acquire) == fence)
            .is_err()
        {
            let reported = desc.fence.load(Ordering::Acquire);
            kerror!("CT: fence {} failed; reported fence={}", fence, reported);
            return Err(PvError::Timeout { fence, reported });
        }

        let status = desc.status.load(Ordering::Acquire);
        if status != 0 {
            kerror!(
                "PV: send action {:#X} failed; status={:#x}",
                action.code(),
                status
            );
            return Err(PvError::Protocol(status as i32));
        }
        Ok(())
    }

    /// Last fence issued, 0 before the first send.
    pub fn last_fence(&self) -> u32 {
        self.lock().next_fence
    }

    /// Host address for a guest buffer passed by reference in a payload.
    #[inline]
    pub fn guest_phys<T>(&self, buf: &[T]) -> u64 {
        self.regs.guest_phys(buf.as_ptr() as usize)
    }

    pub fn page(&self) -> &Arc<MmapSharedPage> {
        &self.page
    }

    #[cfg(test)]
    pub(crate) fn set_next_fence(&self, fence: u32) {
        self.lock().next_fence = fence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{HostMode, LoopbackHost};
    use pvgpu_core::message::Message;
    use std::time::Duration;

    fn channel(host: &Arc<LoopbackHost>) -> PvChannel {
        let page = Arc::new(MmapSharedPage::allocate().unwrap());
        page.init_transport();
        host.attach(page.view());
        let wait = BoundedWait::new(Duration::from_micros(5), Duration::from_millis(5));
        PvChannel::new(page, Arc::clone(host) as Arc<dyn PvRegisters>, wait).unwrap()
    }

    #[test]
    fn test_fences_start_at_one_and_increase() {
        let host = Arc::new(LoopbackHost::new(0));
        let ch = channel(&host);
        for _ in 0..5 {
            ch.send(ActionCode::PpgttL4Alloc, &[1, 2]).unwrap();
        }
        let fences: Vec<u32> = host.messages().iter().map(|m| m.fence).collect();
        assert_eq!(fences, vec![1, 2, 3, 4, 5]);
        assert_eq!(ch.last_fence(), 5);
        assert_eq!(host.notify_count(), 5);
    }

    #[test]
    fn test_message_reaches_host_intact() {
        let host = Arc::new(LoopbackHost::new(0));
        let ch = channel(&host);
        ch.send(ActionCode::GgttInsert, &[7, 8, 9]).unwrap();
        assert_eq!(
            host.messages(),
            vec![Message::new(ActionCode::GgttInsert.code(), 1, &[7, 8, 9])]
        );
        let d = ch.page().descriptor().snapshot();
        assert_eq!(d.head, d.tail);
    }

    #[test]
    fn test_nonzero_status_is_protocol_error() {
        let host = Arc::new(LoopbackHost::new(0));
        let ch = channel(&host);
        host.set_mode(HostMode::Reject(5));
        assert_eq!(
            ch.send(ActionCode::PpgttBind, &[]),
            Err(PvError::Protocol(5))
        );
        host.set_mode(HostMode::Reject((-22i32) as u32));
        assert_eq!(
            ch.send(ActionCode::PpgttBind, &[]),
            Err(PvError::Protocol(-22))
        );
    }

    #[test]
    fn test_timeout_then_recovery() {
        let host = Arc::new(LoopbackHost::new(0));
        let ch = channel(&host);
        host.set_mode(HostMode::Silent);
        assert_eq!(
            ch.send(ActionCode::PpgttL4Clear, &[1]),
            Err(PvError::Timeout {
                fence: 1,
                reported: 0
            })
        );

        host.set_mode(HostMode::Normal);
        ch.send(ActionCode::PpgttL4Clear, &[2]).unwrap();
        // host drained the stale message too, in order
        let fences: Vec<u32> = host.messages().iter().map(|m| m.fence).collect();
        assert_eq!(fences, vec![1, 2]);
    }

    #[test]
    fn test_ring_full_does_not_notify() {
        let host = Arc::new(LoopbackHost::new(0));
        let page = Arc::new(MmapSharedPage::allocate().unwrap());
        page.init_transport();
        host.attach(page.view());
        let ch = PvChannel::new(
            page,
            Arc::clone(&host) as Arc<dyn PvRegisters>,
            BoundedWait::spin_only(Duration::from_micros(50)),
        )
        .unwrap();
        host.set_mode(HostMode::Silent);

        let payload = [0u32; 30];
        for _ in 0..15 {
            assert!(matches!(
                ch.send(ActionCode::PpgttL4Insert, &payload),
                Err(PvError::Timeout { .. })
            ));
        }
        let notifies = host.notify_count();
        assert_eq!(
            ch.send(ActionCode::PpgttL4Insert, &payload),
            Err(PvError::RingFull)
        );
        assert_eq!(host.notify_count(), notifies);
    }

    #[test]
    fn test_oversized_payload_rejected_before_ring() {
        let host = Arc::new(LoopbackHost::new(0));
        let ch = channel(&host);
        assert_eq!(
            ch.send(ActionCode::GgttBind, &[0; 31]),
            Err(PvError::EncodingTooLarge { words: 31, max: 30 })
        );
        assert_eq!(host.notify_count(), 0);
        assert_eq!(ch.last_fence(), 0);
    }

    #[test]
    fn test_fence_wrap_skips_zero() {
        let host = Arc::new(LoopbackHost::new(0));
        let ch = channel(&host);
        ch.set_next_fence(u32::MAX - 1);
        ch.send(ActionCode::CtxPin, &[]).unwrap();
        ch.send(ActionCode::CtxPin, &[]).unwrap();
        let fences: Vec<u32> = host.messages().iter().map(|m| m.fence).collect();
        assert_eq!(fences, vec![u32::MAX, 1]);
    }
}
