//! `LoopbackHost` - in-process host mediator.
//!
//! Implements `PvRegisters` by acting on the guest's shared page directly,
//! synchronously, from inside the register write. Used by tests and by
//! `pvgpu-smoke`; a real driver talks to MMIO instead.
//!
//! Behaviour knobs:
//!
//! | Knob                  | Effect                                              |
//! |-----------------------|-----------------------------------------------------|
//! | `HostMode::Normal`    | drain ring, reply with handler status (default 0)   |
//! | `HostMode::Silent`    | ignore send triggers; fences time out               |
//! | `HostMode::Reject(s)` | drain ring, reply with status `s`                   |
//! | `set_version`         | version written during shared page setup            |
//! | `set_echo_mismatch`   | gpa register reads back a different address         |
//! | `set_ack_doorbell`    | whether doorbells clear the slot's submitted flag   |
//! | `set_recording`       | keep copies of messages and doorbells               |

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use pvgpu_core::action::ActionCode;
use pvgpu_core::constants::{PV_MAJOR, PV_MAX_PORTS, PV_MINOR, WORD_SIZE};
use pvgpu_core::message::{Message, MessageHeader};
use pvgpu_core::regs::{g2v, PvRegisters};
use pvgpu_core::{kdebug, kwarn};

use crate::page::PageView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMode {
    Normal,
    Silent,
    Reject(u32),
}

/// One doorbell as the host saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub engine: usize,
    pub value: u32,
    /// `(desc, ctx_gpa)` for every port, zero past the submitted run.
    pub ports: [(u64, u64); PV_MAX_PORTS],
}

impl Submission {
    /// Ports carrying a descriptor.
    pub fn used_ports(&self) -> usize {
        self.ports.iter().take_while(|(desc, _)| *desc != 0).count()
    }
}

type Handler = Box<dyn Fn(&Message) -> u32 + Send + Sync>;

struct HostState {
    page: Option<PageView>,
    mode: HostMode,
    version: (u16, u16),
    echo_mismatch: bool,
    ack_doorbell: bool,
    recording: bool,
    handler: Option<Handler>,
    messages: Vec<Message>,
    submissions: Vec<Submission>,
}

pub struct LoopbackHost {
    offered_caps: u32,
    caps: AtomicU32,
    gpa: AtomicU64,
    notifies: AtomicUsize,
    doorbells: AtomicUsize,
    state: Mutex<HostState>,
}

impl LoopbackHost {
    /// Host advertising `offered_caps` in the caps register.
    pub fn new(offered_caps: u32) -> Self {
        Self {
            offered_caps,
            caps: AtomicU32::new(offered_caps),
            gpa: AtomicU64::new(0),
            notifies: AtomicUsize::new(0),
            doorbells: AtomicUsize::new(0),
            state: Mutex::new(HostState {
                page: None,
                mode: HostMode::Normal,
                version: (PV_MAJOR, PV_MINOR),
                echo_mismatch: false,
                ack_doorbell: true,
                recording: true,
                handler: None,
                messages: Vec::new(),
                submissions: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Knobs ──

    pub fn set_mode(&self, mode: HostMode) {
        self.state().mode = mode;
    }

    pub fn set_version(&self, major: u16, minor: u16) {
        self.state().version = (major, minor);
    }

    pub fn set_echo_mismatch(&self, on: bool) {
        self.state().echo_mismatch = on;
    }

    pub fn set_ack_doorbell(&self, on: bool) {
        self.state().ack_doorbell = on;
    }

    /// Keep a copy of every message and submission (on by default).
    pub fn set_recording(&self, on: bool) {
        self.state().recording = on;
    }

    /// Compute the reply status per message in `Normal` mode.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&Message) -> u32 + Send + Sync + 'static,
    {
        self.state().handler = Some(Box::new(handler));
    }

    /// Adopt a page without the setup handshake.
    pub fn attach(&self, page: PageView) {
        self.gpa.store(page.as_ptr() as u64, Ordering::Release);
        self.state().page = Some(page);
    }

    /// Clear `submitted` on `engine`'s slot, as a late acknowledgement.
    pub fn ack_submission(&self, engine: usize) {
        if let Some(page) = self.state().page {
            if let Some(slot) = page.slot(engine) {
                slot.submitted.store(0, Ordering::Release);
            }
        }
    }

    // ── Observations ──

    pub fn offered_caps(&self) -> u32 {
        self.offered_caps
    }

    pub fn notify_count(&self) -> usize {
        self.notifies.load(Ordering::Relaxed)
    }

    pub fn doorbell_count(&self) -> usize {
        self.doorbells.load(Ordering::Relaxed)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state().messages.clone()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state().submissions.clone()
    }

    pub fn is_attached(&self) -> bool {
        self.state().page.is_some()
    }

    // ── Host behaviour ──

    fn setup_shared_page(&self, state: &mut HostState) {
        let gpa = self.gpa.load(Ordering::Acquire);
        // Safety: the guest published the address of a live, page-sized
        // allocation and keeps it alive while it talks to us.
        let Some(page) = (unsafe { PageView::from_ptr(gpa as *mut u8) }) else {
            kwarn!("loopback: shared page setup with null address");
            return;
        };
        let (major, minor) = state.version;
        page.version().set(major, minor);
        state.page = Some(page);
        kdebug!("loopback: shared page at {:#x}, version {}.{}", gpa, major, minor);
    }

    fn drain(state: &mut HostState) {
        let Some(page) = state.page else {
            return;
        };
        let desc = page.descriptor();
        let size = desc.size.load(Ordering::Relaxed) / WORD_SIZE as u32;
        if size == 0 {
            return;
        }
        let ring = page.ring();
        let tail = desc.tail.load(Ordering::Acquire) / WORD_SIZE as u32;
        let mut head = desc.head.load(Ordering::Relaxed) / WORD_SIZE as u32;

        while head != tail {
            let header = MessageHeader::from_raw(ring[head as usize].load(Ordering::Relaxed));
            let total = header.total_words() as u32;
            let words: Vec<u32> = (0..total)
                .map(|i| ring[((head + i) % size) as usize].load(Ordering::Relaxed))
                .collect();
            head = (head + total) % size;

            let msg = match Message::from_words(&words) {
                Ok(msg) => msg,
                Err(e) => {
                    kwarn!("loopback: dropping ring contents: {}", e);
                    desc.head.store(tail * WORD_SIZE as u32, Ordering::Release);
                    return;
                }
            };
            let status = match (state.mode, &state.handler) {
                (HostMode::Reject(status), _) => status,
                (_, Some(handler)) => handler(&msg),
                (_, None) => 0,
            };
            desc.head.store(head * WORD_SIZE as u32, Ordering::Release);
            desc.post_reply(msg.fence, status);
            if state.recording {
                state.messages.push(msg);
            }
        }
    }
}

impl PvRegisters for LoopbackHost {
    fn read_shared_page_gpa(&self) -> u64 {
        let gpa = self.gpa.load(Ordering::Acquire);
        if self.state().echo_mismatch {
            gpa ^ 0x1000
        } else {
            gpa
        }
    }

    fn write_shared_page_gpa(&self, gpa: u64) {
        self.gpa.store(gpa, Ordering::Release);
        if gpa == 0 {
            self.state().page = None;
        }
    }

    fn read_pv_caps(&self) -> u32 {
        self.caps.load(Ordering::Acquire)
    }

    fn write_pv_caps(&self, caps: u32) {
        self.caps.store(caps, Ordering::Release);
    }

    fn write_g2v_notify(&self, value: u32) {
        let mut state = self.state();
        match value {
            g2v::SHARED_PAGE_SETUP => self.setup_shared_page(&mut state),
            g2v::PV_SEND_TRIGGER => {
                self.notifies.fetch_add(1, Ordering::Relaxed);
                if state.mode != HostMode::Silent {
                    Self::drain(&mut state);
                }
            }
            other => kwarn!("loopback: unknown g2v notify {}", other),
        }
    }

    fn write_submit_doorbell(&self, engine: usize, value: u32) {
        self.doorbells.fetch_add(1, Ordering::Relaxed);
        if value != ActionCode::ElspSubmission.code() as u32 {
            kwarn!("loopback: engine {} doorbell with value {}", engine, value);
        }
        let mut state = self.state();
        let Some(page) = state.page else {
            return;
        };
        let Some(slot) = page.slot(engine) else {
            return;
        };
        if state.recording {
            state.submissions.push(Submission {
                engine,
                value,
                ports: slot.ports(),
            });
        }
        if state.ack_doorbell {
            slot.submitted.store(0, Ordering::Release);
        }
    }
}
