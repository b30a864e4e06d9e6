//! Requests as the submission engine sees them.
//!
//! The scheduler owns request lifetime; the engine only needs identity,
//! the context to coalesce on, a priority and a handful of state bits.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// Set in a context descriptor when the host must reload the context image
/// instead of continuing from its saved state. Used on resubmission after
/// a reset.
pub const CTX_DESC_FORCE_RESTORE: u64 = 1 << 2;

/// Hardware context a request runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Context {
    pub id: u64,
    /// Guest-physical address of the context image.
    pub gpa: u64,
    /// Context descriptor written into a submission port.
    pub lrc_desc: u64,
}

/// `outcome` before retirement. Any real status fits in an i32.
const NOT_RETIRED: i64 = i64::MIN;

#[derive(Debug)]
pub struct Request {
    id: u64,
    context: Context,
    priority: i32,
    started: AtomicBool,
    completed: AtomicBool,
    stalled: AtomicBool,
    replay: AtomicBool,
    /// Final status, or `NOT_RETIRED`. One word, so the first retire
    /// publishes state and status together.
    outcome: AtomicI64,
}

impl Request {
    pub fn new(id: u64, context: Context, priority: i32) -> Arc<Self> {
        Arc::new(Self {
            id,
            context,
            priority,
            started: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
            replay: AtomicBool::new(false),
            outcome: AtomicI64::new(NOT_RETIRED),
        })
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn context(&self) -> &Context {
        &self.context
    }

    #[inline]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// The GPU began executing this request.
    pub fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// The GPU finished this request. The engine retires it on its next
    /// tasklet run.
    pub fn mark_completed(&self) {
        self.started.store(true, Ordering::Relaxed);
        self.completed.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Blamed for the last engine reset.
    #[inline]
    pub fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_retired(&self) -> bool {
        self.outcome.load(Ordering::Acquire) != NOT_RETIRED
    }

    /// Final status once retired: 0 or a negative errno.
    pub fn status(&self) -> Option<i32> {
        match self.outcome.load(Ordering::Acquire) {
            NOT_RETIRED => None,
            status => Some(status as i32),
        }
    }

    /// Descriptor for a submission port. The first one after a rewind asks
    /// the host to restore the context image.
    pub(crate) fn port_descriptor(&self) -> u64 {
        if self.replay.swap(false, Ordering::AcqRel) {
            self.context.lrc_desc | CTX_DESC_FORCE_RESTORE
        } else {
            self.context.lrc_desc
        }
    }

    pub(crate) fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::Release);
    }

    pub(crate) fn set_replay(&self) {
        self.replay.store(true, Ordering::Release);
    }

    /// Record the final status. The first call wins; later calls return
    /// false and leave the status alone.
    pub(crate) fn retire(&self, status: i32) -> bool {
        self.outcome
            .compare_exchange(
                NOT_RETIRED,
                i64::from(status),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}
