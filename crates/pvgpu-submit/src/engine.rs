//! `EngineSubmitter` - per-engine submission state machine.
//!
//! ```text
//!   submit ──► Queued ──dequeue──► Submitted ──retire some──► Completing
//!     ▲                                │                          │
//!     └──── Idle ◄──── retire all ─────┴──────────────────────────┘
//! ```
//!
//! The tasklet is the only path that touches the submission slot. It runs
//! on at most one thread at a time per engine; a kick that finds it
//! running sets `rerun` and the running instance loops once more.
//!
//! Each tasklet pass:
//! 1. retire the completed prefix of the in-flight runs, in order
//! 2. stop if dequeue is disabled (reset in progress) or the host has not
//!    cleared `submitted` from the previous doorbell
//! 3. pull ready requests into runs, one run per free port; consecutive
//!    requests of the same context share a run and only the last one is
//!    written into the port
//! 4. fill the slot, set `submitted`, ring the doorbell and wait (bounded)
//!    for the host to clear it
//!
//! Locks: `queues` (Mutex) then `slot_lock` (SpinLock). The doorbell is
//! rung after `queues` is released.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pvgpu_core::action::ActionCode;
use pvgpu_core::error::{PvError, Result};
use pvgpu_core::regs::PvRegisters;
use pvgpu_core::spinlock::SpinLock;
use pvgpu_core::wait::BoundedWait;
use pvgpu_core::{kdebug, kerror, ktrace, kwarn};
use pvgpu_module::page::MmapSharedPage;

use crate::config::SubmitConfig;
use crate::hooks::SchedulerHooks;
use crate::ready_queue::{PriorityQueue, ReadyQueue};
use crate::request::Request;
use crate::worker::TaskletQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Nothing queued, nothing in flight.
    Idle,
    /// Requests waiting, nothing in flight.
    Queued,
    /// A doorbell went out and none of its runs has retired yet.
    Submitted,
    /// Part of the in-flight work has retired.
    Completing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Doorbells rung.
    pub doorbells: u64,
    /// Requests handed to the host.
    pub requests: u64,
    pub retired: u64,
    pub cancelled: u64,
    /// Doorbells the host did not acknowledge in time.
    pub doorbell_timeouts: u64,
    pub resets: u64,
}

#[derive(Default)]
struct Counters {
    doorbells: AtomicU64,
    requests: AtomicU64,
    retired: AtomicU64,
    cancelled: AtomicU64,
    doorbell_timeouts: AtomicU64,
    resets: AtomicU64,
}

#[inline]
fn bump(c: &AtomicU64, n: u64) {
    c.fetch_add(n, Ordering::Relaxed);
}

/// One port's worth of same-context requests, oldest first.
type Run = Vec<Arc<Request>>;

struct Queues {
    ready: Box<dyn ReadyQueue>,
    inflight: VecDeque<Run>,
    state: EngineState,
}

pub struct EngineSubmitter {
    id: usize,
    name: String,
    page: Arc<MmapSharedPage>,
    regs: Arc<dyn PvRegisters>,
    hooks: Arc<dyn SchedulerHooks>,
    config: SubmitConfig,
    queues: Mutex<Queues>,
    slot_lock: SpinLock<()>,
    tasklet: SpinLock<()>,
    rerun: AtomicBool,
    disabled: AtomicU32,
    scheduler: Option<Arc<TaskletQueue>>,
    counters: Counters,
}

impl EngineSubmitter {
    /// `scheduler` is the worker queue tasklets are deferred to; `None`
    /// runs them on the kicking thread.
    pub fn new(
        id: usize,
        page: Arc<MmapSharedPage>,
        regs: Arc<dyn PvRegisters>,
        hooks: Arc<dyn SchedulerHooks>,
        config: SubmitConfig,
        scheduler: Option<Arc<TaskletQueue>>,
    ) -> Result<Self> {
        if page.slot(id).is_none() {
            return Err(PvError::InvalidEngine(id));
        }
        config.validate().map_err(PvError::Config)?;
        Ok(Self {
            id,
            name: format!("engine{}", id),
            page,
            regs,
            hooks,
            config,
            queues: Mutex::new(Queues {
                ready: Box::new(PriorityQueue::new()),
                inflight: VecDeque::new(),
                state: EngineState::Idle,
            }),
            slot_lock: SpinLock::new(()),
            tasklet: SpinLock::new(()),
            rerun: AtomicBool::new(false),
            disabled: AtomicU32::new(0),
            scheduler,
            counters: Counters::default(),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_ready_queue(mut self, ready: Box<dyn ReadyQueue>) -> Self {
        self.queues
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .ready = ready;
        self
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock_queues(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Observation ──

    pub fn state(&self) -> EngineState {
        self.lock_queues().state
    }

    pub fn queued(&self) -> usize {
        self.lock_queues().ready.len()
    }

    /// Requests handed to the host and not yet retired.
    pub fn in_flight(&self) -> usize {
        self.lock_queues().inflight.iter().map(Vec::len).sum()
    }

    /// The host has not yet cleared `submitted` for the last doorbell.
    pub fn is_host_busy(&self) -> bool {
        self.page.slot(self.id).map_or(false, |s| s.is_submitted())
    }

    pub fn is_dequeue_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire) > 0
    }

    pub fn stats(&self) -> EngineStats {
        let c = &self.counters;
        EngineStats {
            doorbells: c.doorbells.load(Ordering::Relaxed),
            requests: c.requests.load(Ordering::Relaxed),
            retired: c.retired.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            doorbell_timeouts: c.doorbell_timeouts.load(Ordering::Relaxed),
            resets: c.resets.load(Ordering::Relaxed),
        }
    }

    // ── Submission ──

    /// Queue `rq` without scheduling the tasklet. A request that already
    /// has a final status is refused and `false` returned.
    pub fn enqueue(&self, rq: Arc<Request>) -> bool {
        if rq.is_retired() {
            kwarn!("{}: refusing retired rq {} (status {:?})", self.name, rq.id(), rq.status());
            return false;
        }
        let mut q = self.lock_queues();
        ktrace!("{}: queue rq {} ctx {}", self.name, rq.id(), rq.context().id);
        q.ready.push(rq);
        if q.state == EngineState::Idle {
            q.state = EngineState::Queued;
        }
        true
    }

    /// Queue `rq` and schedule the tasklet.
    pub fn submit(&self, rq: Arc<Request>) -> bool {
        if !self.enqueue(rq) {
            return false;
        }
        self.kick();
        true
    }

    /// Schedule the tasklet: after new work, after completions, or when
    /// the host acknowledged a late doorbell. No-op while disabled.
    pub fn kick(&self) {
        if self.is_dequeue_disabled() {
            return;
        }
        if let Some(scheduler) = &self.scheduler {
            if scheduler.schedule(self.id) {
                return;
            }
            ktrace!("{}: tasklet worker unavailable, running inline", self.name);
        }
        self.run_tasklet();
    }

    /// Run the tasklet on this thread, or hand the pass to whoever is
    /// already running it.
    pub fn run_tasklet(&self) {
        self.rerun.store(true, Ordering::Release);
        while self.rerun.load(Ordering::Acquire) {
            let Some(_running) = self.tasklet.try_lock() else {
                return;
            };
            while self.rerun.swap(false, Ordering::AcqRel) {
                self.tasklet_pass();
            }
        }
    }

    fn tasklet_pass(&self) {
        let mut q = self.lock_queues();
        let retired = self.retire_completed(&mut q);

        let mut ports = Vec::new();
        if !self.is_dequeue_disabled() && !self.is_host_busy() {
            ports = self.dequeue(&mut q);
        }

        q.state = if !ports.is_empty() {
            EngineState::Submitted
        } else if !q.inflight.is_empty() {
            if retired > 0 {
                EngineState::Completing
            } else {
                q.state
            }
        } else if q.ready.is_empty() {
            EngineState::Idle
        } else {
            EngineState::Queued
        };
        drop(q);

        if !ports.is_empty() {
            self.pv_submit(&ports);
        }
    }

    /// Retire completed requests from the front of the in-flight runs.
    /// Stops at the first incomplete request.
    fn retire_completed(&self, q: &mut Queues) -> usize {
        let mut retired = 0;
        while let Some(run) = q.inflight.front_mut() {
            let done = run.iter().take_while(|rq| rq.is_completed()).count();
            let finished = done == run.len();
            let last = if finished { run.last().cloned() } else { None };
            for rq in run.drain(..done) {
                self.retire(&rq);
                retired += 1;
            }
            if !finished {
                break;
            }
            q.inflight.pop_front();
            if let Some(last) = last {
                self.hooks.schedule_out(&last);
            }
        }
        retired
    }

    fn retire(&self, rq: &Request) {
        if rq.retire(0) {
            self.hooks.retired(rq);
            bump(&self.counters.retired, 1);
        }
    }

    /// Build runs for the free ports. Returns the `(desc, ctx_gpa)` pairs to
    /// write, empty if nothing was dequeued.
    fn dequeue(&self, q: &mut Queues) -> Vec<(u64, u64)> {
        let free = self.config.ports.saturating_sub(q.inflight.len());
        let mut runs: Vec<Run> = Vec::new();

        while let Some(next) = q.ready.peek() {
            let ctx = next.context().id;
            let same = runs
                .last()
                .and_then(|run| run.last())
                .map_or(false, |prev| prev.context().id == ctx);
            if !same && runs.len() == free {
                break;
            }
            let Some(rq) = q.ready.pop() else {
                break;
            };
            match runs.last_mut() {
                Some(run) if same => run.push(rq),
                _ => runs.push(vec![rq]),
            }
        }

        let base = q.inflight.len();
        let mut ports = Vec::with_capacity(runs.len());
        for (n, run) in runs.into_iter().enumerate() {
            let Some(last) = run.last() else {
                continue;
            };
            self.hooks.schedule_in(last, base + n);
            ports.push((last.port_descriptor(), last.context().gpa));
            bump(&self.counters.requests, run.len() as u64);
            q.inflight.push_back(run);
        }
        if !ports.is_empty() {
            ktrace!("{}: dequeued {} port(s)", self.name, ports.len());
        }
        ports
    }

    /// Write the ports, ring the doorbell and wait for the host to take
    /// the slot. A missed acknowledgement leaves `submitted` set, so the
    /// next tasklet pass will not dequeue until the host catches up.
    fn pv_submit(&self, ports: &[(u64, u64)]) {
        let Some(slot) = self.page.slot(self.id) else {
            return;
        };
        let Some(_slot) = self.slot_lock.try_lock_for(self.config.doorbell_timeout) else {
            kerror!("PV ({}) submission slot lock timed out", self.name);
            bump(&self.counters.doorbell_timeouts, 1);
            return;
        };

        slot.fill(ports);
        slot.submitted.store(1, Ordering::Release);
        self.regs
            .write_submit_doorbell(self.id, ActionCode::ElspSubmission.code() as u32);
        bump(&self.counters.doorbells, 1);

        let acked = BoundedWait::spin_only(self.config.doorbell_timeout)
            .wait(|| !slot.is_submitted());
        if acked.is_err() {
            kerror!("PV ({}) workload submission failed", self.name);
            bump(&self.counters.doorbell_timeouts, 1);
        }
    }

    // ── Reset ──

    /// Stop dequeueing and wait (bounded) for a running tasklet to finish.
    /// Nests; each call needs a matching [`reset_finish`](Self::reset_finish).
    pub fn reset_prepare(&self) {
        let depth = self.disabled.fetch_add(1, Ordering::AcqRel) + 1;
        kdebug!("{}: reset prepare (depth {})", self.name, depth);
        match self.tasklet.try_lock_for(self.config.quiesce_timeout) {
            Some(_quiesced) => {}
            None => kerror!("{}: tasklet still running after reset prepare", self.name),
        }
    }

    /// Pull every in-flight request off the hardware. Completed ones retire;
    /// the rest go back to the head of the ready queue in submission order.
    /// The earliest of those is the active request: blamed for the hang if
    /// `stalled` and it had started.
    pub fn reset_rewind(&self, stalled: bool) {
        let mut q = self.lock_queues();
        if !self.is_dequeue_disabled() {
            kwarn!("{}: reset rewind without prepare", self.name);
        }
        self.clear_slot();

        let mut incomplete: Vec<Arc<Request>> = Vec::new();
        for run in std::mem::take(&mut q.inflight) {
            let last = run.last().cloned();
            for rq in run {
                if rq.is_completed() {
                    self.retire(&rq);
                } else {
                    incomplete.push(rq);
                }
            }
            if let Some(last) = last {
                self.hooks.schedule_out(&last);
            }
        }

        for rq in incomplete.iter().rev() {
            rq.set_replay();
            q.ready.push_front(Arc::clone(rq));
        }

        if let Some(active) = incomplete.first() {
            let guilty = stalled && active.is_started();
            active.set_stalled(guilty);
            self.hooks.reset_request(active, guilty);
            kdebug!(
                "{}: rewind {} request(s), active rq {} stalled={}",
                self.name,
                incomplete.len(),
                active.id(),
                guilty
            );
        }

        bump(&self.counters.resets, 1);
        q.state = if q.ready.is_empty() {
            EngineState::Idle
        } else {
            EngineState::Queued
        };
    }

    /// Re-enable dequeue and kick the tasklet once the last nested
    /// prepare is finished.
    pub fn reset_finish(&self) {
        match self
            .disabled
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| d.checked_sub(1))
        {
            Ok(1) => {
                kdebug!("{}: reset finish", self.name);
                self.kick();
            }
            Ok(_) => {}
            Err(_) => kwarn!("{}: reset finish without prepare", self.name),
        }
    }

    /// Fail everything: every in-flight and every queued request retires
    /// with `-EIO`, oldest first. For a wedged device.
    ///
    /// Safe to call while a doorbell wait is in progress; the slot is
    /// cleared once the waiter lets go of it (bounded by `quiesce_timeout`).
    pub fn cancel_requests(&self) {
        let mut q = self.lock_queues();
        self.clear_slot();

        for run in std::mem::take(&mut q.inflight) {
            for rq in &run {
                self.skip(rq, -libc::EIO);
            }
            if let Some(last) = run.last() {
                self.hooks.schedule_out(last);
            }
        }
        while let Some(rq) = q.ready.pop() {
            self.skip(&rq, -libc::EIO);
        }

        q.state = EngineState::Idle;
        kdebug!("{}: requests cancelled", self.name);
    }

    fn skip(&self, rq: &Request, error: i32) {
        rq.mark_completed();
        if rq.retire(error) {
            self.hooks.mark_skipped(rq, error);
            self.hooks.mark_complete(rq);
            bump(&self.counters.cancelled, 1);
        }
    }

    /// Forget the last doorbell. The host is being reset or is unreachable.
    /// A doorbell wait holds the slot for up to `doorbell_timeout`, so this
    /// waits for the longer `quiesce_timeout`.
    fn clear_slot(&self) {
        let Some(slot) = self.page.slot(self.id) else {
            return;
        };
        match self.slot_lock.try_lock_for(self.config.quiesce_timeout) {
            Some(_slot) => slot.clear(),
            None => kerror!("{}: could not take submission slot to clear it", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Context, CTX_DESC_FORCE_RESTORE};
    use pvgpu_module::{LoopbackHost, PvInstance, PvInstanceBuilder};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        In(u64, usize),
        Out(u64),
        Retired(u64),
        Skipped(u64, i32),
        Complete(u64),
        Reset(u64, bool),
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Event>>);

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.0.lock().unwrap().clone()
        }
        fn push(&self, e: Event) {
            self.0.lock().unwrap().push(e);
        }
    }

    impl SchedulerHooks for Recorder {
        fn schedule_in(&self, rq: &Request, port: usize) {
            self.push(Event::In(rq.id(), port));
        }
        fn schedule_out(&self, rq: &Request) {
            self.push(Event::Out(rq.id()));
        }
        fn retired(&self, rq: &Request) {
            self.push(Event::Retired(rq.id()));
        }
        fn mark_skipped(&self, rq: &Request, error: i32) {
            self.push(Event::Skipped(rq.id(), error));
        }
        fn mark_complete(&self, rq: &Request) {
            self.push(Event::Complete(rq.id()));
        }
        fn reset_request(&self, rq: &Request, guilty: bool) {
            self.push(Event::Reset(rq.id(), guilty));
        }
    }

    struct Rig {
        host: Arc<LoopbackHost>,
        _pv: PvInstance,
        hooks: Arc<Recorder>,
        engine: EngineSubmitter,
    }

    fn rig(ports: usize) -> Rig {
        let host = Arc::new(LoopbackHost::new(0x1F));
        let pv = PvInstanceBuilder::new().build(Arc::clone(&host)).unwrap();
        let hooks = Arc::new(Recorder::default());
        let config = SubmitConfig::default()
            .ports(ports)
            .doorbell_timeout(Duration::from_micros(200))
            .inline_tasklets(true);
        let engine = EngineSubmitter::new(
            0,
            Arc::clone(pv.page().unwrap()),
            Arc::clone(pv.regs()),
            Arc::clone(&hooks) as Arc<dyn SchedulerHooks>,
            config,
            None,
        )
        .unwrap();
        Rig {
            host,
            _pv: pv,
            hooks,
            engine,
        }
    }

    fn ctx(id: u64) -> Context {
        Context {
            id,
            gpa: id * 0x10_000,
            lrc_desc: id * 0x10_000 | 1,
        }
    }

    fn rq(id: u64, context: u64) -> Arc<Request> {
        Request::new(id, ctx(context), 0)
    }

    #[test]
    fn test_invalid_engine() {
        let host = Arc::new(LoopbackHost::new(0x1F));
        let pv = PvInstanceBuilder::new().build(Arc::clone(&host)).unwrap();
        let r = EngineSubmitter::new(
            6,
            Arc::clone(pv.page().unwrap()),
            Arc::clone(pv.regs()),
            Arc::new(crate::hooks::NoopHooks),
            SubmitConfig::default(),
            None,
        );
        assert!(matches!(r, Err(PvError::InvalidEngine(6))));
    }

    #[test]
    fn test_same_context_coalesces_into_one_port() {
        let r = rig(4);
        let rqs: Vec<_> = [(1, 0xA), (2, 0xA), (3, 0xA), (4, 0xB), (5, 0xB)]
            .into_iter()
            .map(|(id, c)| rq(id, c))
            .collect();
        for rq in &rqs {
            r.engine.enqueue(Arc::clone(rq));
        }
        r.engine.kick();

        let subs = r.host.submissions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].used_ports(), 2);
        assert_eq!(subs[0].ports[0], (ctx(0xA).lrc_desc, ctx(0xA).gpa));
        assert_eq!(subs[0].ports[1], (ctx(0xB).lrc_desc, ctx(0xB).gpa));
        assert_eq!(subs[0].ports[2], (0, 0));
        assert_eq!(r.hooks.events(), vec![Event::In(3, 0), Event::In(5, 1)]);
        assert_eq!(r.engine.in_flight(), 5);
        assert_eq!(r.engine.state(), EngineState::Submitted);
        assert!(!r.engine.is_host_busy());
    }

    #[test]
    fn test_port_limit_holds_back_third_context() {
        let r = rig(2);
        let (a, b, c) = (rq(1, 1), rq(2, 2), rq(3, 3));
        for x in [&a, &b, &c] {
            r.engine.enqueue(Arc::clone(x));
        }
        r.engine.kick();
        assert_eq!(r.host.submissions()[0].used_ports(), 2);
        assert_eq!(r.engine.queued(), 1);

        // all ports busy: nothing more goes out
        r.engine.kick();
        assert_eq!(r.host.doorbell_count(), 1);

        a.mark_completed();
        r.engine.kick();
        assert_eq!(a.status(), Some(0));
        let subs = r.host.submissions();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[1].used_ports(), 1);
        assert_eq!(subs[1].ports[0].1, ctx(3).gpa);
        assert_eq!(r.engine.state(), EngineState::Submitted);
    }

    #[test]
    fn test_retire_in_order() {
        let r = rig(2);
        let (a, b) = (rq(1, 1), rq(2, 1));
        r.engine.submit(Arc::clone(&a));
        r.engine.submit(Arc::clone(&b));
        assert_eq!(r.engine.in_flight(), 2);

        b.mark_completed();
        r.engine.kick();
        assert_eq!(b.status(), None);
        assert_eq!(r.engine.in_flight(), 2);

        a.mark_completed();
        r.engine.kick();
        assert_eq!(a.status(), Some(0));
        assert_eq!(b.status(), Some(0));
        assert_eq!(r.engine.state(), EngineState::Idle);
        assert_eq!(r.engine.stats().retired, 2);
    }

    #[test]
    fn test_partial_retire_is_completing() {
        let r = rig(2);
        let (a, b) = (rq(1, 1), rq(2, 2));
        r.engine.enqueue(Arc::clone(&a));
        r.engine.enqueue(Arc::clone(&b));
        r.engine.kick();
        assert_eq!(r.engine.state(), EngineState::Submitted);
        a.mark_completed();
        r.engine.kick();
        assert_eq!(r.engine.state(), EngineState::Completing);
        b.mark_completed();
        r.engine.kick();
        assert_eq!(r.engine.state(), EngineState::Idle);
        assert!(r.hooks.events().contains(&Event::Out(1)));
        assert!(r.hooks.events().contains(&Event::Out(2)));
    }

    #[test]
    fn test_unacked_doorbell_blocks_next_dequeue() {
        let r = rig(2);
        r.host.set_ack_doorbell(false);
        let a = rq(1, 1);
        r.engine.submit(Arc::clone(&a));
        assert_eq!(r.engine.stats().doorbell_timeouts, 1);
        assert!(r.engine.is_host_busy());

        a.mark_completed();
        r.engine.submit(rq(2, 2));
        assert_eq!(r.host.doorbell_count(), 1);
        assert_eq!(a.status(), Some(0));

        r.host.ack_submission(0);
        r.host.set_ack_doorbell(true);
        r.engine.kick();
        assert_eq!(r.host.doorbell_count(), 2);
    }

    #[test]
    fn test_reset_rewinds_unstarted_request() {
        let r = rig(2);
        let (a, b) = (rq(1, 1), rq(2, 2));
        r.engine.submit(Arc::clone(&a));
        r.engine.submit(Arc::clone(&b));
        assert_eq!(r.host.doorbell_count(), 2);

        r.engine.reset_prepare();
        assert!(r.engine.is_dequeue_disabled());
        r.engine.reset_rewind(true);
        assert!(!a.is_stalled());
        assert!(r.hooks.events().contains(&Event::Reset(1, false)));
        assert_eq!(r.engine.in_flight(), 0);
        assert_eq!(r.engine.queued(), 2);
        assert_eq!(r.engine.state(), EngineState::Queued);

        // still disabled: kicks do nothing
        r.engine.kick();
        assert_eq!(r.host.doorbell_count(), 2);

        r.engine.reset_finish();
        let subs = r.host.submissions();
        assert_eq!(subs.len(), 3);
        let (desc, gpa) = subs[2].ports[0];
        assert_eq!(gpa, ctx(1).gpa);
        assert_ne!(desc & CTX_DESC_FORCE_RESTORE, 0);
        assert_eq!(subs[2].ports[1].1, ctx(2).gpa);
    }

    #[test]
    fn test_reset_blames_started_request() {
        let r = rig(2);
        let (a, b) = (rq(1, 1), rq(2, 2));
        r.engine.submit(Arc::clone(&a));
        r.engine.submit(Arc::clone(&b));
        a.mark_started();

        r.engine.reset_prepare();
        r.engine.reset_rewind(true);
        assert!(a.is_stalled());
        assert!(!b.is_stalled());
        r.engine.reset_finish();
        assert_eq!(r.engine.stats().resets, 1);
    }

    #[test]
    fn test_reset_retires_completed_inflight() {
        let r = rig(2);
        let (a, b) = (rq(1, 1), rq(2, 2));
        r.engine.submit(Arc::clone(&a));
        r.engine.submit(Arc::clone(&b));
        a.mark_completed();

        r.engine.reset_prepare();
        r.engine.reset_rewind(false);
        assert_eq!(a.status(), Some(0));
        assert_eq!(r.engine.queued(), 1);
        assert!(r.hooks.events().contains(&Event::Reset(2, false)));
        r.engine.reset_finish();
    }

    #[test]
    fn test_nested_prepare() {
        let r = rig(2);
        r.engine.reset_prepare();
        r.engine.reset_prepare();
        r.engine.reset_finish();
        assert!(r.engine.is_dequeue_disabled());
        r.engine.submit(rq(1, 1));
        assert_eq!(r.host.doorbell_count(), 0);
        r.engine.reset_finish();
        assert!(!r.engine.is_dequeue_disabled());
        assert_eq!(r.host.doorbell_count(), 1);
        // unbalanced finish is ignored
        r.engine.reset_finish();
        assert!(!r.engine.is_dequeue_disabled());
    }

    #[test]
    fn test_cancel_fails_everything_with_eio() {
        let r = rig(2);
        let rqs: Vec<_> = (1..=5).map(|id| rq(id, id)).collect();
        for x in &rqs {
            r.engine.submit(Arc::clone(x));
        }
        assert_eq!(r.engine.in_flight(), 2);
        assert_eq!(r.engine.queued(), 3);
        // finished on the host but not yet retired by a tasklet pass
        rqs[0].mark_completed();

        r.engine.cancel_requests();
        for x in &rqs {
            assert_eq!(x.status(), Some(-libc::EIO));
            assert!(x.is_completed());
        }
        assert_eq!(r.engine.queued(), 0);
        assert_eq!(r.engine.in_flight(), 0);
        assert_eq!(r.engine.state(), EngineState::Idle);
        assert_eq!(r.engine.stats().cancelled, 5);

        let skipped: Vec<u64> = r
            .hooks
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Skipped(id, err) if err == -libc::EIO => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(skipped, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_cancelled_request_cannot_be_resubmitted() {
        let r = rig(2);
        let a = rq(1, 1);
        assert!(r.engine.enqueue(Arc::clone(&a)));
        r.engine.cancel_requests();
        assert_eq!(a.status(), Some(-libc::EIO));

        assert!(!r.engine.submit(Arc::clone(&a)));
        r.engine.kick();
        assert_eq!(a.status(), Some(-libc::EIO));
        assert_eq!(r.engine.queued(), 0);
        assert_eq!(r.engine.in_flight(), 0);
        assert_eq!(r.host.doorbell_count(), 0);
    }

    #[test]
    fn test_cancel_waits_out_a_held_slot() {
        let r = rig(2);
        r.host.set_ack_doorbell(false);
        r.engine.submit(rq(1, 1));
        assert!(r.engine.is_host_busy());

        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let engine = &r.engine;
        std::thread::scope(|s| {
            s.spawn(move || {
                let _slot = engine.slot_lock.try_lock().unwrap();
                locked_tx.send(()).unwrap();
                // longer than doorbell_timeout, shorter than quiesce_timeout
                std::thread::sleep(Duration::from_millis(3));
            });
            locked_rx.recv().unwrap();
            engine.cancel_requests();
        });
        assert!(!r.engine.is_host_busy());
        assert_eq!(r.engine.in_flight(), 0);
    }

    #[derive(Default)]
    struct Fifo(VecDeque<Arc<Request>>);

    impl ReadyQueue for Fifo {
        fn push(&mut self, rq: Arc<Request>) {
            self.0.push_back(rq);
        }
        fn push_front(&mut self, rq: Arc<Request>) {
            self.0.push_front(rq);
        }
        fn peek(&self) -> Option<&Arc<Request>> {
            self.0.front()
        }
        fn pop(&mut self) -> Option<Arc<Request>> {
            self.0.pop_front()
        }
        fn len(&self) -> usize {
            self.0.len()
        }
    }

    #[test]
    fn test_custom_ready_queue_sets_order() {
        let Rig {
            host,
            _pv,
            hooks,
            engine,
        } = rig(1);
        let r = Rig {
            host,
            _pv,
            hooks,
            engine: engine.with_ready_queue(Box::new(Fifo::default())),
        };
        let a = rq(1, 1);
        r.engine.submit(Arc::clone(&a));
        r.engine.submit(Request::new(2, ctx(2), 0));
        r.engine.submit(Request::new(3, ctx(3), 5));
        assert_eq!(r.engine.queued(), 2);

        a.mark_completed();
        r.engine.kick();
        let started: Vec<u64> = r
            .hooks
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::In(id, _) => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec![1, 2]);
    }
}
