//! PV GPU End-to-End Smoke Test
//!
//! Drives the whole guest side against `LoopbackHost`:
//!   Part A: capability negotiation and shared page setup
//!   Part B: command ring, fences and host status
//!   Part C: action encoders as the host decodes them
//!   Part D: native-or-PV dispatch
//!   Part E: workload submission, reset and cancel
//!
//! Run: ./target/release/pvgpu-smoke
//! (PVGPU_LOG_LEVEL=debug for transport logs)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pvgpu_core::action::ActionCode;
use pvgpu_core::args::{PvHwCtx, PvVma};
use pvgpu_core::caps::PvCaps;
use pvgpu_core::constants::PV_MAX_ENGINES;
use pvgpu_core::error::{PvError, Result};
use pvgpu_core::ops::{ContextOps, PageTableOps, Vma, VMA_ALLOC};
use pvgpu_core::regs::PvRegisters;

use pvgpu_module::{HostMode, LoopbackHost, PvConfig, PvInstance, PvInstanceBuilder};
use pvgpu_submit::{
    Context, EngineState, NoopHooks, PvSubmission, Request, SubmitConfig, CTX_DESC_FORCE_RESTORE,
};

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn check_result<T>(&mut self, name: &str, r: &Result<T>) {
        match r {
            Ok(_) => self.pass(name),
            Err(e) => self.fail(name, &e.to_string()),
        }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

fn fast_config() -> PvConfig {
    PvConfig::default()
        .fence_spin(Duration::from_micros(5))
        .fence_timeout(Duration::from_millis(5))
}

fn boot(caps: u32) -> (Arc<LoopbackHost>, Result<PvInstance>) {
    let host = Arc::new(LoopbackHost::new(caps));
    let pv = PvInstanceBuilder::new()
        .config(fast_config())
        .build(Arc::clone(&host));
    (host, pv)
}

/// Stand-in for the native hardware path; counts calls.
#[derive(Default)]
struct NativeCounter(AtomicUsize);

impl NativeCounter {
    fn hit(&self) -> Result<()> {
        self.0.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn count(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

impl PageTableOps for &NativeCounter {
    fn allocate_va_range(&self, _: u64, _: u64) -> Result<()> { self.hit() }
    fn clear_range(&self, _: u64, _: u64) -> Result<()> { self.hit() }
    fn insert_entries(&self, _: &Vma, _: u64) -> Result<()> { self.hit() }
    fn bind_vma(&self, _: &Vma, _: u64, _: u32) -> Result<()> { self.hit() }
    fn unbind_vma(&self, _: &Vma) -> Result<()> { self.hit() }
}

impl ContextOps for &NativeCounter {
    fn alloc(&self, _: u32, _: u64) -> Result<()> { self.hit() }
    fn destroy(&self, _: u32, _: u64) -> Result<()> { self.hit() }
    fn pin(&self, _: u32, _: u64) -> Result<()> { self.hit() }
    fn unpin(&self, _: u32, _: u64) -> Result<()> { self.hit() }
    fn reset(&self, _: u32, _: u64) -> Result<()> { self.hit() }
}

// ════════════════════════════════════════════════════════════
// Part A: Negotiation
// ════════════════════════════════════════════════════════════

fn test_negotiation(t: &mut TestRunner) {
    t.section("Part A: Capability negotiation");

    // A1: intersection
    let host = Arc::new(LoopbackHost::new(0b01010));
    let pv = PvInstanceBuilder::new()
        .config(fast_config())
        .desired_caps(PvCaps::PPGTT | PvCaps::GGTT | PvCaps::SUBMISSION)
        .build(Arc::clone(&host));
    match &pv {
        Ok(pv) => {
            t.check("caps = desired & offered", pv.caps() == PvCaps::GGTT, &pv.caps().to_string());
            t.check("caps written back", host.read_pv_caps() == PvCaps::GGTT.bits(), "register mismatch");
            t.check("shared page published", host.read_shared_page_gpa() != 0, "gpa is 0");
        }
        Err(e) => t.fail("caps = desired & offered", &e.to_string()),
    }
    drop(pv);
    t.check("teardown clears gpa", host.read_shared_page_gpa() == 0, "gpa left set");

    // A2: nothing in common
    let (host, pv) = boot(0);
    match pv {
        Ok(pv) => {
            t.check("no common caps -> native", !pv.is_active() && pv.actions().is_none(), "instance active");
            t.check("no page published", host.read_shared_page_gpa() == 0, "gpa set");
        }
        Err(e) => t.fail("no common caps -> native", &e.to_string()),
    }

    // A3: version mismatch
    let host = Arc::new(LoopbackHost::new(0x1F));
    host.set_version(2, 0);
    let pv = PvInstanceBuilder::new().config(fast_config()).build(Arc::clone(&host));
    t.check(
        "version 2.0 rejected",
        matches!(pv, Err(PvError::Version { major: 2, minor: 0 })),
        "expected version error",
    );
    t.check(
        "failed setup clears caps",
        host.read_pv_caps() == 0 && host.read_shared_page_gpa() == 0,
        "registers left set",
    );

    // A4: gpa echo mismatch
    let host = Arc::new(LoopbackHost::new(0x1F));
    host.set_echo_mismatch(true);
    let pv = PvInstanceBuilder::new().config(fast_config()).build(Arc::clone(&host));
    t.check("gpa echo mismatch rejected", matches!(pv, Err(PvError::Setup(_))), "expected setup error");
}

// ════════════════════════════════════════════════════════════
// Part B: Command ring and fences
// ════════════════════════════════════════════════════════════

fn test_channel(t: &mut TestRunner) {
    t.section("Part B: Command ring, fences, status");

    let (host, pv) = boot(0x1F);
    let pv = match pv {
        Ok(pv) => pv,
        Err(e) => {
            t.fail("boot", &e.to_string());
            return;
        }
    };
    let Some(channel) = pv.channel() else {
        t.fail("channel", "no channel on active instance");
        return;
    };

    // B1: fences 1..=3
    let mut ok = true;
    for i in 0..3u32 {
        ok &= channel.send(ActionCode::Default, &[i]).is_ok();
    }
    let fences: Vec<u32> = host.messages().iter().map(|m| m.fence).collect();
    t.check("three sends succeed", ok, "send failed");
    t.check("fences 1, 2, 3", fences == vec![1, 2, 3], &format!("{:?}", fences));
    t.check("one notify per send", host.notify_count() == 3, &host.notify_count().to_string());

    // B2: host status surfaces
    host.set_mode(HostMode::Reject(5));
    let r = channel.send(ActionCode::Default, &[]);
    t.check("status 5 -> Protocol(5)", r == Err(PvError::Protocol(5)), &format!("{:?}", r));

    // B3: silent host times out, next send recovers
    host.set_mode(HostMode::Silent);
    let r = channel.send(ActionCode::Default, &[]);
    t.check("silent host times out", matches!(r, Err(PvError::Timeout { .. })), &format!("{:?}", r));
    host.set_mode(HostMode::Normal);
    let r = channel.send(ActionCode::Default, &[7]);
    t.check_result("send after timeout", &r);

    // B4: oversize payload never touches the ring
    let before = host.notify_count();
    let r = channel.send(ActionCode::Default, &[0; 31]);
    t.check(
        "31-word payload rejected",
        matches!(r, Err(PvError::EncodingTooLarge { .. })) && host.notify_count() == before,
        &format!("{:?}", r),
    );
}

// ════════════════════════════════════════════════════════════
// Part C: Encoders
// ════════════════════════════════════════════════════════════

fn test_encoders(t: &mut TestRunner) {
    t.section("Part C: Action encoders");

    let (host, pv) = boot(0x1F);
    let Some(actions) = pv.as_ref().ok().and_then(PvInstance::actions) else {
        t.fail("actions", "instance not active");
        return;
    };

    // C1: single page inline
    let vma = Vma::new(0x40_0000, vec![0xABC000]);
    let r = actions.vma(ActionCode::GgttInsert, &vma, 0, 0x3, 0);
    t.check_result("GGTT_INSERT one page", &r);
    let decoded = host
        .messages()
        .last()
        .and_then(|m| PvVma::from_words(&m.payload).ok());
    t.check(
        "inline dma_addrs = page | flags",
        decoded.map(|v| v.dma_addrs) == Some(0xABC003),
        &format!("{:?}", decoded),
    );

    // C2: multi-page table readable during the handler
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_in = Arc::clone(&seen);
    host.set_handler(move |m| {
        if let Ok(v) = PvVma::from_words(&m.payload) {
            // Safety: the guest keeps the table alive until the reply.
            let table = unsafe { std::slice::from_raw_parts(v.dma_addrs as *const u64, v.size as usize) };
            if table.iter().all(|e| e & 0x1 == 0x1) {
                seen_in.store(table.len(), Ordering::Relaxed);
            }
        }
        0
    });
    let vma = Vma::new(0x80_0000, vec![0x1000, 0x2000, 0x3000]);
    let r = actions.vma(ActionCode::PpgttL4Insert, &vma, 0, 0x1, 0x9000);
    t.check_result("PPGTT_L4_INSERT three pages", &r);
    t.check("host read 3-entry table", seen.load(Ordering::Relaxed) == 3, "table not visible");

    // C3: context block
    let r = actions.context(ActionCode::CtxPin, 2, 0x1234_5678_9000);
    t.check_result("CTX_PIN", &r);
    let ctx = host
        .messages()
        .last()
        .and_then(|m| PvHwCtx::from_words(&m.payload).ok());
    t.check(
        "context block decodes",
        ctx == Some(PvHwCtx { ctx_gpa: 0x1234_5678_9000, eng_id: 2 }),
        &format!("{:?}", ctx),
    );
}

// ════════════════════════════════════════════════════════════
// Part D: Dispatch
// ════════════════════════════════════════════════════════════

fn test_dispatch(t: &mut TestRunner) {
    t.section("Part D: Native-or-PV dispatch");

    let native = NativeCounter::default();

    // D1: PPGTT negotiated, HW_CONTEXT not
    let (host, pv) = boot((PvCaps::PPGTT | PvCaps::SUBMISSION).bits());
    let Ok(pv) = pv else {
        t.fail("boot", "instance build failed");
        return;
    };
    let ppgtt = pv.ppgtt_ops(&native, 0x7000);
    let ctx = pv.context_ops(&native);
    t.check("PPGTT -> PV backend", ppgtt.is_pv(), "native chosen");
    t.check("no HW_CONTEXT -> native backend", !ctx.is_pv(), "PV chosen");

    let vma = Vma::new(0x10_0000, vec![0x5000]);
    let r = ppgtt.bind_vma(&vma, 0x1, 0);
    t.check_result("PV bind_vma", &r);
    t.check("bind sets ALLOC", vma.bind_flags() & VMA_ALLOC != 0, "flag missing");
    let sent = host.messages().len();
    let r = ppgtt.unbind_vma(&vma);
    t.check_result("PV unbind_vma", &r);
    let r = ppgtt.unbind_vma(&vma);
    t.check_result("second unbind_vma is a no-op", &r);
    t.check("second unbind sends nothing", host.messages().len() == sent + 1, "duplicate unbind");

    let r = ctx.alloc(0, 0x1000);
    t.check_result("native context alloc", &r);
    t.check("native context op called", native.count() == 1, &native.count().to_string());
}

// ════════════════════════════════════════════════════════════
// Part E: Submission
// ════════════════════════════════════════════════════════════

fn ctx(id: u64) -> Context {
    Context { id, gpa: id << 20, lrc_desc: (id << 20) | 1 }
}

fn test_submission(t: &mut TestRunner) {
    t.section("Part E: Workload submission");

    let (host, pv) = boot(0x1F);
    let Ok(pv) = pv else {
        t.fail("boot", "instance build failed");
        return;
    };
    let config = SubmitConfig::from_env().ports(4).inline_tasklets(true);
    let sub = match PvSubmission::install(&pv, PV_MAX_ENGINES, Arc::new(NoopHooks), config) {
        Ok(s) => { t.pass("install on all engines"); s }
        Err(e) => { t.fail("install on all engines", &e.to_string()); return; }
    };
    let Some(rcs) = sub.engine(0) else {
        t.fail("engine 0", "missing");
        return;
    };

    // E1: A,A,A,B,B coalesce into two ports
    let rqs: Vec<_> = [(1, 1), (2, 1), (3, 1), (4, 2), (5, 2)]
        .into_iter()
        .map(|(id, c)| Request::new(id, ctx(c), 0))
        .collect();
    let queued = rqs.iter().all(|rq| rcs.enqueue(Arc::clone(rq)));
    t.check("five requests queued", queued, "enqueue refused");
    rcs.kick();
    let subs = host.submissions();
    t.check("one doorbell", subs.len() == 1, &subs.len().to_string());
    t.check(
        "two ports used",
        subs.first().map(|s| s.used_ports()) == Some(2),
        &format!("{:?}", subs.first()),
    );
    t.check(
        "doorbell carries ELSP_SUBMISSION",
        subs.first().map(|s| s.value) == Some(ActionCode::ElspSubmission.code() as u32),
        "wrong doorbell value",
    );

    // E2: completion retires in order
    for rq in &rqs {
        rq.mark_completed();
    }
    rcs.kick();
    t.check(
        "all five retired ok",
        rqs.iter().all(|rq| rq.status() == Some(0)),
        "some request not retired",
    );
    t.check("engine idle", rcs.state() == EngineState::Idle, &format!("{:?}", rcs.state()));

    // E3: reset replays with FORCE_RESTORE
    let rq = Request::new(10, ctx(3), 0);
    t.check("submit fresh request", rcs.submit(Arc::clone(&rq)), "submit refused");
    let r = sub.reset_engine(0, true);
    t.check_result("reset engine 0", &r);
    let last = host.submissions().last().map(|s| s.ports[0].0).unwrap_or(0);
    t.check("resubmitted with FORCE_RESTORE", last & CTX_DESC_FORCE_RESTORE != 0, &format!("{:#x}", last));

    // E4: cancel fails everything with -EIO
    sub.cancel_all();
    t.check("cancel -> -EIO", rq.status() == Some(-libc::EIO), &format!("{:?}", rq.status()));
    t.check(
        "cancelled request refused",
        sub.submit(0, Arc::clone(&rq)).is_err() && rq.status() == Some(-libc::EIO),
        &format!("{:?}", rq.status()),
    );

    // E5: host ignores the doorbell
    host.set_ack_doorbell(false);
    let rq = Request::new(11, ctx(4), 0);
    rcs.submit(rq);
    t.check("unacked doorbell counted", rcs.stats().doorbell_timeouts == 1, &format!("{:?}", rcs.stats()));
    t.check("slot stays busy", rcs.is_host_busy(), "submitted cleared");
    host.ack_submission(0);
    host.set_ack_doorbell(true);
}

fn main() {
    pvgpu_core::kprint::init();
    println!("=== PV GPU End-to-End Smoke Test ===");

    let mut t = TestRunner::new();

    test_negotiation(&mut t);
    test_channel(&mut t);
    test_encoders(&mut t);
    test_dispatch(&mut t);
    test_submission(&mut t);

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
