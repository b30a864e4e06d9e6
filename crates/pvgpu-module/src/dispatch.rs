//! Native-or-PV backends for the page table and context operation families.
//!
//! `PvInstance` picks the variant once, from the negotiated caps; callers
//! hold the returned enum and never look at capabilities again.

use pvgpu_core::action::ActionCode;
use pvgpu_core::args::PageTableRange;
use pvgpu_core::caps::PvCaps;
use pvgpu_core::error::Result;
use pvgpu_core::ops::{
    ContextOps, GgttOps, PageTableOps, Vma, VMA_ALLOC, VMA_GLOBAL_BIND, VMA_LOCAL_BIND,
};

use crate::actions::PvActions;
use crate::instance::PvInstance;

// ── PV backends ──

/// Per-process page table forwarded to the host.
#[derive(Clone)]
pub struct PvPpgtt {
    actions: PvActions,
    table_root: u64,
}

impl PvPpgtt {
    pub fn new(actions: PvActions, table_root: u64) -> Self {
        Self {
            actions,
            table_root,
        }
    }

    fn range(&self, action: ActionCode, start: u64, length: u64) -> Result<()> {
        self.actions.page_table_range(
            action,
            PageTableRange {
                table_root: self.table_root,
                start,
                length,
            },
        )
    }
}

impl PageTableOps for PvPpgtt {
    fn allocate_va_range(&self, start: u64, length: u64) -> Result<()> {
        self.range(ActionCode::PpgttL4Alloc, start, length)
    }

    fn clear_range(&self, start: u64, length: u64) -> Result<()> {
        self.range(ActionCode::PpgttL4Clear, start, length)
    }

    fn insert_entries(&self, vma: &Vma, pte_flags: u64) -> Result<()> {
        self.actions
            .vma(ActionCode::PpgttL4Insert, vma, 0, pte_flags, self.table_root)
    }

    fn bind_vma(&self, vma: &Vma, pte_flags: u64, flags: u32) -> Result<()> {
        vma.set_bind_flags(VMA_ALLOC);
        self.actions
            .vma(ActionCode::PpgttBind, vma, flags, pte_flags, self.table_root)
    }

    fn unbind_vma(&self, vma: &Vma) -> Result<()> {
        if !vma.test_and_clear(VMA_ALLOC) {
            return Ok(());
        }
        self.actions
            .vma(ActionCode::PpgttUnbind, vma, 0, 0, self.table_root)
    }
}

/// Global table forwarded to the host.
#[derive(Clone)]
pub struct PvGgtt {
    actions: PvActions,
}

impl PvGgtt {
    pub fn new(actions: PvActions) -> Self {
        Self { actions }
    }
}

impl GgttOps for PvGgtt {
    fn insert_entries(&self, vma: &Vma, pte_flags: u64) -> Result<()> {
        self.actions.vma(ActionCode::GgttInsert, vma, 0, pte_flags, 0)
    }

    fn bind_vma(&self, vma: &Vma, pte_flags: u64, flags: u32) -> Result<()> {
        self.actions
            .vma(ActionCode::GgttBind, vma, flags, pte_flags, 0)?;
        vma.set_bind_flags(VMA_GLOBAL_BIND | VMA_LOCAL_BIND);
        Ok(())
    }

    fn unbind_vma(&self, vma: &Vma) -> Result<()> {
        self.actions.vma(ActionCode::GgttUnbind, vma, 0, 0, 0)?;
        vma.clear_bind_flags(VMA_GLOBAL_BIND | VMA_LOCAL_BIND);
        Ok(())
    }
}

/// Context lifecycle forwarded to the host.
#[derive(Clone)]
pub struct PvContextOps {
    actions: PvActions,
}

impl PvContextOps {
    pub fn new(actions: PvActions) -> Self {
        Self { actions }
    }
}

impl ContextOps for PvContextOps {
    fn alloc(&self, engine: u32, ctx_gpa: u64) -> Result<()> {
        self.actions.context(ActionCode::CtxAlloc, engine, ctx_gpa)
    }

    fn destroy(&self, engine: u32, ctx_gpa: u64) -> Result<()> {
        self.actions.context(ActionCode::CtxDestroy, engine, ctx_gpa)
    }

    fn pin(&self, engine: u32, ctx_gpa: u64) -> Result<()> {
        self.actions.context(ActionCode::CtxPin, engine, ctx_gpa)
    }

    fn unpin(&self, engine: u32, ctx_gpa: u64) -> Result<()> {
        self.actions.context(ActionCode::CtxUnpin, engine, ctx_gpa)
    }

    fn reset(&self, engine: u32, ctx_gpa: u64) -> Result<()> {
        self.actions.context(ActionCode::CtxReset, engine, ctx_gpa)
    }
}

// ── Dispatch enums ──

pub enum PpgttDispatch<N> {
    Native(N),
    Pv(PvPpgtt),
}

impl<N: PageTableOps> PageTableOps for PpgttDispatch<N> {
    fn allocate_va_range(&self, start: u64, length: u64) -> Result<()> {
        match self {
            Self::Native(n) => n.allocate_va_range(start, length),
            Self::Pv(p) => p.allocate_va_range(start, length),
        }
    }

    fn clear_range(&self, start: u64, length: u64) -> Result<()> {
        match self {
            Self::Native(n) => n.clear_range(start, length),
            Self::Pv(p) => p.clear_range(start, length),
        }
    }

    fn insert_entries(&self, vma: &Vma, pte_flags: u64) -> Result<()> {
        match self {
            Self::Native(n) => n.insert_entries(vma, pte_flags),
            Self::Pv(p) => p.insert_entries(vma, pte_flags),
        }
    }

    fn bind_vma(&self, vma: &Vma, pte_flags: u64, flags: u32) -> Result<()> {
        match self {
            Self::Native(n) => n.bind_vma(vma, pte_flags, flags),
            Self::Pv(p) => p.bind_vma(vma, pte_flags, flags),
        }
    }

    fn unbind_vma(&self, vma: &Vma) -> Result<()> {
        match self {
            Self::Native(n) => n.unbind_vma(vma),
            Self::Pv(p) => p.unbind_vma(vma),
        }
    }
}

pub enum GgttDispatch<N> {
    Native(N),
    Pv(PvGgtt),
}

impl<N: GgttOps> GgttOps for GgttDispatch<N> {
    fn insert_entries(&self, vma: &Vma, pte_flags: u64) -> Result<()> {
        match self {
            Self::Native(n) => n.insert_entries(vma, pte_flags),
            Self::Pv(p) => p.insert_entries(vma, pte_flags),
        }
    }

    fn bind_vma(&self, vma: &Vma, pte_flags: u64, flags: u32) -> Result<()> {
        match self {
            Self::Native(n) => n.bind_vma(vma, pte_flags, flags),
            Self::Pv(p) => p.bind_vma(vma, pte_flags, flags),
        }
    }

    fn unbind_vma(&self, vma: &Vma) -> Result<()> {
        match self {
            Self::Native(n) => n.unbind_vma(vma),
            Self::Pv(p) => p.unbind_vma(vma),
        }
    }
}

pub enum ContextDispatch<N> {
    Native(N),
    Pv(PvContextOps),
}

impl<N: ContextOps> ContextOps for ContextDispatch<N> {
    fn alloc(&self, engine: u32, ctx_gpa: u64) -> Result<()> {
        match self {
            Self::Native(n) => n.alloc(engine, ctx_gpa),
            Self::Pv(p) => p.alloc(engine, ctx_gpa),
        }
    }

    fn destroy(&self, engine: u32, ctx_gpa: u64) -> Result<()> {
        match self {
            Self::Native(n) => n.destroy(engine, ctx_gpa),
            Self::Pv(p) => p.destroy(engine, ctx_gpa),
        }
    }

    fn pin(&self, engine: u32, ctx_gpa: u64) -> Result<()> {
        match self {
            Self::Native(n) => n.pin(engine, ctx_gpa),
            Self::Pv(p) => p.pin(engine, ctx_gpa),
        }
    }

    fn unpin(&self, engine: u32, ctx_gpa: u64) -> Result<()> {
        match self {
            Self::Native(n) => n.unpin(engine, ctx_gpa),
            Self::Pv(p) => p.unpin(engine, ctx_gpa),
        }
    }

    fn reset(&self, engine: u32, ctx_gpa: u64) -> Result<()> {
        match self {
            Self::Native(n) => n.reset(engine, ctx_gpa),
            Self::Pv(p) => p.reset(engine, ctx_gpa),
        }
    }
}

impl<N> PpgttDispatch<N> {
    pub fn is_pv(&self) -> bool {
        matches!(self, Self::Pv(_))
    }
}

impl<N> GgttDispatch<N> {
    pub fn is_pv(&self) -> bool {
        matches!(self, Self::Pv(_))
    }
}

impl<N> ContextDispatch<N> {
    pub fn is_pv(&self) -> bool {
        matches!(self, Self::Pv(_))
    }
}

// ── Selection ──

impl PvInstance {
    fn actions_for(&self, cap: PvCaps) -> Option<PvActions> {
        if self.has(cap) {
            self.actions()
        } else {
            None
        }
    }

    /// PV page table ops for `table_root` if PPGTT was negotiated.
    pub fn ppgtt_ops<N: PageTableOps>(&self, native: N, table_root: u64) -> PpgttDispatch<N> {
        match self.actions_for(PvCaps::PPGTT) {
            Some(actions) => PpgttDispatch::Pv(PvPpgtt::new(actions, table_root)),
            None => PpgttDispatch::Native(native),
        }
    }

    pub fn ggtt_ops<N: GgttOps>(&self, native: N) -> GgttDispatch<N> {
        match self.actions_for(PvCaps::GGTT) {
            Some(actions) => GgttDispatch::Pv(PvGgtt::new(actions)),
            None => GgttDispatch::Native(native),
        }
    }

    pub fn context_ops<N: ContextOps>(&self, native: N) -> ContextDispatch<N> {
        match self.actions_for(PvCaps::HW_CONTEXT) {
            Some(actions) => ContextDispatch::Pv(PvContextOps::new(actions)),
            None => ContextDispatch::Native(native),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::PvInstanceBuilder;
    use crate::loopback::LoopbackHost;
    use pvgpu_core::args::PvVma;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts calls; stands in for the native implementation.
    #[derive(Default)]
    struct Native(AtomicUsize);

    impl Native {
        fn hit(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    impl PageTableOps for &Native {
        fn allocate_va_range(&self, _: u64, _: u64) -> Result<()> {
            self.hit()
        }
        fn clear_range(&self, _: u64, _: u64) -> Result<()> {
            self.hit()
        }
        fn insert_entries(&self, _: &Vma, _: u64) -> Result<()> {
            self.hit()
        }
        fn bind_vma(&self, _: &Vma, _: u64, _: u32) -> Result<()> {
            self.hit()
        }
        fn unbind_vma(&self, _: &Vma) -> Result<()> {
            self.hit()
        }
    }

    impl ContextOps for &Native {
        fn alloc(&self, _: u32, _: u64) -> Result<()> {
            self.hit()
        }
        fn destroy(&self, _: u32, _: u64) -> Result<()> {
            self.hit()
        }
        fn pin(&self, _: u32, _: u64) -> Result<()> {
            self.hit()
        }
        fn unpin(&self, _: u32, _: u64) -> Result<()> {
            self.hit()
        }
        fn reset(&self, _: u32, _: u64) -> Result<()> {
            self.hit()
        }
    }

    fn instance(offer: PvCaps) -> (Arc<LoopbackHost>, PvInstance) {
        let host = Arc::new(LoopbackHost::new(offer.bits()));
        let pv = PvInstanceBuilder::new().build(Arc::clone(&host)).unwrap();
        (host, pv)
    }

    #[test]
    fn test_selection_follows_caps() {
        let native = Native::default();
        let (host, pv) = instance(PvCaps::GGTT);
        let ppgtt = pv.ppgtt_ops(&native, 0x1000);
        assert!(!ppgtt.is_pv());
        ppgtt.allocate_va_range(0, 4096).unwrap();
        assert_eq!(native.0.load(Ordering::Relaxed), 1);
        assert!(host.messages().is_empty());

        let ctx = pv.context_ops(&native);
        assert!(!ctx.is_pv());
    }

    #[test]
    fn test_ppgtt_unbind_only_after_bind() {
        let native = Native::default();
        let (host, pv) = instance(PvCaps::PPGTT);
        let ppgtt = pv.ppgtt_ops(&native, 0xA000);
        assert!(ppgtt.is_pv());
        let vma = Vma::new(0x10000, vec![0x1000, 0x2000]);

        // never bound: nothing to tear down
        ppgtt.unbind_vma(&vma).unwrap();
        assert!(host.messages().is_empty());

        ppgtt.bind_vma(&vma, 0x3, 0x4).unwrap();
        assert_eq!(vma.bind_flags() & VMA_ALLOC, VMA_ALLOC);
        ppgtt.unbind_vma(&vma).unwrap();
        ppgtt.unbind_vma(&vma).unwrap();

        let actions: Vec<u16> = host.messages().iter().map(|m| m.action).collect();
        assert_eq!(
            actions,
            vec![ActionCode::PpgttBind.code(), ActionCode::PpgttUnbind.code()]
        );
        let bind = PvVma::from_words(&host.messages()[0].payload).unwrap();
        assert_eq!((bind.flags, bind.pml4, bind.size), (0x4, 0xA000, 2));
        assert_eq!(native.0.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_ggtt_bind_sets_both_bind_flags() {
        struct NoGgtt;
        impl GgttOps for NoGgtt {
            fn insert_entries(&self, _: &Vma, _: u64) -> Result<()> {
                unreachable!()
            }
            fn bind_vma(&self, _: &Vma, _: u64, _: u32) -> Result<()> {
                unreachable!()
            }
            fn unbind_vma(&self, _: &Vma) -> Result<()> {
                unreachable!()
            }
        }

        let (host, pv) = instance(PvCaps::GGTT);
        let ggtt = pv.ggtt_ops(NoGgtt);
        let vma = Vma::new(0x8000, vec![0x4000]);
        ggtt.bind_vma(&vma, 0x1, 0).unwrap();
        assert_eq!(vma.bind_flags(), VMA_GLOBAL_BIND | VMA_LOCAL_BIND);
        ggtt.unbind_vma(&vma).unwrap();
        assert_eq!(vma.bind_flags(), 0);
        assert_eq!(host.messages().len(), 2);
        assert_eq!(host.messages()[0].action, ActionCode::GgttBind.code());
    }

    #[test]
    fn test_context_ops_codes() {
        let native = Native::default();
        let (host, pv) = instance(PvCaps::HW_CONTEXT);
        let ctx = pv.context_ops(&native);
        ctx.alloc(1, 0x1000).unwrap();
        ctx.pin(1, 0x1000).unwrap();
        ctx.unpin(1, 0x1000).unwrap();
        ctx.reset(1, 0x1000).unwrap();
        ctx.destroy(1, 0x1000).unwrap();
        let codes: Vec<u16> = host.messages().iter().map(|m| m.action).collect();
        assert_eq!(codes, vec![10, 12, 13, 14, 11]);
    }

    #[test]
    fn test_host_error_surfaces() {
        let native = Native::default();
        let (host, pv) = instance(PvCaps::PPGTT);
        host.set_mode(crate::loopback::HostMode::Reject(1));
        let ppgtt = pv.ppgtt_ops(&native, 0);
        assert_eq!(
            ppgtt.clear_range(0, 4096),
            Err(pvgpu_core::PvError::Protocol(1))
        );
    }
}
