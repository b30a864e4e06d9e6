//! # pvgpu-submit - workload submission over the PV shared page
//!
//! Instead of writing context descriptors into the execlist ports, each
//! engine fills its submission slot in the shared page and rings a
//! per-engine doorbell. The host clears `submitted` once it has taken the
//! slot.
//!
//! | Piece                 | Type               |
//! |-----------------------|--------------------|
//! | per-engine dequeue    | `EngineSubmitter`  |
//! | request bookkeeping   | `Request`          |
//! | scheduler callbacks   | `SchedulerHooks`   |
//! | ready queue           | `PriorityQueue`    |
//! | deferred tasklets     | `TaskletWorker`    |
//!
//! `PvSubmission::install` wires one engine per hardware engine and, unless
//! `inline_tasklets` is set, one worker thread that runs their tasklets.

pub mod config;
pub mod engine;
pub mod hooks;
pub mod ready_queue;
pub mod request;
pub mod worker;

pub use config::SubmitConfig;
pub use engine::{EngineState, EngineStats, EngineSubmitter};
pub use hooks::{NoopHooks, SchedulerHooks};
pub use ready_queue::{PriorityQueue, ReadyQueue};
pub use request::{Context, Request, CTX_DESC_FORCE_RESTORE};
pub use worker::{TaskletQueue, TaskletWorker};

use std::sync::Arc;

use pvgpu_core::caps::PvCaps;
use pvgpu_core::constants::PV_MAX_ENGINES;
use pvgpu_core::error::{PvError, Result};
use pvgpu_core::kinfo;
use pvgpu_module::PvInstance;

const ENGINE_NAMES: [&str; PV_MAX_ENGINES] = ["rcs0", "bcs0", "vcs0", "vcs1", "vecs0", "ccs0"];

/// Submission backend for every engine of one device.
pub struct PvSubmission {
    engines: Vec<Arc<EngineSubmitter>>,
    worker: Option<TaskletWorker>,
}

impl PvSubmission {
    /// Install the PV backend on `num_engines` engines.
    ///
    /// Fails with `NotNegotiated` unless SUBMISSION was agreed; the caller
    /// keeps the native backend in that case.
    pub fn install(
        pv: &PvInstance,
        num_engines: usize,
        hooks: Arc<dyn SchedulerHooks>,
        config: SubmitConfig,
    ) -> Result<Self> {
        pv.require(PvCaps::SUBMISSION)?;
        config.validate().map_err(PvError::Config)?;
        if num_engines == 0 || num_engines > PV_MAX_ENGINES {
            return Err(PvError::InvalidEngine(num_engines));
        }
        let page = pv
            .page()
            .ok_or(PvError::NotNegotiated(PvCaps::SUBMISSION))?;

        let scheduler = if config.inline_tasklets {
            None
        } else {
            Some(Arc::new(TaskletQueue::new(num_engines, config.tasklet_depth)))
        };

        let mut engines = Vec::with_capacity(num_engines);
        for (id, name) in ENGINE_NAMES.iter().enumerate().take(num_engines) {
            let engine = EngineSubmitter::new(
                id,
                Arc::clone(page),
                Arc::clone(pv.regs()),
                Arc::clone(&hooks),
                config.clone(),
                scheduler.clone(),
            )?
            .with_name(*name);
            engines.push(Arc::new(engine));
        }

        let worker = match scheduler {
            Some(queue) => Some(TaskletWorker::spawn(queue, engines.clone())?),
            None => None,
        };

        kinfo!(
            "PV submission on {} engine(s), {} port(s), {} tasklets",
            num_engines,
            config.ports,
            if worker.is_some() { "deferred" } else { "inline" }
        );
        Ok(Self { engines, worker })
    }

    pub fn engine(&self, id: usize) -> Option<&Arc<EngineSubmitter>> {
        self.engines.get(id)
    }

    pub fn engines(&self) -> &[Arc<EngineSubmitter>] {
        &self.engines
    }

    fn get(&self, id: usize) -> Result<&Arc<EngineSubmitter>> {
        self.engines.get(id).ok_or(PvError::InvalidEngine(id))
    }

    /// Queue `rq` on `engine`. A request that already retired is refused.
    pub fn submit(&self, engine: usize, rq: Arc<Request>) -> Result<()> {
        if self.get(engine)?.submit(rq) {
            Ok(())
        } else {
            Err(PvError::Malformed("request already retired"))
        }
    }

    /// Kick every engine, e.g. from the completion interrupt.
    pub fn kick_all(&self) {
        for engine in &self.engines {
            engine.kick();
        }
    }

    /// Full reset of one engine: prepare, rewind, finish.
    pub fn reset_engine(&self, engine: usize, stalled: bool) -> Result<()> {
        let engine = self.get(engine)?;
        engine.reset_prepare();
        engine.reset_rewind(stalled);
        engine.reset_finish();
        Ok(())
    }

    /// Cancel every request on every engine.
    pub fn cancel_all(&self) {
        for engine in &self.engines {
            engine.reset_prepare();
            engine.cancel_requests();
            engine.reset_finish();
        }
    }

    /// Stop the tasklet worker. Engines stay usable; later kicks run their
    /// tasklet on the caller's thread.
    pub fn shutdown(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

impl Drop for PvSubmission {
    fn drop(&mut self) {
        self.shutdown();
    }
}
