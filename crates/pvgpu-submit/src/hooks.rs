//! Scheduler callbacks invoked by the submission engine.
//!
//! Every hook has an empty default. Hooks run with the engine's queue lock
//! held and must not call back into the engine.
//!
//! # Implementors
//!
//! - `NoopHooks`: nothing to observe

use crate::request::Request;

pub trait SchedulerHooks: Send + Sync {
    /// `rq`, the last request of a run, now occupies `port`.
    fn schedule_in(&self, _rq: &Request, _port: usize) {}

    /// The run ending with `rq` left the hardware, completed or not.
    fn schedule_out(&self, _rq: &Request) {}

    /// `rq` completed and was retired with status 0.
    fn retired(&self, _rq: &Request) {}

    /// `rq` will never run; `error` is a negative errno.
    fn mark_skipped(&self, _rq: &Request, _error: i32) {}

    /// `rq` was force-completed by cancellation.
    fn mark_complete(&self, _rq: &Request) {}

    /// `rq` is the active request of a reset; `guilty` if it had started.
    fn reset_request(&self, _rq: &Request, _guilty: bool) {}
}

pub struct NoopHooks;

impl SchedulerHooks for NoopHooks {}
