//! Swap pipeline: queue, worker pool and duplicate guard

mod engine;
mod guard;

pub use engine::{JobOutcome, SwapJob, SwapProcessor};
pub use guard::{InFlight, SwapGuard};
