//! Phase pipeline: extraction, three classification passes and the summary,
//! gated by per-phase checkpoints in the record store.

pub mod orchestrator;
pub mod phase;
pub mod report;
pub mod sampling;

pub use orchestrator::{Orchestrator, RunOptions};
pub use phase::Phase;
pub use report::{PhaseReport, PhaseStatus, RunReport};
