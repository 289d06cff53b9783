pub mod orchestrator;
pub mod pacing;
pub mod sequential;
pub mod stats;

pub use orchestrator::{process_all_batches, BatchOrchestrator, BatchRun};
pub use pacing::PacingPolicy;
pub use sequential::run_sequential;
pub use stats::RunStats;
