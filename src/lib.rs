pub mod batch;
pub mod config;
pub mod diagnosis;
pub mod error;
pub mod llm;
pub mod models;
pub mod parsers;
pub mod storage;
pub mod tracker;

pub use batch::{process_all_batches, run_sequential, BatchOrchestrator, BatchRun, PacingPolicy, RunStats};
pub use config::{BatchConfig, Config};
pub use diagnosis::{DiagnosisPipeline, JudgeReport, JudgeRequest, RunReport, RunRequest};
pub use error::{Error, Result};
pub use models::JudgeKind;
pub use llm::{ConfigRegistry, ModelHandler, PromptRegistry};
pub use storage::Storage;
pub use tracker::{RateLimitAction, TrackerRegistry};
