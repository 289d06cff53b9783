pub mod judge;
pub mod pipeline;
pub mod results;

pub use judge::{build_judge_items, judge_template, process_judgements, ProcessedJudgements};
pub use pipeline::{DiagnosisPipeline, JudgeReport, JudgeRequest, RunReport, RunRequest};
pub use results::{parse_answer, process_results, FailureDetail, ProcessedResults};
