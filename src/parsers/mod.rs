pub mod differential;
pub mod judged;
pub mod json;

pub use differential::{
    extract_tagged_block, normalize, parse_differential, parse_json_differential,
};
pub use judged::{parse_semantic_judgement, parse_severity_judgement};
pub use json::extract_json;
