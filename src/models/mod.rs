pub mod work;
pub mod usage;
pub mod diagnosis;

pub use work::*;
pub use usage::*;
pub use diagnosis::*;
