pub mod catalog;
pub mod rate_tracker;
pub mod registry;

pub use rate_tracker::{
    LimitKind, LimitState, LimitUsage, PriceScale, RateLimitAction, RateLimitStatus, RateTracker,
    TokenCount, TrackerLimits, UsageSummary,
};
pub use registry::{SharedTracker, TrackerRegistry};
