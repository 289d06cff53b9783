use std::collections::VecDeque;

use chrono::{DateTime, Duration as ChronoDuration, Local, Timelike};
use serde::Serialize;

/// Buffer added on top of every computed reset wait.
const RESET_BUFFER_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PriceScale {
    PerMillion,
    PerThousand,
    PerToken,
}

impl PriceScale {
    fn divisor(&self) -> f64 {
        match self {
            PriceScale::PerMillion => 1_000_000.0,
            PriceScale::PerThousand => 1_000.0,
            PriceScale::PerToken => 1.0,
        }
    }
}

/// Static limits and prices for one model. A limit of 0 means unlimited.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerLimits {
    pub rpm: u32,
    pub rpd: u32,
    pub tpm: u64,
    pub tpd: u64,
    pub prompt_price: f64,
    pub completion_price: f64,
    pub price_scale: PriceScale,
    pub context_window: u32,
}

impl Default for TrackerLimits {
    fn default() -> Self {
        Self {
            rpm: 0,
            rpd: 0,
            tpm: 0,
            tpd: 0,
            prompt_price: 0.0,
            completion_price: 0.0,
            price_scale: PriceScale::PerMillion,
            context_window: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LimitKind {
    Rpm,
    Rpd,
    Tpm,
    Tpd,
}

impl LimitKind {
    pub fn is_minute_scoped(&self) -> bool {
        matches!(self, LimitKind::Rpm | LimitKind::Tpm)
    }

    pub fn label(&self) -> &'static str {
        match self {
            LimitKind::Rpm => "RPM",
            LimitKind::Rpd => "RPD",
            LimitKind::Tpm => "TPM",
            LimitKind::Tpd => "TPD",
        }
    }
}

/// Tokens consumed by one request, either as a total or split by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCount {
    Total(u64),
    Split { prompt: u64, completion: u64 },
}

impl TokenCount {
    pub fn total(&self) -> u64 {
        match self {
            TokenCount::Total(total) => *total,
            TokenCount::Split { prompt, completion } => prompt + completion,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LimitState {
    Ok,
    NearLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LimitUsage {
    pub current: u64,
    pub limit: u64,
    pub percent: f64,
}

impl LimitUsage {
    fn new(current: u64, limit: u64) -> Self {
        let percent = if limit > 0 {
            current as f64 / limit as f64
        } else {
            0.0
        };
        Self {
            current,
            limit,
            percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStatus {
    pub status: LimitState,
    pub rpm: LimitUsage,
    pub rpd: LimitUsage,
    pub tpm: Option<LimitUsage>,
    pub tpd: Option<LimitUsage>,
    pub near_limits: Vec<LimitKind>,
    pub limit_messages: Vec<String>,
}

impl RateLimitStatus {
    pub fn is_near_limit(&self) -> bool {
        self.status == LimitState::NearLimit
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    pub success_count: u64,
    pub failed_count: u64,
    pub total_requests: u64,
    pub total_tokens: u64,
}

/// Rolling usage ledger for a single model.
///
/// History is kept for 24 hours and recounted on every check, which is
/// cheap at the request volumes a benchmark run produces.
#[derive(Debug, Clone)]
pub struct RateTracker {
    model_name: String,
    limits: TrackerLimits,
    requests: VecDeque<DateTime<Local>>,
    tokens: VecDeque<(DateTime<Local>, u64)>,
    success_count: u64,
    failed_count: u64,
}

impl RateTracker {
    pub fn new(model_name: impl Into<String>, limits: TrackerLimits) -> Self {
        Self {
            model_name: model_name.into(),
            limits,
            requests: VecDeque::new(),
            tokens: VecDeque::new(),
            success_count: 0,
            failed_count: 0,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn limits(&self) -> &TrackerLimits {
        &self.limits
    }

    pub fn success_count(&self) -> u64 {
        self.success_count
    }

    pub fn failed_count(&self) -> u64 {
        self.failed_count
    }

    pub fn record_request(&mut self, tokens: TokenCount, success: bool) {
        self.record_request_at(Local::now(), tokens, success);
    }

    /// Records a request as if it happened at `at`. Pruning is always
    /// relative to the wall clock, so backdated entries older than a day
    /// are dropped immediately.
    pub fn record_request_at(&mut self, at: DateTime<Local>, tokens: TokenCount, success: bool) {
        self.requests.push_back(at);
        self.tokens.push_back((at, tokens.total()));

        if success {
            self.success_count += 1;
        } else {
            self.failed_count += 1;
        }

        self.prune(Local::now());
    }

    fn prune(&mut self, now: DateTime<Local>) {
        let day_ago = now - ChronoDuration::days(1);
        self.requests.retain(|ts| *ts > day_ago);
        self.tokens.retain(|(ts, _)| *ts > day_ago);
    }

    pub fn check_rate_limits(&self, buffer_percent: f64) -> RateLimitStatus {
        self.check_rate_limits_at(Local::now(), buffer_percent)
    }

    pub fn check_rate_limits_at(&self, now: DateTime<Local>, buffer_percent: f64) -> RateLimitStatus {
        let minute_ago = now - ChronoDuration::minutes(1);
        let day_ago = now - ChronoDuration::days(1);

        let requests_last_minute = self.requests.iter().filter(|ts| **ts > minute_ago).count() as u64;
        let requests_last_day = self.requests.iter().filter(|ts| **ts > day_ago).count() as u64;

        let tokens_last_minute: u64 = self
            .tokens
            .iter()
            .filter(|(ts, _)| *ts > minute_ago)
            .map(|(_, count)| count)
            .sum();
        let tokens_last_day: u64 = self
            .tokens
            .iter()
            .filter(|(ts, _)| *ts > day_ago)
            .map(|(_, count)| count)
            .sum();

        let rpm = LimitUsage::new(requests_last_minute, self.limits.rpm as u64);
        let rpd = LimitUsage::new(requests_last_day, self.limits.rpd as u64);
        let tpm = (self.limits.tpm > 0).then(|| LimitUsage::new(tokens_last_minute, self.limits.tpm));
        let tpd = (self.limits.tpd > 0).then(|| LimitUsage::new(tokens_last_day, self.limits.tpd));

        let mut near_limits = Vec::new();
        let mut limit_messages = Vec::new();

        let dimensions = [
            (LimitKind::Rpm, Some(rpm)),
            (LimitKind::Rpd, Some(rpd)),
            (LimitKind::Tpm, tpm),
            (LimitKind::Tpd, tpd),
        ];
        for (kind, usage) in dimensions {
            let Some(usage) = usage else { continue };
            if usage.limit > 0 && usage.percent >= buffer_percent {
                near_limits.push(kind);
                limit_messages.push(format!(
                    "{}: {}/{} ({:.1}%)",
                    kind.label(),
                    usage.current,
                    usage.limit,
                    usage.percent * 100.0
                ));
            }
        }

        let status = if near_limits.is_empty() {
            LimitState::Ok
        } else {
            LimitState::NearLimit
        };

        RateLimitStatus {
            status,
            rpm,
            rpd,
            tpm,
            tpd,
            near_limits,
            limit_messages,
        }
    }

    pub fn should_pause(&self, buffer_percent: f64) -> (bool, Option<String>) {
        let status = self.check_rate_limits(buffer_percent);
        if status.is_near_limit() {
            let reason = format!(
                "Rate limits approaching: {}",
                status.limit_messages.join(", ")
            );
            return (true, Some(reason));
        }
        (false, None)
    }

    /// Seconds until the window behind `kind` rolls over, plus a small buffer.
    pub fn wait_for_reset(kind: LimitKind) -> u64 {
        Self::wait_for_reset_at(Local::now(), kind)
    }

    pub fn wait_for_reset_at(now: DateTime<Local>, kind: LimitKind) -> u64 {
        if kind.is_minute_scoped() {
            return 60 - now.second() as u64 + RESET_BUFFER_SECS;
        }

        let tomorrow = (now + ChronoDuration::days(1)).date_naive();
        let seconds_until_midnight = tomorrow
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
            .map(|midnight| (midnight - now).num_seconds().max(0) as u64)
            // Midnight can be skipped by a DST transition; fall back to a full day.
            .unwrap_or(24 * 60 * 60);

        seconds_until_midnight + RESET_BUFFER_SECS
    }

    /// Longest wait among the limits that are currently near.
    pub fn wait_for_status(status: &RateLimitStatus) -> Option<u64> {
        status
            .near_limits
            .iter()
            .map(|kind| Self::wait_for_reset(*kind))
            .max()
    }

    pub fn prompt_to_price(&self, prompt_tokens: u64, completion_tokens: u64, scale: f64) -> f64 {
        let divisor = self.limits.price_scale.divisor();
        let prompt_price = prompt_tokens as f64 * (self.limits.prompt_price / divisor);
        let completion_price = completion_tokens as f64 * (self.limits.completion_price / divisor);
        let total = prompt_price + completion_price;

        tracing::debug!(
            model = %self.model_name,
            "Prompt price: ${:.6}, completion price: ${:.6}, total: ${:.6}",
            prompt_price,
            completion_price,
            total
        );

        total * scale
    }

    pub fn usage_summary(&self) -> UsageSummary {
        UsageSummary {
            success_count: self.success_count,
            failed_count: self.failed_count,
            total_requests: self.requests.len() as u64,
            total_tokens: self.tokens.iter().map(|(_, count)| count).sum(),
        }
    }
}

/// What to do when a tracker reports that a model is near its limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RateLimitAction {
    Ignore,
    #[default]
    Warn,
    /// Sleep until the longest near limit resets.
    Wait,
}

impl std::str::FromStr for RateLimitAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ignore" | "off" => Ok(RateLimitAction::Ignore),
            "warn" | "log" => Ok(RateLimitAction::Warn),
            "wait" | "sleep" => Ok(RateLimitAction::Wait),
            other => Err(format!(
                "unknown rate limit action '{}', expected ignore, warn or wait",
                other
            )),
        }
    }
}
