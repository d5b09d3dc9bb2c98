use crate::plan::Plan;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, LazyLock};
use timeseries::timestamp::{parse_timestamp, to_iso};

static CUSTOM_INPUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s*([a-z]*)$").unwrap());

/// Source of the current instant for relative time ranges.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    pub const ALL: [TimeUnit; 3] = [Self::Minute, Self::Hour, Self::Day];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }

    /// `amount` units, or `None` when that does not fit in a duration.
    pub fn delta(&self, amount: u32) -> Option<TimeDelta> {
        let amount = i64::from(amount);
        match self {
            Self::Minute => TimeDelta::try_minutes(amount),
            Self::Hour => TimeDelta::try_hours(amount),
            Self::Day => TimeDelta::try_days(amount),
        }
    }

    /// Matches a unit suffix that is a prefix of the unit's name or shares its
    /// first letter, so `m`, `min`, `mins` and `minutes` all mean minutes.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|unit| {
            let name = unit.as_str();
            name.starts_with(suffix) || suffix.starts_with(&name[..1])
        })
    }

    fn start_of(&self, dt: DateTime<Utc>) -> DateTime<Utc> {
        self.delta(1)
            .and_then(|unit| dt.duration_trunc(unit).ok())
            .unwrap_or(dt)
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedCustomInput {
    Number { value: u32 },
    Unit { value: u32, unit: TimeUnit },
    Invalid,
}

/// Parses operator shorthand such as `2h`, `30`, `7 days` or `15 min`.
pub fn parse_custom_input(text: &str) -> ParsedCustomInput {
    let text = text.trim().to_lowercase();
    let Some(captures) = CUSTOM_INPUT.captures(&text) else {
        return ParsedCustomInput::Invalid;
    };
    let Some(value) = captures[1].parse::<u32>().ok().filter(|v| *v > 0) else {
        return ParsedCustomInput::Invalid;
    };

    match &captures[2] {
        "" => ParsedCustomInput::Number { value },
        suffix => match TimeUnit::from_suffix(suffix) {
            Some(unit) => ParsedCustomInput::Unit { value, unit },
            None => ParsedCustomInput::Invalid,
        },
    }
}

/// One end of a helper's range, evaluated against the clock on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperBound {
    Now,
    /// Left open; resolves to now when the range is resolved.
    Unset,
    Ago {
        amount: u32,
        unit: TimeUnit,
        /// Truncate to the start of `unit` after subtracting.
        truncate: bool,
    },
}

impl HelperBound {
    fn calc(&self, clock: &dyn Clock) -> String {
        match self {
            Self::Now => to_iso(clock.now()),
            Self::Unset => String::new(),
            Self::Ago {
                amount,
                unit,
                truncate,
            } => {
                // never earlier than the epoch
                let dt = unit
                    .delta(*amount)
                    .and_then(|delta| clock.now().checked_sub_signed(delta))
                    .map_or(DateTime::UNIX_EPOCH, |dt| dt.max(DateTime::UNIX_EPOCH));
                to_iso(if *truncate { unit.start_of(dt) } else { dt })
            }
        }
    }
}

/// A named, relative time range preset such as "Last hour".
#[derive(Clone)]
pub struct DatetimeHelper {
    pub text: String,
    pub from: HelperBound,
    pub to: HelperBound,
    pub default: bool,
    /// Plans the helper is offered to. Empty means every plan.
    pub plans: Vec<Plan>,
    clock: Arc<dyn Clock>,
}

impl DatetimeHelper {
    pub fn new(
        text: impl Into<String>,
        from: HelperBound,
        to: HelperBound,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            text: text.into(),
            from,
            to,
            default: false,
            plans: Vec::new(),
            clock,
        }
    }

    #[inline]
    pub fn with_default(mut self, default: bool) -> Self {
        self.default = default;

        self
    }

    #[inline]
    pub fn with_plans(mut self, plans: Vec<Plan>) -> Self {
        self.plans = plans;

        self
    }

    pub fn calc_from(&self) -> String {
        self.from.calc(self.clock.as_ref())
    }

    pub fn calc_to(&self) -> String {
        self.to.calc(self.clock.as_ref())
    }

    pub fn is_available_for(&self, plan: Plan) -> bool {
        self.plans.is_empty() || self.plans.contains(&plan)
    }
}

impl fmt::Debug for DatetimeHelper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatetimeHelper")
            .field("text", &self.text)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("default", &self.default)
            .field("plans", &self.plans)
            .finish()
    }
}

fn preset(text: &str, amount: u32, unit: TimeUnit, clock: &Arc<dyn Clock>) -> DatetimeHelper {
    DatetimeHelper::new(
        text,
        HelperBound::Ago {
            amount,
            unit,
            truncate: true,
        },
        HelperBound::Unset,
        clock.clone(),
    )
}

/// Presets offered by the log previewer pages.
pub fn previewer_helpers(clock: Arc<dyn Clock>) -> Vec<DatetimeHelper> {
    vec![
        preset("Last hour", 1, TimeUnit::Hour, &clock).with_default(true),
        preset("Last 3 hours", 3, TimeUnit::Hour, &clock),
        preset("Last 24 hours", 1, TimeUnit::Day, &clock),
    ]
}

/// Presets offered by the logs explorer.
pub fn explorer_helpers(clock: Arc<dyn Clock>) -> Vec<DatetimeHelper> {
    let paid = vec![Plan::Pro, Plan::Payg, Plan::Team, Plan::Enterprise];
    vec![
        preset("Last hour", 1, TimeUnit::Hour, &clock).with_default(true),
        preset("Last 24 hours", 1, TimeUnit::Day, &clock),
        preset("Last 3 days", 3, TimeUnit::Day, &clock).with_plans(paid.clone()),
        preset("Last 7 days", 7, TimeUnit::Day, &clock).with_plans(paid),
    ]
}

/// The helper flagged as default, or the first one.
pub fn default_helper(helpers: &[DatetimeHelper]) -> Option<&DatetimeHelper> {
    helpers.iter().find(|h| h.default).or_else(|| helpers.first())
}

/// A helper covering the last `value` units, up to now.
pub fn generate_dynamic_helper(value: u32, unit: TimeUnit, clock: Arc<dyn Clock>) -> DatetimeHelper {
    let plural = if value == 1 { "" } else { "s" };
    DatetimeHelper::new(
        format!("Last {} {}{}", value, unit, plural),
        HelperBound::Ago {
            amount: value,
            unit,
            truncate: false,
        },
        HelperBound::Now,
        clock,
    )
}

/// One helper per unit, for a bare number whose unit is ambiguous.
pub fn generate_dynamic_helpers(value: u32, clock: Arc<dyn Clock>) -> Vec<DatetimeHelper> {
    TimeUnit::ALL
        .into_iter()
        .map(|unit| generate_dynamic_helper(value, unit, clock.clone()))
        .collect()
}

/// Helpers for free-form input, or `None` when the input is not understood
/// and the static presets should be shown instead.
pub fn generate_helpers_from_input(
    text: &str,
    clock: Arc<dyn Clock>,
) -> Option<Vec<DatetimeHelper>> {
    match parse_custom_input(text) {
        ParsedCustomInput::Number { value } => Some(generate_dynamic_helpers(value, clock)),
        ParsedCustomInput::Unit { value, unit } => {
            Some(vec![generate_dynamic_helper(value, unit, clock)])
        }
        ParsedCustomInput::Invalid => {
            debug!("Ignoring custom time range input {:?}", text);
            None
        }
    }
}

/// The date picker state kept by the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatePickerValue {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub is_helper: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTimeRange {
    pub from: String,
    pub to: String,
}

fn non_blank(value: String) -> Option<String> {
    (!value.trim().is_empty()).then_some(value)
}

/// Resolves the picker state into concrete timestamps. A blank end always
/// resolves to now.
pub fn resolve_log_date_range(
    value: &DatePickerValue,
    helpers: &[DatetimeHelper],
    clock: &dyn Clock,
) -> ResolvedTimeRange {
    let now = || to_iso(clock.now());

    if value.is_helper {
        let helper = helpers
            .iter()
            .find(|h| value.text.as_deref() == Some(h.text.as_str()))
            .or_else(|| default_helper(helpers));
        if let Some(helper) = helper {
            return ResolvedTimeRange {
                from: helper.calc_from(),
                to: non_blank(helper.calc_to()).unwrap_or_else(now),
            };
        }
    }

    let from = non_blank(value.from.clone())
        .or_else(|| default_helper(helpers).map(DatetimeHelper::calc_from))
        .unwrap_or_else(now);
    ResolvedTimeRange {
        from,
        to: non_blank(value.to.clone()).unwrap_or_else(now),
    }
}

/// A start and end timestamp where either side may be blank.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampPair {
    pub start: String,
    pub end: String,
}

impl TimestampPair {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }
}

/// Reconciles a new, partially specified range against the previous one.
///
/// When only a new end is given and moving back from it by the previous
/// width lands before the previous start, the start is moved back to keep
/// the previous width. When only a new start is given, the previous end is
/// kept. Otherwise the new pair is used as is.
pub fn ensure_no_timestamp_conflict(
    previous: &TimestampPair,
    next: &TimestampPair,
) -> TimestampPair {
    if !previous.start.is_empty() && !previous.end.is_empty() && !next.end.is_empty() && next.start.is_empty() {
        let parsed = (
            parse_timestamp(&previous.start),
            parse_timestamp(&previous.end),
            parse_timestamp(&next.end),
        );
        if let (Some(start), Some(end), Some(next_end)) = parsed {
            let width = TimeDelta::minutes((end - start).num_minutes().abs());
            let start = match next_end.checked_sub_signed(width) {
                Some(shifted) if shifted < start => shifted,
                _ => start,
            };
            return TimestampPair::new(to_iso(start), next.end.clone());
        }
    } else if next.end.is_empty() && !next.start.is_empty() {
        return TimestampPair::new(next.start.clone(), previous.end.clone());
    }

    next.clone()
}
