//! Five-field cron expressions.
//!
//! Fields are `minute hour day month weekday` with ranges 0-59, 0-23, 1-31,
//! 1-12 and 0-6 (Sunday is 0). Each field accepts `*`, an integer, a
//! comma-separated list, a range `a-b`, and the steps `*/n`, `a-b/n` and
//! `a/n`.
//!
//! All five predicates must hold for a minute to match. Day-of-month and
//! weekday are ANDed, unlike POSIX cron which ORs them when both are
//! restricted.

use crate::error::{CronParseError, ScheduleError};
use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;
use opsflow_core::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How far ahead [`CronExpression::next_after`] searches.
const SEARCH_HORIZON_DAYS: i64 = 5 * 366;

const WEEKDAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// One of the five positions in a cron expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CronField {
    Minute,
    Hour,
    Day,
    Month,
    Weekday,
}

impl CronField {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Month => "month",
            Self::Weekday => "weekday",
        }
    }

    /// Inclusive bounds of the field.
    #[must_use]
    pub fn bounds(self) -> (u32, u32) {
        match self {
            Self::Minute => (0, 59),
            Self::Hour => (0, 23),
            Self::Day => (1, 31),
            Self::Month => (1, 12),
            Self::Weekday => (0, 6),
        }
    }
}

impl fmt::Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The set of values one field admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet {
    bits: u64,
    min: u32,
    max: u32,
    /// Set when the field was written as a single integer.
    single: Option<u32>,
}

impl FieldSet {
    fn parse(field: CronField, text: &str) -> std::result::Result<Self, CronParseError> {
        let (min, max) = field.bounds();
        let invalid = |reason: String| CronParseError::InvalidField {
            field,
            value: text.to_string(),
            reason,
        };
        let number = |s: &str| -> std::result::Result<u32, CronParseError> {
            let value: u32 = s
                .parse()
                .map_err(|_| invalid(format!("'{s}' is not a number")))?;
            if value < min || value > max {
                return Err(invalid(format!(
                    "value {value} is out of range {min}-{max}"
                )));
            }
            Ok(value)
        };

        let mut bits = 0u64;
        for part in text.split(',') {
            if part.is_empty() {
                return Err(invalid("empty list element".to_string()));
            }

            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .map_err(|_| invalid(format!("step '{step}' is not a number")))?;
                    if step == 0 {
                        return Err(invalid("step must be at least 1".to_string()));
                    }
                    (range, Some(step))
                }
                None => (part, None),
            };

            let (start, end) = if range == "*" {
                (min, max)
            } else if let Some((a, b)) = range.split_once('-') {
                let (a, b) = (number(a)?, number(b)?);
                if a > b {
                    return Err(invalid(format!("range start {a} is greater than end {b}")));
                }
                (a, b)
            } else {
                let a = number(range)?;
                match step {
                    Some(_) => (a, max),
                    None => (a, a),
                }
            };

            let step = usize::try_from(step.unwrap_or(1)).unwrap_or(usize::MAX);
            for value in (start..=end).step_by(step) {
                bits |= 1 << value;
            }
        }

        Ok(Self {
            bits,
            min,
            max,
            single: text.parse().ok(),
        })
    }

    fn contains(&self, value: u32) -> bool {
        value <= 63 && self.bits & (1 << value) != 0
    }

    /// Smallest admitted value `>= from`.
    fn first_from(&self, from: u32) -> Option<u32> {
        (from..=self.max).find(|&v| self.contains(v))
    }

    fn is_full(&self) -> bool {
        (self.min..=self.max).all(|v| self.contains(v))
    }
}

/// The shape of an expression, used for descriptions and cadence tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronShape {
    /// A fixed minute of every hour.
    Hourly { minute: u32 },
    /// A fixed time every day.
    Daily { hour: u32, minute: u32 },
    /// A fixed time on one weekday.
    Weekly { weekday: u32, hour: u32, minute: u32 },
    /// A fixed time on one day of the month.
    Monthly { day: u32, hour: u32, minute: u32 },
    /// Anything else.
    Custom,
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    minutes: FieldSet,
    hours: FieldSet,
    days: FieldSet,
    months: FieldSet,
    weekdays: FieldSet,
}

impl CronExpression {
    /// Parses a five-field expression.
    ///
    /// # Errors
    ///
    /// Returns `WrongFieldCount` or an `InvalidField` naming the bad field.
    pub fn parse(expression: &str) -> std::result::Result<Self, CronParseError> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(CronParseError::WrongFieldCount { found: parts.len() });
        }

        Ok(Self {
            minutes: FieldSet::parse(CronField::Minute, parts[0])?,
            hours: FieldSet::parse(CronField::Hour, parts[1])?,
            days: FieldSet::parse(CronField::Day, parts[2])?,
            months: FieldSet::parse(CronField::Month, parts[3])?,
            weekdays: FieldSet::parse(CronField::Weekday, parts[4])?,
            source: parts.join(" "),
        })
    }

    /// The expression with whitespace normalized.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Classifies the expression by shape.
    #[must_use]
    pub fn shape(&self) -> CronShape {
        let any_day = self.days.is_full();
        let any_month = self.months.is_full();
        let any_weekday = self.weekdays.is_full();

        match (self.minutes.single, self.hours.single) {
            (Some(minute), Some(hour)) if any_month => {
                match (any_day, any_weekday, self.days.single, self.weekdays.single) {
                    (true, true, _, _) => CronShape::Daily { hour, minute },
                    (true, false, _, Some(weekday)) => CronShape::Weekly {
                        weekday,
                        hour,
                        minute,
                    },
                    (false, true, Some(day), _) => CronShape::Monthly { day, hour, minute },
                    _ => CronShape::Custom,
                }
            }
            (Some(minute), None) if self.hours.is_full() && any_day && any_month && any_weekday => {
                CronShape::Hourly { minute }
            }
            _ => CronShape::Custom,
        }
    }

    /// Human-readable description.
    #[must_use]
    pub fn describe(&self) -> String {
        match self.shape() {
            CronShape::Daily { hour, minute } => format!("Daily at {hour}:{minute:02}"),
            CronShape::Hourly { minute } => format!("Every hour at minute {minute}"),
            CronShape::Weekly {
                weekday,
                hour,
                minute,
            } => {
                let name = WEEKDAY_NAMES.get(weekday as usize).copied().unwrap_or("?");
                format!("Weekly on {name} at {hour}:{minute:02}")
            }
            CronShape::Monthly { day, hour, minute } => {
                format!("Monthly on day {day} at {hour}:{minute:02}")
            }
            CronShape::Custom => format!("Custom schedule ({})", self.source),
        }
    }

    /// Whether the given local wall-clock minute matches.
    #[must_use]
    pub fn matches(&self, local: &NaiveDateTime) -> bool {
        self.minutes.contains(local.minute())
            && self.hours.contains(local.hour())
            && self.day_matches(local.date())
            && self.months.contains(local.month())
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        self.days.contains(date.day()) && self.weekdays.contains(date.weekday().num_days_from_sunday())
    }

    /// Soonest instant strictly after `after` matching in `tz`.
    ///
    /// Local times that fall in a DST gap are skipped. An ambiguous local
    /// time resolves to its earliest instant that is still after `after`.
    /// Returns `None` if nothing matches within about five years.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&tz).naive_local();
        let mut candidate = local.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let limit = local + Duration::days(SEARCH_HORIZON_DAYS);

        while candidate <= limit {
            let date = candidate.date();

            if !self.months.contains(date.month()) {
                candidate = first_of_next_month(date)?;
                continue;
            }
            if !self.day_matches(date) {
                candidate = date.succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            let Some(hour) = self.hours.first_from(candidate.hour()) else {
                candidate = date.succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            };
            if hour != candidate.hour() {
                candidate = date.and_hms_opt(hour, 0, 0)?;
            }
            let Some(minute) = self.minutes.first_from(candidate.minute()) else {
                candidate = date.and_hms_opt(hour, 0, 0)? + Duration::hours(1);
                continue;
            };
            candidate = date.and_hms_opt(hour, minute, 0)?;

            let resolved = match tz.from_local_datetime(&candidate) {
                LocalResult::Single(dt) => Some(dt),
                LocalResult::Ambiguous(earliest, latest) => {
                    if earliest.with_timezone(&Utc) > after {
                        Some(earliest)
                    } else {
                        Some(latest)
                    }
                }
                LocalResult::None => None,
            };

            if let Some(dt) = resolved {
                let utc = dt.with_timezone(&Utc);
                if utc > after {
                    return Some(utc);
                }
            }
            candidate += Duration::minutes(1);
        }

        None
    }
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDateTime> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

impl FromStr for CronExpression {
    type Err = CronParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Outcome of validating a cron expression. Never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronValidation {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Validates an expression and describes it.
#[must_use]
pub fn parse_cron_expression(expression: &str) -> CronValidation {
    match CronExpression::parse(expression) {
        Ok(cron) => CronValidation {
            is_valid: true,
            description: Some(cron.describe()),
            error: None,
        },
        Err(err) => CronValidation {
            is_valid: false,
            description: None,
            error: Some(err.to_string()),
        },
    }
}

/// Parses an IANA timezone name.
///
/// # Errors
///
/// Returns `InvalidTimezone` for unknown names.
pub fn parse_timezone(timezone: &str) -> Result<Tz, ScheduleError> {
    timezone.parse::<Tz>().map_err(|_| {
        ScheduleError::InvalidTimezone {
            timezone: timezone.to_string(),
        }
        .into()
    })
}

/// Next fire time strictly after now.
///
/// # Errors
///
/// Returns `InvalidCronExpression`, `InvalidTimezone` or `NoUpcomingRun`.
pub fn calculate_next_run(expression: &str, timezone: &str) -> Result<DateTime<Utc>, ScheduleError> {
    calculate_next_run_from(expression, timezone, Utc::now())
}

/// Next fire time strictly after `after`.
///
/// # Errors
///
/// Returns `InvalidCronExpression`, `InvalidTimezone` or `NoUpcomingRun`.
pub fn calculate_next_run_from(
    expression: &str,
    timezone: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    let cron = CronExpression::parse(expression).map_err(|err| {
        ScheduleError::InvalidCronExpression {
            expression: expression.to_string(),
            reason: err.to_string(),
        }
    })?;
    let tz = parse_timezone(timezone)?;

    Ok(cron
        .next_after(after, tz)
        .ok_or_else(|| ScheduleError::NoUpcomingRun {
            expression: expression.to_string(),
        })?)
}
