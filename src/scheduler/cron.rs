// Cron expressions - seconds-first, six fields, evaluated in UTC
//
//   ┌──────── second        0-59
//   │ ┌────── minute        0-59
//   │ │ ┌──── hour          0-23
//   │ │ │ ┌── day of month  1-31
//   │ │ │ │ ┌ month         1-12 or JAN-DEC
//   │ │ │ │ │ ┌ day of week 0-7 or SUN-SAT (0 and 7 are Sunday)
//   * * * * * *

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};

use super::ScheduleError;

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// How far `next_after` searches before giving up on an expression
const SEARCH_YEARS: i32 = 5;

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    names_start: u32,
}

const SECOND: FieldSpec = FieldSpec { name: "second", min: 0, max: 59, names: &[], names_start: 0 };
const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[], names_start: 0 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[], names_start: 0 };
const DAY_OF_MONTH: FieldSpec =
    FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[], names_start: 0 };
const MONTH: FieldSpec =
    FieldSpec { name: "month", min: 1, max: 12, names: &MONTH_NAMES, names_start: 1 };
// 7 is accepted and folded onto Sunday
const DAY_OF_WEEK: FieldSpec =
    FieldSpec { name: "day-of-week", min: 0, max: 7, names: &WEEKDAY_NAMES, names_start: 0 };

/// Set of allowed values for one field, one bit per value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bits(u64);

impl Bits {
    fn contains(self, value: u32) -> bool {
        self.0 & (1 << value) != 0
    }
}

/// A parsed six-field cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    seconds: Bits,
    minutes: Bits,
    hours: Bits,
    days_of_month: Bits,
    months: Bits,
    days_of_week: Bits,
    // A bare `*` or `?` (step 1) in a day field leaves it unrestricted; `*/n` restricts
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    /// Parse a six-field expression
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(ScheduleError::FieldCount {
                expression: expression.to_string(),
                found: fields.len(),
            });
        }

        let mut days_of_week = parse_field(fields[5], DAY_OF_WEEK)?;
        if days_of_week.contains(7) {
            days_of_week = Bits((days_of_week.0 | 1) & !(1 << 7));
        }

        Ok(Self {
            expression: fields.join(" "),
            seconds: parse_field(fields[0], SECOND)?,
            minutes: parse_field(fields[1], MINUTE)?,
            hours: parse_field(fields[2], HOUR)?,
            days_of_month: parse_field(fields[3], DAY_OF_MONTH)?,
            months: parse_field(fields[4], MONTH)?,
            days_of_week,
            dom_restricted: is_restricted(fields[3]),
            dow_restricted: is_restricted(fields[5]),
        })
    }

    /// The normalized expression text
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether `at` (to the second) matches every field
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        let t = at.naive_utc();
        self.months.contains(t.month())
            && self.day_matches(t.date())
            && self.hours.contains(t.hour())
            && self.minutes.contains(t.minute())
            && self.seconds.contains(t.second())
    }

    /// Next matching instant strictly after `after`.
    ///
    /// `None` when nothing matches within the search horizon, e.g. `0 0 0 30 2 *`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.naive_utc().with_nanosecond(0)? + Duration::seconds(1);
        let horizon = start.year() + SEARCH_YEARS;
        let mut t = start;

        loop {
            if t.year() > horizon {
                return None;
            }

            if !self.months.contains(t.month()) {
                t = first_of_next_month(t.date())?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t = t.date().and_hms_opt(t.hour(), t.minute(), 0)? + Duration::minutes(1);
                continue;
            }
            if !self.seconds.contains(t.second()) {
                t += Duration::seconds(1);
                continue;
            }

            return Some(DateTime::from_naive_utc_and_offset(t, Utc));
        }
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

impl FromStr for CronSchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

fn is_restricted(field: &str) -> bool {
    !field.split(',').any(|part| {
        let (range, step) = part.split_once('/').unwrap_or((part, "1"));
        matches!(range, "*" | "?") && step == "1"
    })
}

fn parse_field(field: &str, spec: FieldSpec) -> Result<Bits, ScheduleError> {
    let mut bits = 0u64;
    for part in field.split(',') {
        bits |= parse_part(part, field, spec)?;
    }
    Ok(Bits(bits))
}

/// One comma-separated element: `*`, `?`, `v`, `a-b`, each optionally `/step`
fn parse_part(part: &str, field: &str, spec: FieldSpec) -> Result<u64, ScheduleError> {
    let invalid = |reason: String| ScheduleError::InvalidField {
        field: spec.name,
        value: field.to_string(),
        reason,
    };

    let (range, step) = match part.split_once('/') {
        Some((range, step)) => {
            let step: u32 = step
                .parse()
                .map_err(|_| invalid(format!("step {:?} is not a number", step)))?;
            if step == 0 {
                return Err(invalid("step must be at least 1".to_string()));
            }
            (range, Some(step))
        }
        None => (part, None),
    };

    let (start, end) = if range == "*" || range == "?" {
        if range == "?" && !matches!(spec.name, "day-of-month" | "day-of-week") {
            return Err(invalid("`?` is only allowed in day fields".to_string()));
        }
        (spec.min, spec.max)
    } else if let Some((low, high)) = range.split_once('-') {
        (parse_value(low, spec, &invalid)?, parse_value(high, spec, &invalid)?)
    } else {
        let value = parse_value(range, spec, &invalid)?;
        // `a/n` runs from a to the end of the field
        match step {
            Some(_) => (value, spec.max),
            None => (value, value),
        }
    };

    if start > end {
        return Err(invalid(format!("range {}-{} is backwards", start, end)));
    }

    let step = step.unwrap_or(1);
    let mut bits = 0u64;
    let mut value = start;
    while value <= end {
        bits |= 1 << value;
        value = match value.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(bits)
}

fn parse_value(
    raw: &str,
    spec: FieldSpec,
    invalid: &impl Fn(String) -> ScheduleError,
) -> Result<u32, ScheduleError> {
    if raw.is_empty() {
        return Err(invalid("empty value".to_string()));
    }

    let value = match raw.parse::<u32>() {
        Ok(value) => value,
        Err(_) => spec
            .names
            .iter()
            .position(|name| name.eq_ignore_ascii_case(raw))
            .map(|i| i as u32 + spec.names_start)
            .ok_or_else(|| invalid(format!("{:?} is not a valid value", raw)))?,
    };

    if value < spec.min || value > spec.max {
        return Err(invalid(format!(
            "{} is out of range {}-{}",
            value, spec.min, spec.max
        )));
    }
    Ok(value)
}
