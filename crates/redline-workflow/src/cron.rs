//! Five-field cron expressions
//!
//! `minute hour day-of-month month day-of-week`, each field accepting `*`,
//! lists, ranges, steps and (for month and weekday) three-letter names. When
//! both day fields are restricted a time matches if either one does.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// How many years ahead `next_after` searches before giving up
const SEARCH_YEARS: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field(u64);

impl Field {
    fn contains(&self, value: u32) -> bool {
        self.0 & (1 << value) != 0
    }
}

/// A parsed cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    minutes: Field,
    hours: Field,
    days_of_month: Field,
    months: Field,
    days_of_week: Field,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpression {
    pub fn parse(expression: &str) -> Result<Self, String> {
        let source = expression.trim();
        let expanded = match source.to_ascii_lowercase().as_str() {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other if other.starts_with('@') => {
                return Err(format!("unknown cron macro '{}'", source));
            }
            _ => source,
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!(
                "cron expression '{}' must have 5 fields, found {}",
                source,
                fields.len()
            ));
        }

        let mut days_of_week = parse_field(fields[4], 0, 7, &WEEKDAY_NAMES, 0)
            .map_err(|e| format!("day-of-week: {}", e))?;
        // 7 is an alias for Sunday
        if days_of_week.contains(7) {
            days_of_week = Field((days_of_week.0 | 1) & !(1 << 7));
        }

        Ok(Self {
            source: source.to_string(),
            minutes: parse_field(fields[0], 0, 59, &[], 0).map_err(|e| format!("minute: {}", e))?,
            hours: parse_field(fields[1], 0, 23, &[], 0).map_err(|e| format!("hour: {}", e))?,
            days_of_month: parse_field(fields[2], 1, 31, &[], 0)
                .map_err(|e| format!("day-of-month: {}", e))?,
            months: parse_field(fields[3], 1, 12, &MONTH_NAMES, 1)
                .map_err(|e| format!("month: {}", e))?,
            days_of_week,
            dom_restricted: !fields[2].starts_with('*'),
            dow_restricted: !fields[4].starts_with('*'),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First matching minute strictly after `after`
    ///
    /// Returns `None` when nothing matches within the search horizon, as for
    /// `0 0 30 2 *`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after
            .naive_utc()
            .with_second(0)?
            .with_nanosecond(0)?
            + Duration::minutes(1);
        let horizon = after.year() + SEARCH_YEARS;
        let mut t = start;

        while t.year() <= horizon {
            if !self.months.contains(t.month()) {
                t = first_of_next_month(t.date())?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = (t.date() + Duration::days(1)).and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t.and_utc());
        }

        None
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

impl FromStr for CronExpression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
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

/// Parse one field into a bitmask of allowed values
///
/// `names[i]` stands for the value `i + name_base`.
fn parse_field(
    text: &str,
    min: u32,
    max: u32,
    names: &[&str],
    name_base: u32,
) -> Result<Field, String> {
    let value = |token: &str| -> Result<u32, String> {
        let lower = token.to_ascii_lowercase();
        if let Some(pos) = names.iter().position(|n| *n == lower) {
            return Ok(pos as u32 + name_base);
        }
        let parsed: u32 = token
            .parse()
            .map_err(|_| format!("'{}' is not a number", token))?;
        if parsed < min || parsed > max {
            return Err(format!("{} is outside {}-{}", parsed, min, max));
        }
        Ok(parsed)
    };

    let mut mask = 0u64;
    for part in text.split(',') {
        if part.is_empty() {
            return Err(format!("empty list element in '{}'", text));
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("'{}' is not a valid step", step))?;
                if step == 0 {
                    return Err("step must be at least 1".to_string());
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (value(a)?, value(b)?)
        } else {
            let start = value(range)?;
            // "5/15" means every 15 starting at 5
            (start, if step.is_some() { max } else { start })
        };

        if lo > hi {
            return Err(format!("range {}-{} is reversed", lo, hi));
        }

        let step = step.unwrap_or(1) as usize;
        for v in (lo..=hi).step_by(step) {
            mask |= 1 << v;
        }
    }

    Ok(Field(mask))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_steps_and_lists() {
        let cron = CronExpression::parse("*/15 * * * *").unwrap();
        assert_eq!(cron.next_after(at(2024, 3, 4, 10, 7)), Some(at(2024, 3, 4, 10, 15)));
        assert_eq!(cron.next_after(at(2024, 3, 4, 10, 45)), Some(at(2024, 3, 4, 11, 0)));

        let cron = CronExpression::parse("0 8,18 * * *").unwrap();
        assert_eq!(cron.next_after(at(2024, 3, 4, 9, 0)), Some(at(2024, 3, 4, 18, 0)));
        assert_eq!(cron.next_after(at(2024, 3, 4, 18, 0)), Some(at(2024, 3, 5, 8, 0)));
    }

    #[test]
    fn test_named_weekdays_and_ranges() {
        // 2024-03-09 is a Saturday
        let cron = CronExpression::parse("0 9 * * MON-FRI").unwrap();
        assert_eq!(cron.next_after(at(2024, 3, 9, 12, 0)), Some(at(2024, 3, 11, 9, 0)));

        let sunday = CronExpression::parse("30 6 * * 7").unwrap();
        assert_eq!(sunday.next_after(at(2024, 3, 9, 12, 0)), Some(at(2024, 3, 10, 6, 30)));
    }

    #[test]
    fn test_month_rollover() {
        let cron = CronExpression::parse("@monthly").unwrap();
        assert_eq!(cron.next_after(at(2024, 12, 15, 0, 0)), Some(at(2025, 1, 1, 0, 0)));

        let quarterly = CronExpression::parse("0 0 1 jan,apr,jul,oct *").unwrap();
        assert_eq!(quarterly.next_after(at(2024, 5, 2, 0, 0)), Some(at(2024, 7, 1, 0, 0)));
    }

    #[test]
    fn test_restricted_day_fields_are_ored() {
        // Day 13 or any Friday; 2024-03-08 is a Friday
        let cron = CronExpression::parse("0 0 13 * FRI").unwrap();
        assert_eq!(cron.next_after(at(2024, 3, 5, 0, 0)), Some(at(2024, 3, 8, 0, 0)));
        assert_eq!(cron.next_after(at(2024, 3, 8, 0, 0)), Some(at(2024, 3, 13, 0, 0)));
    }

    #[test]
    fn test_impossible_date_never_fires() {
        let cron = CronExpression::parse("0 0 30 2 *").unwrap();
        assert_eq!(cron.next_after(at(2024, 1, 1, 0, 0)), None);
    }

    #[test]
    fn test_invalid_expressions() {
        for bad in ["61 * * * *", "* * *", "*/0 * * * *", "5-1 * * * *", "* * * foo *", "@often", "1,,2 * * * *"] {
            assert!(CronExpression::parse(bad).is_err(), "{} should be rejected", bad);
        }
    }
}
