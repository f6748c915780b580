//! Lightweight cron expression parser.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Fields: *, */N, N, A-B, comma lists of those.
//! Example: "0 9 * * *" = every day at 9:00 local time.
//!
//! Local time is a fixed UTC offset supplied by the caller.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc};

use taskmaster_core::{Result, TaskmasterError};

/// Days searched ahead before giving up (covers Feb 29 expressions).
const SEARCH_DAYS: i64 = 366 * 4 + 1;

/// Fixed offset for "local time", from minutes east of UTC.
pub fn utc_offset(minutes: i32) -> Result<FixedOffset> {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| TaskmasterError::Config(format!("Invalid UTC offset: {minutes} minutes")))
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(TaskmasterError::Scheduler(format!(
                "Invalid cron expression: '{expression}' (need 5 fields: MIN HOUR DOM MON DOW)"
            )));
        }
        let field = |idx: usize, min: u32, max: u32| {
            parse_field(parts[idx], min, max).ok_or_else(|| {
                TaskmasterError::Scheduler(format!(
                    "Invalid cron field '{}' in '{expression}'",
                    parts[idx]
                ))
            })
        };

        let mut days_of_week = field(4, 0, 7)?;
        // 7 is an alias for Sunday.
        for d in days_of_week.iter_mut() {
            if *d == 7 {
                *d = 0;
            }
        }
        days_of_week.sort_unstable();
        days_of_week.dedup();

        Ok(Self {
            expression: expression.to_string(),
            minutes: field(0, 0, 59)?,
            hours: field(1, 0, 23)?,
            days_of_month: field(2, 1, 31)?,
            months: field(3, 1, 12)?,
            days_of_week,
            dom_restricted: parts[2] != "*",
            dow_restricted: parts[4] != "*",
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Standard cron rule: when both day fields are restricted, either may match.
    fn matches_day(&self, date: NaiveDate) -> bool {
        if !self.months.contains(&date.month()) {
            return false;
        }
        let dom = self.days_of_month.contains(&date.day());
        let dow = self
            .days_of_week
            .contains(&date.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// First slot strictly after `after`, evaluated in local time `offset`.
    pub fn next_after(&self, after: DateTime<Utc>, offset: FixedOffset) -> Option<DateTime<Utc>> {
        let local_after = after.with_timezone(&offset);
        let start_day = local_after.date_naive();

        for day_offset in 0..SEARCH_DAYS {
            let date = start_day + Duration::days(day_offset);
            if !self.matches_day(date) {
                continue;
            }
            for &hour in &self.hours {
                for &minute in &self.minutes {
                    let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
                        continue;
                    };
                    let Some(candidate) = offset.from_local_datetime(&naive).single() else {
                        continue;
                    };
                    let candidate = candidate.with_timezone(&Utc);
                    if candidate > after {
                        return Some(candidate);
                    }
                }
            }
        }

        None
    }
}

/// Parse a cron field into a sorted list of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    let mut values = Vec::new();
    for part in field.split(',') {
        values.extend(parse_part(part.trim(), min, max)?);
    }
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    values.dedup();
    Some(values)
}

fn parse_part(part: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => {
            let n: usize = step.parse().ok()?;
            if n == 0 {
                return None;
            }
            (range, n)
        }
        None => (part, 1),
    };

    let (lo, hi) = if range == "*" {
        (min, max)
    } else if let Some((a, b)) = range.split_once('-') {
        (a.parse().ok()?, b.parse().ok()?)
    } else {
        let n: u32 = range.parse().ok()?;
        // "N/S" means N through max, every S
        if step > 1 { (n, max) } else { (n, n) }
    };

    if lo < min || hi > max || lo > hi {
        return None;
    }
    Some((lo..=hi).step_by(step).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_every_hour() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 30, 0).unwrap();
        let next = CronSchedule::parse("0 * * * *").unwrap().next_after(after, utc()).unwrap();
        assert_eq!(next.hour(), 11);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_daily_slot_rolls_to_tomorrow() {
        let schedule = CronSchedule::parse("0 9 * * *").unwrap();
        let before = Utc.with_ymd_and_hms(2026, 2, 22, 7, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(before, utc()),
            Some(Utc.with_ymd_and_hms(2026, 2, 22, 9, 0, 0).unwrap())
        );
        // Exactly on the slot: next is tomorrow's.
        let at = Utc.with_ymd_and_hms(2026, 2, 22, 9, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(at, utc()),
            Some(Utc.with_ymd_and_hms(2026, 2, 23, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_local_offset() {
        // 09:00 at UTC+7 is 02:00 UTC.
        let offset = FixedOffset::east_opt(7 * 3600).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 0, 0, 0).unwrap();
        let next = CronSchedule::parse("0 9 * * *").unwrap().next_after(after, offset).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 22, 2, 0, 0).unwrap());
    }

    #[test]
    fn test_every_15_minutes() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 2, 0).unwrap();
        let next = CronSchedule::parse("*/15 * * * *").unwrap().next_after(after, utc()).unwrap();
        assert_eq!(next.minute(), 15);
    }

    #[test]
    fn test_weekday_range() {
        // 2026-02-21 is a Saturday.
        let after = Utc.with_ymd_and_hms(2026, 2, 21, 12, 0, 0).unwrap();
        let next = CronSchedule::parse("30 8 * * 1-5").unwrap().next_after(after, utc()).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 23, 8, 30, 0).unwrap());
    }

    #[test]
    fn test_lists_and_sunday_alias() {
        let schedule = CronSchedule::parse("0,30 6 * * 7").unwrap();
        // 2026-02-22 is a Sunday.
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 6, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(after, utc()),
            Some(Utc.with_ymd_and_hms(2026, 2, 22, 6, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_invalid_expression() {
        assert!(CronSchedule::parse("bad").is_err());
        assert!(CronSchedule::parse("61 * * * *").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("0 9 * 13 *").is_err());
    }

    #[test]
    fn test_utc_offset_bounds() {
        assert_eq!(utc_offset(-300).unwrap().local_minus_utc(), -5 * 3600);
        assert!(utc_offset(24 * 60).is_err());
    }

    #[test]
    fn test_impossible_date_never_fires() {
        let schedule = CronSchedule::parse("0 0 31 2 *").unwrap();
        assert!(schedule.next_after(Utc::now(), utc()).is_none());
    }
}
