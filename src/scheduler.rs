//! Cron-style scheduler
//!
//! Parses five-field cron expressions (`minute hour day-of-month month
//! day-of-week`) and runs a job at every matching minute in local time.
//! Each job is awaited before the next tick is computed, so runs never overlap.

use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::{DrytimeError, Result};

/// Set of allowed values for one cron field, as a bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet {
    bits: u64,
    /// Whether the field was `*` (matters for the day-of-month/day-of-week rule)
    wildcard: bool,
}

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        value < 64 && self.bits & (1u64 << value) != 0
    }

    fn parse(field: &str, min: u32, max: u32, name: &str) -> Result<Self> {
        let err = |detail: &str| {
            DrytimeError::Config(format!("invalid cron {} field '{}': {}", name, field, detail))
        };
        let mut bits = 0u64;
        for part in field.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step.parse().map_err(|_| err("bad step"))?;
                    if step == 0 {
                        return Err(err("step must be positive"));
                    }
                    (range, step)
                }
                None => (part, 1),
            };
            let (lo, hi) = if range == "*" {
                (min, max)
            } else if let Some((a, b)) = range.split_once('-') {
                let a: u32 = a.parse().map_err(|_| err("bad range start"))?;
                let b: u32 = b.parse().map_err(|_| err("bad range end"))?;
                (a, b)
            } else {
                let v: u32 = range.parse().map_err(|_| err("bad value"))?;
                // `5/15` means from 5 to the end of the field
                if part.contains('/') {
                    (v, max)
                } else {
                    (v, v)
                }
            };
            if lo < min || hi > max || lo > hi {
                return Err(err(&format!("values must be within {}-{}", min, max)));
            }
            for v in (lo..=hi).step_by(step as usize) {
                bits |= 1u64 << v;
            }
        }
        Ok(Self {
            bits,
            wildcard: field == "*",
        })
    }
}

/// A parsed five-field cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
}

impl FromStr for CronSchedule {
    type Err = DrytimeError;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(DrytimeError::Config(format!(
                "cron expression '{}' must have 5 fields, found {}",
                s,
                fields.len()
            )));
        }
        let mut days_of_week = FieldSet::parse(fields[4], 0, 7, "day-of-week")?;
        // 7 is an alias for Sunday
        if days_of_week.contains(7) {
            days_of_week.bits = (days_of_week.bits & !(1 << 7)) | 1;
        }
        Ok(Self {
            expression: fields.join(" "),
            minutes: FieldSet::parse(fields[0], 0, 59, "minute")?,
            hours: FieldSet::parse(fields[1], 0, 23, "hour")?,
            days_of_month: FieldSet::parse(fields[2], 1, 31, "day-of-month")?,
            months: FieldSet::parse(fields[3], 1, 12, "month")?,
            days_of_week,
        })
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl CronSchedule {
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());
        // standard cron: when both day fields are restricted, either may match
        match (self.days_of_month.wildcard, self.days_of_week.wildcard) {
            (false, false) => dom || dow,
            _ => dom && dow,
        }
    }

    /// First matching minute strictly after `after`.
    ///
    /// Returns `None` if nothing matches within about five years (e.g. `0 0 31 2 *`).
    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut t = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let limit = after + Duration::days(366 * 5);

        while t <= limit {
            if !self.months.contains(t.month()) {
                let (year, month) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
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
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }
        None
    }
}

/// Runs a job on a cron schedule in local time
#[derive(Debug, Clone)]
pub struct Scheduler {
    schedule: CronSchedule,
}

impl Scheduler {
    pub fn new(schedule: CronSchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    /// Loop forever: sleep until the next tick, run `job`, repeat.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the schedule never fires.
    pub async fn run<F, Fut>(&self, mut job: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        info!(cron = %self.schedule, "Scheduler started");
        loop {
            let now = Local::now();
            let mut cursor = now.naive_local();
            // skip wall times that do not exist locally (DST gaps)
            let next = loop {
                let naive = self.schedule.next_after(cursor).ok_or_else(|| {
                    DrytimeError::Config(format!("cron '{}' never fires", self.schedule))
                })?;
                match Local.from_local_datetime(&naive).earliest() {
                    Some(next) => break next,
                    None => cursor = naive,
                }
            };

            let wait = (next - now).to_std().unwrap_or_default();
            info!(next_run = %next, wait_secs = wait.as_secs(), "Next scheduled run");
            tokio::time::sleep(wait).await;

            let started = Local::now();
            job().await;
            let elapsed = Local::now() - started;
            if elapsed > Duration::minutes(1) {
                warn!(
                    elapsed_secs = elapsed.num_seconds(),
                    "Scheduled job ran past its tick"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn test_daily_midnight() {
        let cron: CronSchedule = "0 0 * * *".parse().unwrap();
        assert_eq!(cron.next_after(at(2024, 5, 1, 13, 7)), Some(at(2024, 5, 2, 0, 0)));
        // strictly after
        assert_eq!(cron.next_after(at(2024, 5, 2, 0, 0)), Some(at(2024, 5, 3, 0, 0)));
        // year rollover
        assert_eq!(cron.next_after(at(2024, 12, 31, 23, 59)), Some(at(2025, 1, 1, 0, 0)));
    }

    #[test]
    fn test_steps_lists_and_ranges() {
        let cron: CronSchedule = "*/15 8-10 * * *".parse().unwrap();
        assert_eq!(cron.next_after(at(2024, 5, 1, 8, 1)), Some(at(2024, 5, 1, 8, 15)));
        assert_eq!(cron.next_after(at(2024, 5, 1, 10, 45)), Some(at(2024, 5, 2, 8, 0)));

        let cron: CronSchedule = "5,35 * * * *".parse().unwrap();
        assert_eq!(cron.next_after(at(2024, 5, 1, 8, 5)), Some(at(2024, 5, 1, 8, 35)));
    }

    #[test]
    fn test_day_of_week() {
        // 2024-05-01 is a Wednesday; next Monday is 05-06
        let cron: CronSchedule = "30 6 * * 1".parse().unwrap();
        assert_eq!(cron.next_after(at(2024, 5, 1, 0, 0)), Some(at(2024, 5, 6, 6, 30)));

        let sunday: CronSchedule = "0 0 * * 7".parse().unwrap();
        assert_eq!(sunday.next_after(at(2024, 5, 1, 0, 0)), Some(at(2024, 5, 5, 0, 0)));
    }

    #[test]
    fn test_restricted_day_fields_match_either() {
        // the 10th, or any Monday
        let cron: CronSchedule = "0 0 10 * 1".parse().unwrap();
        assert_eq!(cron.next_after(at(2024, 5, 1, 0, 0)), Some(at(2024, 5, 6, 0, 0)));
        assert_eq!(cron.next_after(at(2024, 5, 7, 0, 0)), Some(at(2024, 5, 10, 0, 0)));
    }

    #[test]
    fn test_impossible_date_never_fires() {
        let cron: CronSchedule = "0 0 31 2 *".parse().unwrap();
        assert_eq!(cron.next_after(at(2024, 1, 1, 0, 0)), None);
    }

    #[test]
    fn test_rejects_malformed_expressions() {
        for bad in ["", "* * * *", "60 * * * *", "* 24 * * *", "*/0 * * * *", "a * * * *", "5-1 * * * *"] {
            assert!(bad.parse::<CronSchedule>().is_err(), "{:?} should fail", bad);
        }
    }
}
