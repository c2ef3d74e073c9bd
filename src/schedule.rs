//! A Schedule is the parsed, timezone-aware form of a schedule spec and
//! computes the next instant at which every field matches.

use jiff::{
    civil::Date,
    tz::TimeZone,
    RoundMode, Timestamp, TimestampRound, ToSpan as _, Unit, Zoned,
};
use serde::Deserialize;

use crate::{
    error::{Error, Result},
    field,
};

/// Maximum years ahead to search when the year field is unrestricted.
const MAX_YEARS_AHEAD: i16 = 10;

/// Largest year accepted in a concrete year set.
const MAX_YEAR: i64 = 9999;

/// Termination guard for the wrap-around walk. Each restart advances the
/// candidate, and a few restarts per calendar day of the horizon covers
/// the worst case.
const MAX_RESTARTS: usize = 4 * 366 * (MAX_YEARS_AHEAD as usize + 1);

/// Textual description of one schedule, with one named spec per time
/// field. Month, day, hour and minute are required; second defaults to
/// `0`, weekday and year default to `*`, and location defaults to the
/// system timezone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleSpec {
    #[serde(default)]
    pub second: String,
    #[serde(default)]
    pub minute: String,
    #[serde(default)]
    pub hour: String,
    #[serde(default)]
    pub day: String,
    #[serde(default)]
    pub weekday: String,
    #[serde(default)]
    pub month: String,
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub location: String,
}

/// Numeric representation of a parsed [`ScheduleSpec`]. Immutable after
/// construction; all sets are non-empty, sorted and deduplicated, except
/// `year`, where the empty set means "any year".
#[derive(Debug, Clone)]
pub struct Schedule {
    second: Vec<i8>,
    minute: Vec<i8>,
    hour: Vec<i8>,
    day: Vec<i8>,
    weekday: Vec<i8>,
    month: Vec<i8>,
    year: Vec<i16>,
    tz: TimeZone,
}

impl Schedule {
    /// Parse a [`ScheduleSpec`] into a [`Schedule`].
    ///
    /// ```rust
    /// # use belfry::{Schedule, ScheduleSpec};
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let schedule = Schedule::new(&ScheduleSpec {
    ///     minute: "*/15".into(),
    ///     hour: "9-17".into(),
    ///     day: "*".into(),
    ///     month: "*".into(),
    ///     location: "UTC".into(),
    ///     ..Default::default()
    /// })?;
    /// let next = schedule.next(&jiff::Zoned::now())?;
    /// assert_eq!(next.minute() % 15, 0);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(spec: &ScheduleSpec) -> Result<Self> {
        let year = field::parse_years(defaulted(&spec.year, "*"))?;
        if let Some(&bad) = year.iter().find(|&&y| !(0..=MAX_YEAR).contains(&y)) {
            return Err(Error::AboveMaximum {
                value: bad,
                max: MAX_YEAR,
            });
        }
        let month = required(&spec.month, "month", 1, 12)?;
        let weekday = field::parse_field(defaulted(&spec.weekday, "*"), 0, 6)?;
        let day = required(&spec.day, "day", 1, 31)?;
        let hour = required(&spec.hour, "hour", 0, 23)?;
        let minute = required(&spec.minute, "minute", 0, 59)?;
        let second = field::parse_field(defaulted(&spec.second, "0"), 0, 59)?;
        let tz = match spec.location.trim() {
            "" | "Local" => TimeZone::system(),
            name => TimeZone::get(name).map_err(|_| Error::UnknownTimeZone(name.to_string()))?,
        };
        Ok(Self {
            second: narrowed(second),
            minute: narrowed(minute),
            hour: narrowed(hour),
            day: narrowed(day),
            weekday: narrowed(weekday),
            month: narrowed(month),
            year: year.into_iter().map(|y| y as i16).collect(),
            tz,
        })
    }

    /// The least instant `t >= after` at which every field of `t`, read in
    /// this schedule's timezone, is a member of the corresponding set.
    ///
    /// The walk goes coarse to fine (year, month, day, weekday, hour,
    /// minute, second). Matching a field leaves the candidate unchanged;
    /// a strictly greater member resets every finer field to its minimum;
    /// an exhausted set bumps the next coarser field and restarts the
    /// walk from the top, since an inner advance can invalidate an outer
    /// constraint.
    pub fn next(&self, after: &Zoned) -> Result<Zoned> {
        let rounded: Timestamp = after.timestamp().round(
            TimestampRound::new()
                .smallest(Unit::Second)
                .mode(RoundMode::Ceil),
        )?;
        let mut t = rounded.to_zoned(self.tz.clone());
        let years: Vec<i16> = if self.year.is_empty() {
            (t.year()..=t.year().saturating_add(MAX_YEARS_AHEAD)).collect()
        } else {
            self.year.clone()
        };
        for _ in 0..MAX_RESTARTS {
            match smallest_at_least(&years, t.year()) {
                None => return Err(Error::NoFutureFiring),
                Some(y) if y > t.year() => {
                    t = self.at_midnight(Date::new(y, 1, 1)?)?;
                    continue;
                }
                Some(_) => {}
            }
            match smallest_at_least(&self.month, t.month()) {
                None => {
                    t = self.at_midnight(Date::new(t.year() + 1, 1, 1)?)?;
                    continue;
                }
                Some(m) if m > t.month() => {
                    t = self.at_midnight(Date::new(t.year(), m, 1)?)?;
                }
                Some(_) => {}
            }
            match smallest_at_least(&self.day, t.day()) {
                None => {
                    t = self.start_of_next_month(&t)?;
                    continue;
                }
                Some(d) if d > t.day() => match Date::new(t.year(), t.month(), d) {
                    Ok(date) => t = self.at_midnight(date)?,
                    // Day doesn't exist in this month, e.g. 31 April.
                    Err(_) => {
                        t = self.start_of_next_month(&t)?;
                        continue;
                    }
                },
                Some(_) => {}
            }
            if !self
                .weekday
                .contains(&t.weekday().to_sunday_zero_offset())
            {
                t = self.at_midnight(t.date().tomorrow()?)?;
                continue;
            }
            match smallest_at_least(&self.hour, t.hour()) {
                None => {
                    t = self.at_midnight(t.date().tomorrow()?)?;
                    continue;
                }
                Some(h) if h > t.hour() => {
                    t = self.at_time(t.date(), h, 0, 0)?;
                }
                Some(_) => {}
            }
            match smallest_at_least(&self.minute, t.minute()) {
                None => {
                    t = self.start_of_next_hour(&t)?;
                    continue;
                }
                Some(m) if m > t.minute() => {
                    t = self.at_time(t.date(), t.hour(), m, 0)?;
                }
                Some(_) => {}
            }
            match smallest_at_least(&self.second, t.second()) {
                None => {
                    t = self.start_of_next_minute(&t)?;
                    continue;
                }
                Some(s) if s > t.second() => {
                    t = self.at_time(t.date(), t.hour(), t.minute(), s)?;
                }
                Some(_) => {}
            }
            return Ok(t);
        }
        Err(Error::NoFutureFiring)
    }

    fn at_midnight(&self, date: Date) -> Result<Zoned> {
        self.at_time(date, 0, 0, 0)
    }

    /// Resolve a civil time in this schedule's zone. Times inside a
    /// spring-forward gap land after the gap; times repeated by a
    /// fall-back resolve to the earlier of the two instants.
    fn at_time(&self, date: Date, hour: i8, minute: i8, second: i8) -> Result<Zoned> {
        Ok(date.at(hour, minute, second, 0).to_zoned(self.tz.clone())?)
    }

    fn start_of_next_month(&self, t: &Zoned) -> Result<Zoned> {
        self.at_midnight(t.date().first_of_month().checked_add(1.month())?)
    }

    fn start_of_next_hour(&self, t: &Zoned) -> Result<Zoned> {
        if t.hour() == 23 {
            self.at_midnight(t.date().tomorrow()?)
        } else {
            self.at_time(t.date(), t.hour() + 1, 0, 0)
        }
    }

    fn start_of_next_minute(&self, t: &Zoned) -> Result<Zoned> {
        if t.minute() == 59 {
            self.start_of_next_hour(t)
        } else {
            self.at_time(t.date(), t.hour(), t.minute() + 1, 0)
        }
    }
}

/// First member of the sorted set that is `>= floor`.
fn smallest_at_least<T: PartialOrd + Copy>(set: &[T], floor: T) -> Option<T> {
    set.iter().copied().find(|&v| v >= floor)
}

fn defaulted<'a>(spec: &'a str, fallback: &'a str) -> &'a str {
    if spec.trim().is_empty() {
        fallback
    } else {
        spec
    }
}

fn required(spec: &str, name: &'static str, min: i64, max: i64) -> Result<Vec<i64>> {
    if spec.trim().is_empty() {
        return Err(Error::MissingField(name));
    }
    field::parse_field(spec, min, max)
}

fn narrowed(values: Vec<i64>) -> Vec<i8> {
    values.into_iter().map(|v| v as i8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::civil;
    use pretty_assertions::assert_eq;

    fn utc_spec() -> ScheduleSpec {
        ScheduleSpec {
            minute: "*".into(),
            hour: "*".into(),
            day: "*".into(),
            month: "*".into(),
            location: "UTC".into(),
            ..Default::default()
        }
    }

    #[test]
    fn weekday_constraint_skips_to_monday() -> Result<()> {
        let schedule = Schedule::new(&ScheduleSpec {
            weekday: "1,2".into(),
            second: "0".into(),
            year: "*".into(),
            ..utc_spec()
        })?;
        // 2020-03-01 is a Sunday.
        let after = civil::date(2020, 3, 1).at(0, 0, 0, 0).intz("UTC")?;
        let next = schedule.next(&after)?;
        assert_eq!(next, civil::date(2020, 3, 2).at(0, 0, 0, 0).intz("UTC")?);
        Ok(())
    }

    #[test]
    fn leap_day_waits_for_a_leap_year() -> Result<()> {
        let schedule = Schedule::new(&ScheduleSpec {
            year: "2021-2022,2028".into(),
            month: "2".into(),
            day: "29".into(),
            hour: "0".into(),
            minute: "0".into(),
            second: "0".into(),
            location: "UTC".into(),
            ..Default::default()
        })?;
        let after = civil::date(2020, 1, 1).at(0, 0, 0, 0).intz("UTC")?;
        // 2021 and 2022 have no February 29th.
        let next = schedule.next(&after)?;
        assert_eq!(next, civil::date(2028, 2, 29).at(0, 0, 0, 0).intz("UTC")?);
        Ok(())
    }

    #[test]
    fn missing_day_rolls_over_to_the_next_month_with_it() -> Result<()> {
        let schedule = Schedule::new(&ScheduleSpec {
            day: "31".into(),
            hour: "12".into(),
            minute: "0".into(),
            ..utc_spec()
        })?;
        let after = civil::date(2024, 2, 1).at(0, 0, 0, 0).intz("UTC")?;
        let next = schedule.next(&after)?;
        assert_eq!(next, civil::date(2024, 3, 31).at(12, 0, 0, 0).intz("UTC")?);
        Ok(())
    }

    #[test]
    fn exhausted_year_set_reports_no_future_firing() -> Result<()> {
        let schedule = Schedule::new(&ScheduleSpec {
            year: "2000".into(),
            month: "1".into(),
            day: "1".into(),
            hour: "0".into(),
            minute: "0".into(),
            second: "0".into(),
            location: "UTC".into(),
            ..Default::default()
        })?;
        let after = civil::date(2001, 1, 1).at(0, 0, 0, 0).intz("UTC")?;
        assert!(matches!(schedule.next(&after), Err(Error::NoFutureFiring)));
        Ok(())
    }

    #[test]
    fn matching_instant_is_returned_unchanged() -> Result<()> {
        let schedule = Schedule::new(&ScheduleSpec {
            second: "0,30".into(),
            ..utc_spec()
        })?;
        let after = civil::date(2024, 6, 1).at(9, 15, 30, 0).intz("UTC")?;
        assert_eq!(schedule.next(&after)?, after);
        Ok(())
    }

    #[test]
    fn subsecond_reference_rounds_up_to_the_next_second() -> Result<()> {
        let schedule = Schedule::new(&utc_spec())?;
        let after = civil::date(2024, 6, 1).at(9, 15, 30, 500_000_000).intz("UTC")?;
        // Second defaults to {0}: the half-spent :30 cannot match again.
        assert_eq!(
            schedule.next(&after)?,
            civil::date(2024, 6, 1).at(9, 16, 0, 0).intz("UTC")?
        );
        Ok(())
    }

    #[test]
    fn spring_forward_gap_is_skipped_ahead() -> Result<()> {
        // US DST starts 2021-03-14; 02:30 does not exist in New York.
        let schedule = Schedule::new(&ScheduleSpec {
            hour: "2".into(),
            minute: "30".into(),
            day: "14".into(),
            month: "3".into(),
            location: "America/New_York".into(),
            ..Default::default()
        })?;
        let after = civil::date(2021, 3, 14).at(0, 0, 0, 0).intz("America/New_York")?;
        let next = schedule.next(&after)?;
        assert_eq!(
            next,
            civil::date(2021, 3, 14)
                .at(3, 30, 0, 0)
                .intz("America/New_York")?
        );
        Ok(())
    }

    #[test]
    fn fall_back_repeat_fires_at_the_earlier_instant() -> Result<()> {
        // US DST ends 2021-11-07; 01:30 happens twice in New York.
        let schedule = Schedule::new(&ScheduleSpec {
            hour: "1".into(),
            minute: "30".into(),
            day: "7".into(),
            month: "11".into(),
            location: "America/New_York".into(),
            ..Default::default()
        })?;
        let after = civil::date(2021, 11, 7).at(0, 0, 0, 0).intz("America/New_York")?;
        let next = schedule.next(&after)?;
        // The earlier occurrence is still on daylight time (UTC-4).
        assert_eq!(next.offset().seconds(), -4 * 60 * 60);
        assert_eq!(next.hour(), 1);
        assert_eq!(next.minute(), 30);
        Ok(())
    }

    #[test]
    fn month_day_hour_and_minute_are_required() {
        for missing in ["month", "day", "hour", "minute"] {
            let mut spec = utc_spec();
            match missing {
                "month" => spec.month.clear(),
                "day" => spec.day.clear(),
                "hour" => spec.hour.clear(),
                _ => spec.minute.clear(),
            }
            assert!(
                matches!(Schedule::new(&spec), Err(Error::MissingField(name)) if name == missing)
            );
        }
    }

    #[test]
    fn unknown_location_is_rejected() {
        let spec = ScheduleSpec {
            location: "Mars/Olympus_Mons".into(),
            ..utc_spec()
        };
        assert!(matches!(
            Schedule::new(&spec),
            Err(Error::UnknownTimeZone(_))
        ));
    }

    #[test]
    fn any_year_search_is_bounded_by_the_horizon() -> Result<()> {
        // February 30th never exists; the walk must give up, not spin.
        let schedule = Schedule::new(&ScheduleSpec {
            day: "30".into(),
            month: "2".into(),
            hour: "0".into(),
            minute: "0".into(),
            location: "UTC".into(),
            ..Default::default()
        })?;
        let after = civil::date(2024, 1, 1).at(0, 0, 0, 0).intz("UTC")?;
        assert!(matches!(schedule.next(&after), Err(Error::NoFutureFiring)));
        Ok(())
    }
}
