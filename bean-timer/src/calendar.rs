use std::collections::BTreeSet;

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, Offset, TimeZone,
    Timelike, Utc,
};
use chrono_tz::Tz;

use crate::{ScheduleExpression, TimerError, TimerResult};

/// Calendar years are never searched past this one
pub const MAX_YEAR: i32 = 2199;

/// How many years past the reference instant a search may look
pub const SEARCH_YEARS: i32 = 100;

const MONTH_NAMES: &[(&str, u32)] = &[
    ("JAN", 1),
    ("FEB", 2),
    ("MAR", 3),
    ("APR", 4),
    ("MAY", 5),
    ("JUN", 6),
    ("JUL", 7),
    ("AUG", 8),
    ("SEP", 9),
    ("OCT", 10),
    ("NOV", 11),
    ("DEC", 12),
];

const DAY_NAMES: &[(&str, u32)] = &[
    ("SUN", 0),
    ("MON", 1),
    ("TUE", 2),
    ("WED", 3),
    ("THU", 4),
    ("FRI", 5),
    ("SAT", 6),
];

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [(&'static str, u32)],
    allow_last: bool,
}

const SECOND: FieldSpec = FieldSpec { name: "second", min: 0, max: 59, names: &[], allow_last: false };
const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[], allow_last: false };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[], allow_last: false };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day_of_month", min: 1, max: 31, names: &[], allow_last: true };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12, names: MONTH_NAMES, allow_last: false };
const DAY_OF_WEEK: FieldSpec = FieldSpec { name: "day_of_week", min: 0, max: 7, names: DAY_NAMES, allow_last: false };
const YEAR: FieldSpec = FieldSpec { name: "year", min: 1970, max: MAX_YEAR as u32, names: &[], allow_last: false };

/// Values one field accepts
struct ParsedField {
    values: Vec<u32>,
    restricted: bool,
    last: bool,
}

fn parse_value(spec: &FieldSpec, token: &str) -> TimerResult<u32> {
    let token = token.trim();
    let value = match token.parse::<u32>() {
        Ok(value) => value,
        Err(_) => spec
            .names
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(token))
            .map(|(_, value)| *value)
            .ok_or_else(|| TimerError::schedule(spec.name, format!("unknown value '{}'", token)))?,
    };

    if value < spec.min || value > spec.max {
        return Err(TimerError::schedule(
            spec.name,
            format!("{} is outside {}-{}", value, spec.min, spec.max),
        ));
    }
    Ok(value)
}

fn parse_field(spec: &FieldSpec, text: &str) -> TimerResult<ParsedField> {
    let text = text.trim();
    if text.is_empty() {
        return Err(TimerError::schedule(spec.name, "empty field"));
    }

    let mut parsed = ParsedField {
        values: Vec::new(),
        restricted: !(text == "*" || text == "?"),
        last: false,
    };

    for part in text.split(',').map(str::trim) {
        if part.is_empty() {
            return Err(TimerError::schedule(spec.name, "empty list element"));
        }
        if spec.allow_last && (part.eq_ignore_ascii_case("L") || part.eq_ignore_ascii_case("Last")) {
            parsed.last = true;
            continue;
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: usize = step
                    .trim()
                    .parse()
                    .map_err(|_| TimerError::schedule(spec.name, format!("bad step '{}'", step)))?;
                if step == 0 {
                    return Err(TimerError::schedule(spec.name, "step must be positive"));
                }
                (range.trim(), Some(step))
            }
            None => (part, None),
        };

        let (low, high) = if range == "*" || range == "?" {
            (spec.min, spec.max)
        } else if let Some((low, high)) = range.split_once('-') {
            (parse_value(spec, low)?, parse_value(spec, high)?)
        } else {
            let value = parse_value(spec, range)?;
            (value, if step.is_some() { spec.max } else { value })
        };

        let step = step.unwrap_or(1);
        if low <= high {
            parsed.values.extend((low..=high).step_by(step));
        } else {
            // wrapping range such as FRI-MON
            parsed.values.extend((low..=spec.max).chain(spec.min..=high).step_by(step));
        }
    }

    Ok(parsed)
}

/// Bit set over a small field (seconds through days of week)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet {
    mask: u64,
    restricted: bool,
}

impl FieldSet {
    fn from_parsed(parsed: &ParsedField) -> Self {
        let mask = parsed.values.iter().fold(0u64, |mask, value| mask | (1u64 << value));
        Self {
            mask,
            restricted: parsed.restricted,
        }
    }

    fn contains(self, value: u32) -> bool {
        value < 64 && self.mask & (1u64 << value) != 0
    }

    /// First member in `from..=max`
    fn next_from(self, from: u32, max: u32) -> Option<u32> {
        (from..=max).find(|value| self.contains(*value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum YearSet {
    Any,
    Only(BTreeSet<i32>),
}

impl YearSet {
    fn contains(&self, year: i32) -> bool {
        match self {
            Self::Any => true,
            Self::Only(years) => years.contains(&year),
        }
    }

    fn next_from(&self, year: i32) -> Option<i32> {
        match self {
            Self::Any => Some(year),
            Self::Only(years) => years.range(year..).next().copied(),
        }
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

fn start_of_year(year: i32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(0, 0, 0)
}

fn start_of_next_day(t: NaiveDateTime) -> Option<NaiveDateTime> {
    t.date().succ_opt()?.and_hms_opt(0, 0, 0)
}

/// Compiled calendar schedule.
///
/// Day-of-month and day-of-week combine with OR when both are restricted,
/// otherwise with AND. All matching happens in the schedule's local wall
/// time; local instants skipped by a DST change are never produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarExpression {
    seconds: FieldSet,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    last_day_of_month: bool,
    months: FieldSet,
    days_of_week: FieldSet,
    years: YearSet,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    timezone: Tz,
}

impl CalendarExpression {
    pub fn parse(schedule: &ScheduleExpression) -> TimerResult<Self> {
        let day_of_month = parse_field(&DAY_OF_MONTH, &schedule.day_of_month)?;

        let mut days_of_week = FieldSet::from_parsed(&parse_field(&DAY_OF_WEEK, &schedule.day_of_week)?);
        if days_of_week.contains(7) {
            days_of_week.mask = (days_of_week.mask & !(1u64 << 7)) | 1;
        }

        let year = parse_field(&YEAR, &schedule.year)?;
        let years = if year.restricted {
            YearSet::Only(year.values.iter().map(|y| *y as i32).collect())
        } else {
            YearSet::Any
        };

        let timezone = match &schedule.timezone {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|e| TimerError::schedule("timezone", e.to_string()))?,
            None => Tz::UTC,
        };

        if let (Some(start), Some(end)) = (schedule.start, schedule.end) {
            if end < start {
                return Err(TimerError::schedule("end", "end is before start"));
            }
        }

        Ok(Self {
            seconds: FieldSet::from_parsed(&parse_field(&SECOND, &schedule.second)?),
            minutes: FieldSet::from_parsed(&parse_field(&MINUTE, &schedule.minute)?),
            hours: FieldSet::from_parsed(&parse_field(&HOUR, &schedule.hour)?),
            days_of_month: FieldSet::from_parsed(&day_of_month),
            last_day_of_month: day_of_month.last,
            months: FieldSet::from_parsed(&parse_field(&MONTH, &schedule.month)?),
            days_of_week,
            years,
            start: schedule.start,
            end: schedule.end,
            timezone,
        })
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day())
            || (self.last_day_of_month && date.day() == days_in_month(date.year(), date.month()));
        let dow = self.days_of_week.contains(date.weekday().num_days_from_sunday());

        let dom_restricted = self.days_of_month.restricted || self.last_day_of_month;
        if dom_restricted && self.days_of_week.restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// First local wall time strictly after `from` matching every field
    fn next_local(&self, from: NaiveDateTime, max_year: i32) -> Option<NaiveDateTime> {
        let mut t = from.with_nanosecond(0)? + Duration::seconds(1);

        loop {
            let year = t.year();
            if year > max_year {
                return None;
            }

            if !self.years.contains(year) {
                t = start_of_year(self.years.next_from(year + 1)?.min(max_year + 1))?;
                continue;
            }

            if !self.months.contains(t.month()) {
                t = match self.months.next_from(t.month() + 1, 12) {
                    Some(month) => NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?,
                    None => start_of_year(year + 1)?,
                };
                continue;
            }

            if !self.day_matches(t.date()) {
                t = start_of_next_day(t)?;
                continue;
            }

            if !self.hours.contains(t.hour()) {
                t = match self.hours.next_from(t.hour() + 1, 23) {
                    Some(hour) => t.date().and_hms_opt(hour, 0, 0)?,
                    None => start_of_next_day(t)?,
                };
                continue;
            }

            if !self.minutes.contains(t.minute()) {
                t = match self.minutes.next_from(t.minute() + 1, 59) {
                    Some(minute) => t.date().and_hms_opt(t.hour(), minute, 0)?,
                    None => t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1),
                };
                continue;
            }

            if !self.seconds.contains(t.second()) {
                t = match self.seconds.next_from(t.second() + 1, 59) {
                    Some(second) => t.with_second(second)?,
                    None => t.with_second(0)? + Duration::minutes(1),
                };
                continue;
            }

            return Some(t);
        }
    }

    /// First instant strictly after `after` that matches the schedule.
    ///
    /// A wall time repeated by a backward offset change matches both of its
    /// instants. `None` when nothing matches before the search window closes
    /// or the schedule's end has passed.
    pub fn next_run_date(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let from = match self.start {
            Some(start) if start > after => start - Duration::nanoseconds(1),
            _ => after,
        };

        let local = from.with_timezone(&self.timezone).naive_local();
        let max_year = (local.year() + SEARCH_YEARS).min(MAX_YEAR);

        let ahead = self.next_instant(local, from, max_year);
        let repeated = self.next_in_repeated_hour(local, from, max_year);
        let next = match (ahead, repeated) {
            (Some(a), Some(b)) => a.min(b),
            (a, b) => a.or(b)?,
        };

        if matches!(self.end, Some(end) if next > end) {
            return None;
        }
        Some(next)
    }

    /// First match after the wall time `local` whose instant is after `from`
    fn next_instant(&self, mut local: NaiveDateTime, from: DateTime<Utc>, max_year: i32) -> Option<DateTime<Utc>> {
        loop {
            let candidate = self.next_local(local, max_year)?;
            let instant = match self.timezone.from_local_datetime(&candidate) {
                LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
                LocalResult::Ambiguous(earlier, later) => {
                    let earlier = earlier.with_timezone(&Utc);
                    Some(if earlier > from { earlier } else { later.with_timezone(&Utc) })
                }
                LocalResult::None => None,
            };

            match instant {
                Some(next) if next > from => return Some(next),
                _ => local = candidate,
            }
        }
    }

    /// When `from` falls in the first pass of a repeated hour, the second pass
    /// replays wall times at or before `local` that still lie ahead of `from`
    fn next_in_repeated_hour(&self, local: NaiveDateTime, from: DateTime<Utc>, max_year: i32) -> Option<DateTime<Utc>> {
        let LocalResult::Ambiguous(earlier, later) = self.timezone.from_local_datetime(&local) else {
            return None;
        };
        if earlier.with_timezone(&Utc) != from {
            return None;
        }

        let later_offset = Duration::seconds(i64::from(later.offset().fix().local_minus_utc()));
        let mut cursor = from.naive_utc() + later_offset;
        loop {
            let candidate = self.next_local(cursor, max_year)?;
            if candidate > local {
                return None;
            }
            if let LocalResult::Ambiguous(_, second) = self.timezone.from_local_datetime(&candidate) {
                return Some(second.with_timezone(&Utc));
            }
            cursor = candidate;
        }
    }
}
