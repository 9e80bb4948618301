use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{TimerError, TimerResult};

/// Calendar schedule as declared by a bean: one text field per calendar unit
/// plus optional bounds and time zone.
///
/// Fields are only validated when the schedule is compiled into a
/// [`CalendarExpression`](crate::CalendarExpression).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleExpression {
    pub second: String,
    pub minute: String,
    pub hour: String,
    pub day_of_month: String,
    pub month: String,
    pub day_of_week: String,
    pub year: String,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// IANA zone name, UTC when absent
    #[serde(default)]
    pub timezone: Option<String>,
}

impl Default for ScheduleExpression {
    /// Midnight every day
    fn default() -> Self {
        Self {
            second: "0".into(),
            minute: "0".into(),
            hour: "0".into(),
            day_of_month: "*".into(),
            month: "*".into(),
            day_of_week: "*".into(),
            year: "*".into(),
            start: None,
            end: None,
            timezone: None,
        }
    }
}

impl ScheduleExpression {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `second minute hour day-of-month month day-of-week [year]`
    pub fn parse(expr: &str) -> TimerResult<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 6 && fields.len() != 7 {
            return Err(TimerError::schedule(
                "expression",
                format!("expected 6 or 7 fields, found {}", fields.len()),
            ));
        }

        Ok(Self {
            second: fields[0].to_string(),
            minute: fields[1].to_string(),
            hour: fields[2].to_string(),
            day_of_month: fields[3].to_string(),
            month: fields[4].to_string(),
            day_of_week: fields[5].to_string(),
            year: fields.get(6).unwrap_or(&"*").to_string(),
            ..Self::default()
        })
    }

    pub fn second(mut self, second: impl Into<String>) -> Self {
        self.second = second.into();
        self
    }

    pub fn minute(mut self, minute: impl Into<String>) -> Self {
        self.minute = minute.into();
        self
    }

    pub fn hour(mut self, hour: impl Into<String>) -> Self {
        self.hour = hour.into();
        self
    }

    pub fn day_of_month(mut self, day_of_month: impl Into<String>) -> Self {
        self.day_of_month = day_of_month.into();
        self
    }

    pub fn month(mut self, month: impl Into<String>) -> Self {
        self.month = month.into();
        self
    }

    pub fn day_of_week(mut self, day_of_week: impl Into<String>) -> Self {
        self.day_of_week = day_of_week.into();
        self
    }

    pub fn year(mut self, year: impl Into<String>) -> Self {
        self.year = year.into();
        self
    }

    /// No expiration before this instant
    pub fn start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    /// No expiration after this instant
    pub fn end(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    pub fn timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// The seven calendar fields in parse order
    pub fn to_cron(&self) -> String {
        format!(
            "{} {} {} {} {} {} {}",
            self.second,
            self.minute,
            self.hour,
            self.day_of_month,
            self.month,
            self.day_of_week,
            self.year
        )
    }
}

impl fmt::Display for ScheduleExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_cron())?;
        if let Some(tz) = &self.timezone {
            write!(f, " [{}]", tz)?;
        }
        Ok(())
    }
}

impl FromStr for ScheduleExpression {
    type Err = TimerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_fields_default_the_year() {
        let schedule = ScheduleExpression::parse("0 0 12 * * *").unwrap();
        assert_eq!(schedule.hour, "12");
        assert_eq!(schedule.year, "*");
        assert_eq!(schedule.to_cron(), "0 0 12 * * * *");
    }

    #[test]
    fn cron_text_parses_back_to_the_same_schedule() {
        let schedule = ScheduleExpression::new()
            .second("30")
            .minute("*/15")
            .hour("9-17")
            .day_of_week("MON-FRI");
        let reparsed: ScheduleExpression = schedule.to_cron().parse().unwrap();
        assert_eq!(reparsed, schedule);
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        let err = ScheduleExpression::parse("0 12 * *").unwrap_err();
        assert!(matches!(err, TimerError::InvalidSchedule { field, .. } if field == "expression"));
    }
}
