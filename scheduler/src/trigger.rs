use std::fmt;

use chrono::{DateTime, Datelike, Days, Duration, NaiveTime, Timelike, Utc};
use common::{
    error::{AppError, Res},
    misc::add_months,
};

/// When a sweep fires. All times are UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Hourly { minute: u32 },
    Daily { at: NaiveTime },
    /// `day` is limited to 1..=28 so every month has it.
    Monthly { day: u32, at: NaiveTime },
}

impl Trigger {
    pub fn hourly(minute: u32) -> Res<Self> {
        if minute > 59 {
            return Err(AppError::Validation(format!("Invalid minute {}", minute)));
        }
        Ok(Trigger::Hourly { minute })
    }

    pub fn daily(hour: u32, minute: u32) -> Res<Self> {
        Ok(Trigger::Daily {
            at: time_of_day(hour, minute)?,
        })
    }

    pub fn monthly(day: u32, hour: u32, minute: u32) -> Res<Self> {
        if !(1..=28).contains(&day) {
            return Err(AppError::Validation(format!(
                "Monthly trigger day must be within 1..=28, got {}",
                day
            )));
        }
        Ok(Trigger::Monthly {
            day,
            at: time_of_day(hour, minute)?,
        })
    }

    /// First firing strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Trigger::Hourly { minute } => {
                let into_hour = Duration::minutes(i64::from(after.minute()))
                    + Duration::seconds(i64::from(after.second()))
                    + Duration::nanoseconds(i64::from(after.nanosecond()));
                let candidate = after - into_hour + Duration::minutes(i64::from(minute));
                if candidate > after {
                    candidate
                } else {
                    candidate + Duration::hours(1)
                }
            }
            Trigger::Daily { at } => {
                let candidate = after.date_naive().and_time(at).and_utc();
                if candidate > after {
                    candidate
                } else {
                    candidate + Duration::days(1)
                }
            }
            Trigger::Monthly { day, at } => {
                let first = after.date_naive() - Days::new(u64::from(after.day0()));
                let candidate = (first + Days::new(u64::from(day - 1)))
                    .and_time(at)
                    .and_utc();
                if candidate > after {
                    candidate
                } else {
                    add_months(candidate, 1)
                }
            }
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Hourly { minute } => write!(f, "hourly at :{:02}", minute),
            Trigger::Daily { at } => write!(f, "daily at {}", at.format("%H:%M")),
            Trigger::Monthly { day, at } => {
                write!(f, "monthly on day {} at {}", day, at.format("%H:%M"))
            }
        }
    }
}

fn time_of_day(hour: u32, minute: u32) -> Res<NaiveTime> {
    NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| AppError::Validation(format!("Invalid time of day {}:{}", hour, minute)))
}
