use std::{
    cell::Cell,
    fmt,
    rc::{Rc, Weak},
    time::{SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use parse_display::{Display, FromStr};

use crate::{Error, HookFilter, Index, Result, Subscription, Value};

use super::{Hooks, Mutation, MutationSink};

const MS_PER_DAY: f64 = 86_400_000.0;
const MAX_TIME: f64 = 8.64e15;

/// A field derived from a [`Date`]'s timestamp, all in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromStr)]
#[display(style = "camelCase")]
pub enum DateField {
    FullYear,
    /// Zero based.
    Month,
    /// Day of the month.
    Date,
    /// Day of the week, zero is Sunday. Not settable.
    Day,
    Hours,
    Minutes,
    Seconds,
    Milliseconds,
    Time,
}

impl DateField {
    pub const ALL: [DateField; 9] = [
        DateField::FullYear,
        DateField::Month,
        DateField::Date,
        DateField::Day,
        DateField::Hours,
        DateField::Minutes,
        DateField::Seconds,
        DateField::Milliseconds,
        DateField::Time,
    ];
}

/// Shared handle to a millisecond UTC timestamp.
///
/// Setters notify one event per derived field whose value changed.
#[derive(Clone)]
pub struct Date(Rc<DateData>);

struct DateData {
    time: Cell<f64>,
    hooks: Hooks,
}

impl Date {
    pub fn new(time: f64) -> Self {
        Self(Rc::new(DateData {
            time: Cell::new(time_clip(time)),
            hooks: Hooks::new(),
        }))
    }
    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |d| d.as_millis() as f64);
        Self::new(ms)
    }
    /// Build from calendar parts. Out of range parts roll over into the next unit.
    pub fn from_parts(year: f64, month: f64, date: f64, hours: f64, minutes: f64, seconds: f64, ms: f64) -> Self {
        Self::new(make_time([year, month, date, hours, minutes, seconds, ms]))
    }
    /// Parse an RFC 3339 timestamp; anything else is an invalid date.
    pub fn parse(s: &str) -> Self {
        match DateTime::parse_from_rfc3339(s.trim()) {
            Ok(dt) => Self::new(dt.timestamp_millis() as f64),
            Err(_) => match NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d") {
                Ok(d) => Self::new(days_from_epoch(d) as f64 * MS_PER_DAY),
                Err(_) => Self::new(f64::NAN),
            },
        }
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn time(&self) -> f64 {
        self.0.time.get()
    }
    pub fn is_valid(&self) -> bool {
        !self.time().is_nan()
    }

    pub fn field(&self, field: DateField) -> f64 {
        field_of(self.time(), field)
    }

    pub fn set_time(&self, time: f64) {
        let old = self.fields();
        self.0.time.set(time_clip(time));
        let new = self.fields();
        let target = Value::Date(self.clone());
        let mutations = DateField::ALL
            .iter()
            .zip(old.iter().zip(new.iter()))
            .filter(|(_, (old, new))| !Value::Number(**old).same(&Value::Number(**new)))
            .map(|(field, (_, new))| {
                Mutation::new(target.clone(), Index::Date(*field)).with_value(Value::Number(*new))
            })
            .collect::<Vec<_>>();
        self.0.hooks.notify_all(mutations);
    }

    /// Write one calendar field.
    ///
    /// Fails with [`Error::Unsupported`] for [`DateField::Day`].
    pub fn set_field(&self, field: DateField, value: f64) -> Result<()> {
        let mut parts = match parts_of(self.time()) {
            Some(parts) => parts,
            None if field == DateField::FullYear => [1970.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
            None => [f64::NAN; 7],
        };
        let slot = match field {
            DateField::Time => {
                self.set_time(value);
                return Ok(());
            }
            DateField::Day => {
                return Err(Error::Unsupported {
                    type_name: "Date",
                    index: field.to_string(),
                })
            }
            DateField::FullYear => 0,
            DateField::Month => 1,
            DateField::Date => 2,
            DateField::Hours => 3,
            DateField::Minutes => 4,
            DateField::Seconds => 5,
            DateField::Milliseconds => 6,
        };
        parts[slot] = value;
        self.set_time(make_time(parts));
        Ok(())
    }

    fn fields(&self) -> [f64; 9] {
        let time = self.time();
        DateField::ALL.map(|f| field_of(time, f))
    }

    pub(crate) fn hook(&self, filter: HookFilter, sink: Weak<dyn MutationSink>) -> Subscription {
        self.0.hooks.insert(filter, sink)
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match to_datetime(self.time()) {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
            None => write!(f, "Invalid Date"),
        }
    }
}

fn time_clip(time: f64) -> f64 {
    if !time.is_finite() || time.abs() > MAX_TIME {
        f64::NAN
    } else {
        time.trunc() + 0.0
    }
}

fn to_datetime(time: f64) -> Option<DateTime<Utc>> {
    if time.is_nan() {
        return None;
    }
    DateTime::from_timestamp_millis(time as i64)
}

fn parts_of(time: f64) -> Option<[f64; 7]> {
    let dt = to_datetime(time)?;
    Some([
        dt.year() as f64,
        dt.month0() as f64,
        dt.day() as f64,
        dt.hour() as f64,
        dt.minute() as f64,
        dt.second() as f64,
        (dt.timestamp_subsec_millis()) as f64,
    ])
}

fn field_of(time: f64, field: DateField) -> f64 {
    let Some(dt) = to_datetime(time) else {
        return f64::NAN;
    };
    match field {
        DateField::FullYear => dt.year() as f64,
        DateField::Month => dt.month0() as f64,
        DateField::Date => dt.day() as f64,
        DateField::Day => dt.weekday().num_days_from_sunday() as f64,
        DateField::Hours => dt.hour() as f64,
        DateField::Minutes => dt.minute() as f64,
        DateField::Seconds => dt.second() as f64,
        DateField::Milliseconds => dt.timestamp_subsec_millis() as f64,
        DateField::Time => time,
    }
}

fn days_from_epoch(date: NaiveDate) -> i64 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    date.signed_duration_since(epoch).num_days()
}

/// `[year, month, date, hours, minutes, seconds, ms]` to a timestamp.
fn make_time(parts: [f64; 7]) -> f64 {
    if parts.iter().any(|p| !p.is_finite()) {
        return f64::NAN;
    }
    let [year, month, date, hours, minutes, seconds, ms] = parts.map(f64::trunc);
    let year = year + (month / 12.0).floor();
    let month = month.rem_euclid(12.0);
    if year.abs() > 400_000.0 {
        return f64::NAN;
    }
    let Some(first) = NaiveDate::from_ymd_opt(year as i32, month as u32 + 1, 1) else {
        return f64::NAN;
    };
    let days = days_from_epoch(first) as f64 + date - 1.0;
    time_clip(days * MS_PER_DAY + hours * 3_600_000.0 + minutes * 60_000.0 + seconds * 1000.0 + ms)
}
