use std::fmt;
use std::ops::RangeInclusive;

use chrono::{Duration, NaiveDate};

const PREFIX: &str = "todos-";
const DATE_FMT: &str = "%Y%m%d";

/// Store key of one day's collection: `todos-YYYYMMDD`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn for_date(date: NaiveDate) -> Self {
        RecordKey(format!("{PREFIX}{}", date.format(DATE_FMT)))
    }

    /// Accepts only well-formed day keys.
    pub fn parse(raw: &str) -> Option<Self> {
        let digits = raw.strip_prefix(PREFIX)?;
        if digits.len() != 8 {
            return None;
        }
        NaiveDate::parse_from_str(digits, DATE_FMT).ok()?;
        Some(RecordKey(raw.to_string()))
    }

    pub fn date(&self) -> NaiveDate {
        // Constructors guarantee the suffix is a valid date.
        NaiveDate::parse_from_str(&self.0[PREFIX.len()..], DATE_FMT)
            .expect("record key holds a valid date")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RecordKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/*──────── visible days ────────*/

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Day {
    pub key: RecordKey,
    pub date: NaiveDate,
    pub offset: i64,
}

impl Day {
    pub fn is_today(&self) -> bool {
        self.offset == 0
    }

    /// Past days are shown but cannot receive new tasks.
    pub fn is_past(&self) -> bool {
        self.offset < 0
    }
}

/// The run of days around today that the client displays and subscribes to.
#[derive(Clone, Debug)]
pub struct DayWindow {
    today: NaiveDate,
    offsets: RangeInclusive<i64>,
}

impl DayWindow {
    pub fn new(today: NaiveDate, offsets: RangeInclusive<i64>) -> Self {
        Self { today, offsets }
    }

    pub fn today(&self) -> Day {
        self.day(0)
    }

    pub fn day(&self, offset: i64) -> Day {
        let date = self.today + Duration::days(offset);
        Day {
            key: RecordKey::for_date(date),
            date,
            offset,
        }
    }

    pub fn days(&self) -> Vec<Day> {
        self.offsets.clone().map(|o| self.day(o)).collect()
    }

    pub fn keys(&self) -> Vec<RecordKey> {
        self.days().into_iter().map(|d| d.key).collect()
    }

    pub fn contains_offset(&self, offset: i64) -> bool {
        self.offsets.contains(&offset)
    }

    /// Days before today are read-only, whether or not they are in the window.
    pub fn is_past(&self, key: &RecordKey) -> bool {
        key.date() < self.today
    }
}
