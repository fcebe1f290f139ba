//! Temporal Cells
//!
//! Dates, wall-clock times, and zoned timestamps.
//!
//! Wire shapes: dates are `"YYYY-MM-DD"`, times are `"HH:MM:SS"`, and
//! datetimes are RFC 3339 zoned-timestamp strings. Index buckets are
//! calendar-packed integers, `y*10000 + m*100 + d` for dates (and for a
//! datetime's civil date) and `h*10000 + m*100 + s` for times, so range
//! scans over the index line up with calendar order.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Timelike};

use crate::json::{JsonNode, JsonWriter};
use crate::scalar::value::ScalarValue;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

fn pack_date(date: &NaiveDate) -> i32 {
    date.year()
        .wrapping_mul(10000)
        .wrapping_add(date.month() as i32 * 100)
        .wrapping_add(date.day() as i32)
}

fn pack_time(time: &NaiveTime) -> i32 {
    (time.hour() as i32) * 10000 + (time.minute() as i32) * 100 + time.second() as i32
}

impl ScalarValue for NaiveDate {
    fn write(&self, w: &mut JsonWriter) {
        w.write_str(&self.format(DATE_FORMAT).to_string());
    }

    fn read(node: &JsonNode<'_>) -> Option<Self> {
        NaiveDate::parse_from_str(node.as_str()?, DATE_FORMAT).ok()
    }

    fn index_value(&self) -> Option<i32> {
        Some(pack_date(self))
    }
}

impl ScalarValue for NaiveTime {
    fn write(&self, w: &mut JsonWriter) {
        w.write_str(&self.format(TIME_FORMAT).to_string());
    }

    fn read(node: &JsonNode<'_>) -> Option<Self> {
        NaiveTime::parse_from_str(node.as_str()?, TIME_FORMAT).ok()
    }

    fn index_value(&self) -> Option<i32> {
        Some(pack_time(self))
    }
}

impl ScalarValue for DateTime<FixedOffset> {
    fn write(&self, w: &mut JsonWriter) {
        w.write_str(&self.to_rfc3339());
    }

    fn read(node: &JsonNode<'_>) -> Option<Self> {
        DateTime::parse_from_rfc3339(node.as_str()?).ok()
    }

    fn index_value(&self) -> Option<i32> {
        Some(pack_date(&self.date_naive()))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
