//! Record shapes stored in the clinic's document collections.
//!
//! The store is schemaless, so every field decodes with a default and every
//! date-like field goes through [`DateField`].

use std::ops::Deref;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::db::DocumentId;

pub mod patient;
pub mod review;
pub mod session;
pub mod user;

pub use patient::Patient;
pub use review::Review;
pub use session::SessionRecord;
pub use user::UserRecord;

/// Shown wherever a record carries no usable date.
pub const NO_DATE: &str = "No date";

/// Localized date rendering used across the clinic UI.
pub const DATE_FORMAT: &str = "%d/%m/%Y";

/// Point in time as the store encodes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanoseconds: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.seconds, self.nanoseconds).single()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self {
            seconds: value.timestamp(),
            nanoseconds: value.timestamp_subsec_nanos(),
        }
    }
}

/// A date field that may hold either a store timestamp or free text
/// (form inputs are saved as `yyyy-mm-dd` strings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateField {
    Timestamp(Timestamp),
    Text(String),
}

impl From<Timestamp> for DateField {
    fn from(value: Timestamp) -> Self {
        DateField::Timestamp(value)
    }
}

impl From<&str> for DateField {
    fn from(value: &str) -> Self {
        DateField::Text(value.to_string())
    }
}

/// Timestamp -> local date string, text passes through, anything else -> [`NO_DATE`].
pub fn display_date(field: Option<&DateField>) -> String {
    match field {
        Some(DateField::Timestamp(ts)) => ts
            .to_datetime()
            .map(|dt| dt.with_timezone(&Local).format(DATE_FORMAT).to_string())
            .unwrap_or_else(|| NO_DATE.to_string()),
        Some(DateField::Text(text)) if !text.trim().is_empty() => text.clone(),
        _ => NO_DATE.to_string(),
    }
}

/// Parses the date strings this application produces or accepts. `None` for
/// anything else, including [`NO_DATE`].
pub fn parse_display_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local().date());
    }

    ["%Y-%m-%d", DATE_FORMAT, "%d-%m-%Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

/// A record paired with the identifier the store assigned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Stored<T> {
    pub id: DocumentId,
    pub record: T,
}

impl<T> Stored<T> {
    pub fn new(id: DocumentId, record: T) -> Self {
        Self { id, record }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Stored<U> {
        Stored {
            id: self.id,
            record: f(self.record),
        }
    }
}

impl<T> Deref for Stored<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.record
    }
}
