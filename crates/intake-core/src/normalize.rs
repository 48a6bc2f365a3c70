//! Timestamp normalization
//!
//! Turns a [`TransactionDate`] into an absolute UTC instant. Unspecified
//! values are force-assigned UTC with no offset conversion; callers who mean
//! local time must say so.

use chrono::{DateTime, Local, LocalResult, TimeZone, Utc};

use crate::schema::{DateKind, TransactionDate};

/// Normalize a caller-supplied date to an absolute UTC instant.
///
/// Local wall clocks that fall in a DST fold resolve to the earliest
/// instant; wall clocks inside a DST gap fall back to the UTC reading.
pub fn normalize(date: &TransactionDate) -> DateTime<Utc> {
    let wall_clock = date.wall_clock();
    match date.kind() {
        DateKind::Utc | DateKind::Unspecified => Utc.from_utc_datetime(&wall_clock),
        DateKind::Local => match Local.from_local_datetime(&wall_clock) {
            LocalResult::Single(local) => local.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            LocalResult::None => Utc.from_utc_datetime(&wall_clock),
        },
    }
}
