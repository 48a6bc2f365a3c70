//! Transaction record types

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::normalize::normalize;

/// How the wall-clock value of a [`TransactionDate`] should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateKind {
    /// Wall clock is already UTC.
    Utc,
    /// Wall clock is in the host's local timezone.
    Local,
    /// No zone information; treated as UTC by the normalizer.
    Unspecified,
}

/// Caller-supplied transaction date: a wall-clock value plus its kind.
///
/// On the wire it is a string. RFC 3339 values carrying `Z` or a numeric
/// offset are absolute and become [`DateKind::Utc`]; values without a zone
/// designator (`2026-01-05T10:00:00`, `2026-01-05`) become
/// [`DateKind::Unspecified`]. [`DateKind::Local`] is only produced by
/// library callers through [`TransactionDate::local`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionDate {
    wall_clock: NaiveDateTime,
    kind: DateKind,
}

impl TransactionDate {
    pub fn new(wall_clock: NaiveDateTime, kind: DateKind) -> Self {
        Self { wall_clock, kind }
    }

    pub fn utc(wall_clock: NaiveDateTime) -> Self {
        Self::new(wall_clock, DateKind::Utc)
    }

    pub fn local(wall_clock: NaiveDateTime) -> Self {
        Self::new(wall_clock, DateKind::Local)
    }

    pub fn unspecified(wall_clock: NaiveDateTime) -> Self {
        Self::new(wall_clock, DateKind::Unspecified)
    }

    pub fn wall_clock(&self) -> NaiveDateTime {
        self.wall_clock
    }

    pub fn kind(&self) -> DateKind {
        self.kind
    }
}

impl From<DateTime<Utc>> for TransactionDate {
    fn from(value: DateTime<Utc>) -> Self {
        Self::utc(value.naive_utc())
    }
}

/// Error returned when a transaction date string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unrecognized transaction date: {input:?}")]
pub struct DateParseError {
    pub input: String,
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

impl FromStr for TransactionDate {
    type Err = DateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();

        if let Ok(absolute) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Self::utc(absolute.naive_utc()));
        }

        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
                return Ok(Self::unspecified(naive));
            }
        }

        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return Ok(Self::unspecified(date.and_time(NaiveTime::MIN)));
        }

        Err(DateParseError {
            input: s.to_string(),
        })
    }
}

impl fmt::Display for TransactionDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self.wall_clock.format("%Y-%m-%dT%H:%M:%S%.f");
        match self.kind {
            DateKind::Utc => write!(f, "{rendered}Z"),
            DateKind::Local => write!(f, "{rendered} (local)"),
            DateKind::Unspecified => write!(f, "{rendered}"),
        }
    }
}

impl<'de> Deserialize<'de> for TransactionDate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Candidate transaction as submitted by a caller (not yet stored)
///
/// `amount` may be a JSON number or string. Numbers are read from their
/// literal text, so no digits are lost to a float conversion.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: Uuid,
    pub transaction_date: TransactionDate,
    #[serde(deserialize_with = "rust_decimal::serde::arbitrary_precision::deserialize")]
    pub amount: Decimal,
}

impl TransactionRecord {
    pub fn new(id: Uuid, transaction_date: TransactionDate, amount: Decimal) -> Self {
        Self {
            id,
            transaction_date,
            amount,
        }
    }

    /// Build the row that would be stored for this candidate.
    pub fn to_stored(&self, insert_date_time: DateTime<Utc>) -> StoredTransaction {
        StoredTransaction {
            id: self.id,
            transaction_date: normalize(&self.transaction_date),
            amount: self.amount,
            insert_date_time,
        }
    }
}

/// Persisted transaction row
///
/// `insert_date_time` is set once, by the first successful insert, and is
/// what every later replay of the same `id` reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTransaction {
    pub id: Uuid,
    pub transaction_date: DateTime<Utc>,
    pub amount: Decimal,
    pub insert_date_time: DateTime<Utc>,
}
