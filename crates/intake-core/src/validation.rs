//! Request validation, run before any store interaction

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::normalize::normalize;
use crate::schema::TransactionRecord;

pub const ID_REQUIRED: &str = "Id must be a non-empty GUID.";
pub const AMOUNT_NOT_POSITIVE: &str = "Amount must be positive.";
pub const DATE_IN_FUTURE: &str = "Transaction date cannot be in the future.";

/// Field-level validation failures, keyed by wire field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Error)]
#[serde(transparent)]
pub struct ValidationErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-field failure
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &BTreeMap<String, Vec<String>> {
        &self.fields
    }

    pub fn messages(&self, field: &str) -> &[String] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.fields {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{field}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Check `record` against `now`, reporting every failing field.
pub fn validate(record: &TransactionRecord, now: DateTime<Utc>) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    if record.id.is_nil() {
        errors.add("id", ID_REQUIRED);
    }
    if record.amount <= Decimal::ZERO {
        errors.add("amount", AMOUNT_NOT_POSITIVE);
    }
    if normalize(&record.transaction_date) > now {
        errors.add("transactionDate", DATE_IN_FUTURE);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
