//! Problem-details responses (`application/problem+json`)

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use txn_intake_core::StoredTransaction;
use txn_intake_core::idempotency::MismatchedField;
use txn_intake_core::validation::ValidationErrors;

pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

pub const TYPE_VALIDATION: &str = "urn:problem-type:validation";
pub const TYPE_CAPACITY: &str = "urn:problem-type:capacity";
pub const TYPE_IDEMPOTENCY_CONFLICT: &str = "urn:problem-type:idempotency-conflict";
pub const TYPE_NOT_FOUND: &str = "urn:problem-type:not-found";
pub const TYPE_INTERNAL: &str = "urn:problem-type:internal";

/// A problem-details body plus its status code.
#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub title: &'static str,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<ValidationErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing: Option<StoredTransaction>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mismatched: Vec<&'static str>,
}

impl Problem {
    fn new(kind: &'static str, title: &'static str, status: StatusCode) -> Self {
        Self {
            kind,
            title,
            status: status.as_u16(),
            detail: None,
            errors: None,
            existing: None,
            mismatched: Vec::new(),
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn validation(errors: ValidationErrors) -> Self {
        let mut problem = Self::new(TYPE_VALIDATION, "Validation error", StatusCode::BAD_REQUEST)
            .with_detail("One or more fields are invalid.");
        problem.errors = Some(errors);
        problem
    }

    pub fn capacity(max: u32) -> Self {
        Self::new(
            TYPE_CAPACITY,
            "Transaction capacity reached",
            StatusCode::CONFLICT,
        )
        .with_detail(format!("The service stores at most {max} transactions."))
    }

    pub fn idempotency_conflict(existing: StoredTransaction, mismatched: &[MismatchedField]) -> Self {
        let fields: Vec<&'static str> = mismatched.iter().map(MismatchedField::as_str).collect();
        let mut problem = Self::new(
            TYPE_IDEMPOTENCY_CONFLICT,
            "Idempotency conflict",
            StatusCode::CONFLICT,
        )
        .with_detail(format!(
            "Transaction {} already exists with a different {}.",
            existing.id,
            fields.join(" and ")
        ));
        problem.existing = Some(existing);
        problem.mismatched = fields;
        problem
    }

    pub fn not_found() -> Self {
        Self::new(TYPE_NOT_FOUND, "Transaction not found", StatusCode::NOT_FOUND)
            .with_detail("No transaction exists for the provided id.")
    }

    pub fn internal() -> Self {
        Self::new(
            TYPE_INTERNAL,
            "Internal server error",
            StatusCode::INTERNAL_SERVER_ERROR,
        )
        .with_detail("An unexpected error occurred.")
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            [(header::CONTENT_TYPE, PROBLEM_CONTENT_TYPE)],
            Json(self),
        )
            .into_response()
    }
}
