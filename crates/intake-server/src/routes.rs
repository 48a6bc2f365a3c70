//! HTTP handlers for the transaction API

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use txn_intake_core::validation::{ValidationErrors, validate};
use txn_intake_core::{CreateOutcome, EngineError, StoredTransaction, TransactionRecord};
use uuid::Uuid;

use crate::AppState;
use crate::problem::Problem;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedResponse {
    pub insert_date_time: DateTime<Utc>,
}

/// Stored transaction as returned by lookups
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    pub id: Uuid,
    pub transaction_date: DateTime<Utc>,
    pub amount: Decimal,
}

impl From<StoredTransaction> for TransactionView {
    fn from(stored: StoredTransaction) -> Self {
        Self {
            id: stored.id,
            transaction_date: stored.transaction_date,
            amount: stored.amount,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

fn internal(err: EngineError) -> Problem {
    error!("Transaction request failed: {err}");
    Problem::internal()
}

pub async fn create_transaction(
    State(state): State<AppState>,
    payload: Result<Json<TransactionRecord>, JsonRejection>,
) -> Result<Json<CreatedResponse>, Problem> {
    // Captured before any store work; becomes the insertion timestamp
    let received_at = Utc::now();

    let Json(record) = payload.map_err(|rejection| {
        debug!("Rejected transaction body: {}", rejection.body_text());
        Problem::validation(ValidationErrors::single("body", rejection.body_text()))
    })?;

    validate(&record, received_at).map_err(Problem::validation)?;

    match state.engine.create(&record, received_at).await {
        Ok(CreateOutcome::Inserted { insert_date_time })
        | Ok(CreateOutcome::Replayed {
            insert_date_time, ..
        }) => Ok(Json(CreatedResponse { insert_date_time })),
        Ok(CreateOutcome::CapacityExhausted { max }) => Err(Problem::capacity(max)),
        Ok(CreateOutcome::Conflict {
            existing,
            mismatched,
        }) => Err(Problem::idempotency_conflict(existing, &mismatched)),
        Err(e) => Err(internal(e)),
    }
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<TransactionView>, Problem> {
    let raw = query
        .id
        .ok_or_else(|| Problem::validation(ValidationErrors::single("id", "Id is required.")))?;
    let id = Uuid::parse_str(raw.trim()).map_err(|_| {
        Problem::validation(ValidationErrors::single(
            "id",
            format!("The value '{raw}' is not a valid GUID."),
        ))
    })?;

    match state.engine.get_by_id(id).await {
        Ok(Some(stored)) => Ok(Json(TransactionView::from(stored))),
        Ok(None) => Err(Problem::not_found()),
        Err(e) => Err(internal(e)),
    }
}
