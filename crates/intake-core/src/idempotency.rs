//! Replay reconciliation for identifiers that are already stored

use tracing::{debug, warn};

use crate::engine::CreateOutcome;
use crate::schema::StoredTransaction;

/// Payload fields compared when deciding whether a replay matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchedField {
    Amount,
    TransactionDate,
}

impl MismatchedField {
    /// Wire name of the field
    pub fn as_str(&self) -> &'static str {
        match self {
            MismatchedField::Amount => "amount",
            MismatchedField::TransactionDate => "transactionDate",
        }
    }
}

/// Payload fields on which `existing` and `candidate` differ.
///
/// Amounts compare as exact decimals (`10` equals `10.00`); dates compare as
/// normalized UTC instants. There is no tolerance window.
pub fn mismatched_fields(
    existing: &StoredTransaction,
    candidate: &StoredTransaction,
) -> Vec<MismatchedField> {
    let mut fields = Vec::new();
    if existing.amount != candidate.amount {
        fields.push(MismatchedField::Amount);
    }
    if existing.transaction_date != candidate.transaction_date {
        fields.push(MismatchedField::TransactionDate);
    }
    fields
}

/// True when both records carry the same payload.
pub fn is_same(existing: &StoredTransaction, candidate: &StoredTransaction) -> bool {
    mismatched_fields(existing, candidate).is_empty()
}

/// Decide the response for a candidate whose identifier is already stored.
///
/// Without strict idempotency every replay succeeds with the stored
/// insertion timestamp. With it, a differing payload is a conflict and the
/// stored record is handed back for diagnosis. Never writes.
pub fn resolve(
    existing: StoredTransaction,
    candidate: &StoredTransaction,
    strict: bool,
) -> CreateOutcome {
    if strict {
        let mismatched = mismatched_fields(&existing, candidate);
        if !mismatched.is_empty() {
            warn!(
                id = %existing.id,
                fields = ?mismatched.iter().map(MismatchedField::as_str).collect::<Vec<_>>(),
                "Idempotency conflict: payload differs from stored transaction"
            );
            return CreateOutcome::Conflict {
                existing,
                mismatched,
            };
        }
    }

    debug!(id = %existing.id, "Idempotent replay of stored transaction");
    CreateOutcome::Replayed {
        insert_date_time: existing.insert_date_time,
        existing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn stored(amount: Decimal, day: u32, inserted_day: u32) -> StoredTransaction {
        StoredTransaction {
            id: Uuid::from_u128(7),
            transaction_date: Utc.with_ymd_and_hms(2026, 1, day, 0, 0, 0).unwrap(),
            amount,
            insert_date_time: Utc.with_ymd_and_hms(2026, 2, inserted_day, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_is_same_ignores_decimal_scale() {
        let a = stored(Decimal::new(10, 0), 1, 1);
        let b = stored(Decimal::new(1000, 2), 1, 2);
        assert!(is_same(&a, &b));
    }

    #[test]
    fn test_is_same_ignores_insert_time() {
        let a = stored(Decimal::new(5, 0), 1, 1);
        let b = stored(Decimal::new(5, 0), 1, 9);
        assert!(is_same(&a, &b));
    }

    #[test]
    fn test_mismatch_reports_each_field() {
        let a = stored(Decimal::new(10, 0), 1, 1);
        let b = stored(Decimal::new(11, 0), 2, 1);
        assert_eq!(
            mismatched_fields(&a, &b),
            vec![MismatchedField::Amount, MismatchedField::TransactionDate]
        );
    }

    #[test]
    fn test_non_strict_replays_even_when_payload_differs() {
        let existing = stored(Decimal::new(10, 0), 1, 1);
        let candidate = stored(Decimal::new(11, 0), 1, 5);
        match resolve(existing.clone(), &candidate, false) {
            CreateOutcome::Replayed {
                insert_date_time, ..
            } => assert_eq!(insert_date_time, existing.insert_date_time),
            other => panic!("expected replay, got {other:?}"),
        }
    }

    #[test]
    fn test_strict_replays_identical_payload() {
        let existing = stored(Decimal::new(10, 0), 1, 1);
        let candidate = stored(Decimal::new(10, 0), 1, 5);
        assert!(matches!(
            resolve(existing, &candidate, true),
            CreateOutcome::Replayed { .. }
        ));
    }

    #[test]
    fn test_strict_conflict_surfaces_existing() {
        let existing = stored(Decimal::new(10, 0), 1, 1);
        let candidate = stored(Decimal::new(11, 0), 1, 5);
        match resolve(existing.clone(), &candidate, true) {
            CreateOutcome::Conflict {
                existing: surfaced,
                mismatched,
            } => {
                assert_eq!(surfaced, existing);
                assert_eq!(mismatched, vec![MismatchedField::Amount]);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }
}
