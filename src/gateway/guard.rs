//! Write-endpoint guard: drives one idempotent request through
//! reserve → execute → commit, or replays / rejects without executing.

use crate::error::{ApiError, LedgerError};
use crate::ledger::{Begin, IdempotencyLedger};
use axum::http::StatusCode;
use serde_json::Value;
use std::future::Future;

/// Run `write_op` at most once for `key`.
///
/// - Fresh key: the reservation is taken, `write_op` executes, and its
///   response is committed so later identical calls replay it.
/// - Known key, same payload, committed: the recorded status and body come
///   back verbatim; `write_op` never runs.
/// - Known key, different payload: `Conflict`. Same payload but still
///   pending: `InFlight`. Both surface as 409s upstream.
/// - `write_op` failure releases the reservation and propagates the error,
///   so only successful effects are memoized and an identical retry
///   re-executes.
pub async fn run_idempotent<F, Fut>(
    ledger: &IdempotencyLedger,
    key: &str,
    endpoint: &str,
    payload: &Value,
    write_op: F,
) -> Result<(StatusCode, Value), ApiError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(StatusCode, Value), ApiError>>,
{
    match ledger.begin(key, endpoint, payload).await? {
        Begin::Replay(record) => {
            let (status, body) = record.replay_parts().ok_or_else(|| {
                LedgerError::Storage(format!("committed record for key {key} has no response"))
            })?;
            let status = StatusCode::from_u16(status).map_err(|_| {
                LedgerError::Storage(format!("stored status code {status} is not valid HTTP"))
            })?;
            let body: Value = serde_json::from_str(body).map_err(|e| {
                LedgerError::Storage(format!("stored response for key {key} is not valid JSON: {e}"))
            })?;
            tracing::info!(key, endpoint, "replaying recorded response");
            Ok((status, body))
        }
        Begin::Fresh => match write_op().await {
            Ok((status, body)) => {
                if let Err(commit_err) = ledger.commit(key, payload, &body, status.as_u16()).await {
                    // The effect is committed but the record is not; release
                    // so a retry re-executes rather than wedging the key.
                    if let Err(release_err) = ledger.release(key).await {
                        tracing::warn!(
                            key,
                            "failed to release reservation after commit error: {release_err}"
                        );
                    }
                    return Err(commit_err.into());
                }
                Ok((status, body))
            }
            Err(write_err) => {
                if let Err(release_err) = ledger.release(key).await {
                    tracing::warn!(
                        key,
                        "failed to release reservation after write failure: {release_err}"
                    );
                }
                Err(write_err)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::error::OrderError;
    use crate::ledger::LedgerSettings;
    use chrono::Duration;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn test_ledger() -> IdempotencyLedger {
        IdempotencyLedger::open(
            db::connect_in_memory().await.unwrap(),
            LedgerSettings {
                record_ttl: Duration::hours(24),
                reservation_ttl: Duration::seconds(120),
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn executes_once_and_replays() {
        let ledger = test_ledger().await;
        let payload = json!({"amount": 100});
        let executions = AtomicUsize::new(0);

        let write_op = || async {
            executions.fetch_add(1, Ordering::SeqCst);
            Ok((StatusCode::CREATED, json!({"id": "o-1"})))
        };

        let first = run_idempotent(&ledger, "key-1", "/orders", &payload, write_op)
            .await
            .unwrap();
        assert_eq!(first.0, StatusCode::CREATED);

        // Second call must not reach the write op.
        let write_op = || async {
            executions.fetch_add(1, Ordering::SeqCst);
            Ok((StatusCode::CREATED, json!({"id": "o-1"})))
        };
        let second = run_idempotent(&ledger, "key-1", "/orders", &payload, write_op)
            .await
            .unwrap();
        assert_eq!(second.0, StatusCode::CREATED);
        assert_eq!(second.1, json!({"id": "o-1"}));
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_write_leaves_no_record() {
        let ledger = test_ledger().await;
        let payload = json!({"amount": 100});

        let failed = run_idempotent(&ledger, "key-2", "/orders", &payload, || async {
            Err::<(StatusCode, Value), ApiError>(ApiError::Order(OrderError::Storage(
                "disk full".into(),
            )))
        })
        .await;
        assert!(failed.is_err());
        assert!(ledger.find("key-2").await.unwrap().is_none());

        // Identical retry re-executes.
        let retried = run_idempotent(&ledger, "key-2", "/orders", &payload, || async {
            Ok((StatusCode::CREATED, json!({"id": "o-2"})))
        })
        .await
        .unwrap();
        assert_eq!(retried.1, json!({"id": "o-2"}));
    }

    #[tokio::test]
    async fn different_payload_conflicts() {
        let ledger = test_ledger().await;
        let executions = AtomicUsize::new(0);

        run_idempotent(&ledger, "key-3", "/orders", &json!({"amount": 100}), || async {
            executions.fetch_add(1, Ordering::SeqCst);
            Ok((StatusCode::CREATED, json!({"id": "o-3"})))
        })
        .await
        .unwrap();

        let err = run_idempotent(&ledger, "key-3", "/orders", &json!({"amount": 200}), || async {
            executions.fetch_add(1, Ordering::SeqCst);
            Ok((StatusCode::CREATED, json!({"id": "o-3"})))
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ApiError::Ledger(LedgerError::Conflict { .. })
        ));
        // The conflicting request never executed.
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }
}
