//! Periodic sweep of expired ledger records. Storage hygiene only — the
//! lazy eviction in `IdempotencyLedger::begin` keeps reads correct even if
//! this task never runs.

use crate::ledger::IdempotencyLedger;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

pub async fn run(ledger: Arc<IdempotencyLedger>, every: Duration) {
    let mut interval = time::interval(every);

    loop {
        interval.tick().await;

        match ledger.cleanup_expired().await {
            Ok(0) => {}
            Ok(removed) => tracing::info!("swept {removed} expired idempotency records"),
            Err(e) => tracing::warn!("idempotency sweep failed: {e}"),
        }
    }
}
