//! Idempotency ledger: the durable record of (key → payload fingerprint,
//! cached response, status code, expiry) and the reserve/commit/release
//! protocol around it.
//!
//! Reservation is atomic: `begin` claims a key with a single
//! insert-if-absent of a `pending` row, so two concurrent requests carrying
//! the same fresh key can never both proceed to execute the write. The
//! loser observes `InFlight` (reservation still held) or `Replay`
//! (already committed). Committed records are write-once: read or deleted,
//! never mutated.

pub mod fingerprint;
mod schema;

use crate::error::LedgerError;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::SqlitePool;

/// Timing knobs, injected at construction.
#[derive(Debug, Clone, Copy)]
pub struct LedgerSettings {
    /// Lifetime of a committed record.
    pub record_ttl: Duration,
    /// Lifetime of a pending reservation. Bounds how long a crashed
    /// request can hold a key.
    pub reservation_ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Pending,
    Committed,
}

impl RecordState {
    fn parse(raw: &str) -> Result<Self, LedgerError> {
        match raw {
            "pending" => Ok(Self::Pending),
            "committed" => Ok(Self::Committed),
            other => Err(LedgerError::Storage(format!(
                "unknown record state '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub key: String,
    pub endpoint: String,
    /// Canonical serialization of the original request payload.
    pub request_payload: String,
    pub fingerprint: String,
    pub response_data: Option<String>,
    pub http_status_code: Option<u16>,
    pub state: RecordState,
    pub created_at: DateTime<Utc>,
    /// `None` means the record never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl IdempotencyRecord {
    /// A record is live iff `expires_at` is absent or strictly in the future.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Status code and serialized body to replay, present on committed rows.
    pub fn replay_parts(&self) -> Option<(u16, &str)> {
        Some((self.http_status_code?, self.response_data.as_deref()?))
    }
}

/// Outcome of [`IdempotencyLedger::begin`].
#[derive(Debug)]
pub enum Begin {
    /// No live record existed; the key is now reserved and the caller must
    /// `commit` after the write succeeds or `release` after it fails.
    Fresh,
    /// A committed record with a matching fingerprint exists; replay its
    /// response verbatim without re-executing the write.
    Replay(IdempotencyRecord),
}

pub struct IdempotencyLedger {
    pool: SqlitePool,
    settings: LedgerSettings,
}

impl IdempotencyLedger {
    /// Initialize the schema and wrap the pool.
    pub async fn open(pool: SqlitePool, settings: LedgerSettings) -> anyhow::Result<Self> {
        schema::init_schema(&pool).await?;
        Ok(Self { pool, settings })
    }

    /// Atomically check `key` against `payload` and reserve it if absent.
    ///
    /// An expired record (pending or committed) is deleted and treated as
    /// absent; expiry normalization is never an error. A live record with a
    /// different fingerprint fails with [`LedgerError::Conflict`] carrying
    /// both payloads.
    pub async fn begin(
        &self,
        key: &str,
        endpoint: &str,
        payload: &Value,
    ) -> Result<Begin, LedgerError> {
        let canonical = fingerprint::canonical_json(payload);
        let digest = fingerprint::digest(&canonical);

        // Second pass only runs after evicting an expired row.
        for _ in 0..2 {
            let now = Utc::now();
            let reservation_expiry = now + self.settings.reservation_ttl;
            let inserted = sqlx::query(
                "INSERT INTO idempotency_records \
                 (key, endpoint, request_payload, fingerprint, state, created_at, expires_at) \
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6) \
                 ON CONFLICT(key) DO NOTHING",
            )
            .bind(key)
            .bind(endpoint)
            .bind(&canonical)
            .bind(&digest)
            .bind(to_rfc3339(now))
            .bind(to_rfc3339(reservation_expiry))
            .execute(&self.pool)
            .await?;

            if inserted.rows_affected() == 1 {
                return Ok(Begin::Fresh);
            }

            let Some(existing) = self.find(key).await? else {
                // Row vanished between insert and read; re-reserve.
                continue;
            };

            if existing.is_expired(now) {
                self.evict_expired(key, now).await?;
                continue;
            }

            if existing.fingerprint != digest {
                tracing::warn!(key, "idempotency key reused with a different payload");
                return Err(LedgerError::Conflict {
                    original: existing.request_payload,
                    current: canonical,
                });
            }

            return match existing.state {
                RecordState::Committed => Ok(Begin::Replay(existing)),
                RecordState::Pending => Err(LedgerError::InFlight),
            };
        }

        Err(LedgerError::Storage(format!(
            "could not reserve idempotency key {key}"
        )))
    }

    /// Transition the pending reservation for `key` to committed, recording
    /// the response to replay. Uses the configured record TTL.
    ///
    /// `payload` must be the payload passed to the matching `begin`: the
    /// update only touches a pending row carrying its fingerprint, so a
    /// writer that outlived its own reservation cannot stamp its response
    /// onto a successor's reservation taken under a different payload.
    pub async fn commit(
        &self,
        key: &str,
        payload: &Value,
        response: &Value,
        status_code: u16,
    ) -> Result<(), LedgerError> {
        self.commit_with_ttl(key, payload, response, status_code, self.settings.record_ttl)
            .await
    }

    /// `commit` with a caller-supplied record lifetime.
    pub async fn commit_with_ttl(
        &self,
        key: &str,
        payload: &Value,
        response: &Value,
        status_code: u16,
        ttl: Duration,
    ) -> Result<(), LedgerError> {
        let digest = fingerprint::fingerprint(payload);
        let expires_at = Utc::now() + ttl;
        let body = response.to_string();
        let updated = sqlx::query(
            "UPDATE idempotency_records \
             SET state = 'committed', response_data = ?2, http_status_code = ?3, expires_at = ?4 \
             WHERE key = ?1 AND state = 'pending' AND fingerprint = ?5",
        )
        .bind(key)
        .bind(&body)
        .bind(i64::from(status_code))
        .bind(to_rfc3339(expires_at))
        .bind(&digest)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() != 1 {
            return Err(LedgerError::Storage(format!(
                "no matching pending reservation to commit for key {key}"
            )));
        }
        Ok(())
    }

    /// Drop the pending reservation for `key`, so an identical retry
    /// re-executes. Committed records are left untouched.
    pub async fn release(&self, key: &str) -> Result<(), LedgerError> {
        sqlx::query("DELETE FROM idempotency_records WHERE key = ?1 AND state = 'pending'")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete every record whose expiry is in the past; returns the count.
    /// Hygiene only — the lazy eviction in `begin` keeps reads correct
    /// without it.
    pub async fn cleanup_expired(&self) -> Result<u64, LedgerError> {
        let result =
            sqlx::query("DELETE FROM idempotency_records WHERE expires_at IS NOT NULL AND expires_at < ?1")
                .bind(to_rfc3339(Utc::now()))
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Fetch the raw record for `key`, live or not.
    pub async fn find(&self, key: &str) -> Result<Option<IdempotencyRecord>, LedgerError> {
        type Row = (
            String,
            String,
            String,
            String,
            Option<String>,
            Option<i64>,
            String,
            String,
            Option<String>,
        );
        let row: Option<Row> = sqlx::query_as(
            "SELECT key, endpoint, request_payload, fingerprint, response_data, \
                    http_status_code, state, created_at, expires_at \
             FROM idempotency_records WHERE key = ?1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(record_from_row).transpose()
    }

    /// Remove the row for `key` only if it is still expired as of `now`.
    ///
    /// The predicate matters: between observing a row as expired and
    /// evicting it, a concurrent `begin` may have evicted it first and
    /// re-reserved the key. An unconditional delete would destroy that
    /// live reservation and let both requests execute; the conditional
    /// form leaves it intact, so the retry insert conflicts and resolves
    /// to `InFlight` or `Replay`.
    async fn evict_expired(&self, key: &str, now: DateTime<Utc>) -> Result<(), LedgerError> {
        sqlx::query(
            "DELETE FROM idempotency_records \
             WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
        )
        .bind(key)
        .bind(to_rfc3339(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[allow(clippy::type_complexity)]
fn record_from_row(
    (key, endpoint, request_payload, fp, response_data, status, state, created_at, expires_at): (
        String,
        String,
        String,
        String,
        Option<String>,
        Option<i64>,
        String,
        String,
        Option<String>,
    ),
) -> Result<IdempotencyRecord, LedgerError> {
    let http_status_code = status
        .map(|raw| {
            u16::try_from(raw)
                .map_err(|_| LedgerError::Storage(format!("stored status code {raw} out of range")))
        })
        .transpose()?;

    Ok(IdempotencyRecord {
        state: RecordState::parse(&state)?,
        created_at: parse_rfc3339(&created_at)?,
        expires_at: expires_at.as_deref().map(parse_rfc3339).transpose()?,
        key,
        endpoint,
        request_payload,
        fingerprint: fp,
        response_data,
        http_status_code,
    })
}

/// Fixed-width UTC form so lexicographic TEXT comparison matches time order.
fn to_rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|e| LedgerError::Storage(format!("invalid timestamp in ledger: {raw} ({e})")))
}
