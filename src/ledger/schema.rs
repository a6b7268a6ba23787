use sqlx::SqlitePool;

pub(super) async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(
        "CREATE TABLE IF NOT EXISTS idempotency_records (
            key              TEXT PRIMARY KEY,
            endpoint         TEXT NOT NULL,
            request_payload  TEXT NOT NULL,
            fingerprint      TEXT NOT NULL,
            response_data    TEXT,
            http_status_code INTEGER,
            state            TEXT NOT NULL DEFAULT 'pending',
            created_at       TEXT NOT NULL,
            expires_at       TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_idempotency_records_expires_at
            ON idempotency_records(expires_at);",
    )
    .execute(pool)
    .await?;
    Ok(())
}
