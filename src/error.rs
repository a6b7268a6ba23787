use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use thiserror::Error;

// ─── Idempotency ledger errors ───────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The key is live but was originally used with a different payload.
    /// Carries both canonical payloads for caller diagnosis. Never retried.
    #[error("idempotency key reused with a different payload")]
    Conflict { original: String, current: String },

    /// A concurrent request holds the reservation for this key and has not
    /// committed yet.
    #[error("another request with this idempotency key is still in flight")]
    InFlight,

    #[error("storage: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

// ─── Order store errors ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("{0}")]
    Validation(String),

    #[error("order {0} not found")]
    NotFound(String),

    #[error("storage: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for OrderError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

// ─── Top-level API error ─────────────────────────────────────────────────────

/// Everything a request handler can fail with. The `IntoResponse` impl is
/// the single place the wire error contract is shaped:
/// `{"error": CODE, "message": ..., "statusCode": N}`, with the conflict
/// body additionally carrying both payload variants.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Idempotency-Key header is required for this endpoint.")]
    MissingIdempotencyKey,

    #[error("Idempotency-Key header must be a valid UUID.")]
    InvalidIdempotencyKey,

    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("order: {0}")]
    Order(#[from] OrderError),
}

fn error_body(status: StatusCode, code: &str, message: &str) -> (StatusCode, Json<Value>) {
    let body = json!({
        "error": code,
        "message": message,
        "statusCode": status.as_u16(),
    });
    (status, Json(body))
}

/// Stored payloads are canonical JSON; fall back to the raw string if a
/// record predates that guarantee.
fn payload_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::MissingIdempotencyKey => error_body(
                StatusCode::BAD_REQUEST,
                "MISSING_IDEMPOTENCY_KEY",
                "Idempotency-Key header is required for this endpoint.",
            )
            .into_response(),
            Self::InvalidIdempotencyKey => error_body(
                StatusCode::BAD_REQUEST,
                "INVALID_IDEMPOTENCY_KEY",
                "Idempotency-Key header must be a valid UUID.",
            )
            .into_response(),
            Self::Ledger(LedgerError::Conflict { original, current }) => {
                let body = json!({
                    "error": "IDEMPOTENCY_CONFLICT",
                    "message": "Idempotency key conflict: the same key was used with different payload data.",
                    "statusCode": StatusCode::CONFLICT.as_u16(),
                    "originalPayload": payload_value(&original),
                    "currentPayload": payload_value(&current),
                });
                (StatusCode::CONFLICT, Json(body)).into_response()
            }
            Self::Ledger(LedgerError::InFlight) => error_body(
                StatusCode::CONFLICT,
                "IDEMPOTENCY_IN_FLIGHT",
                "A request with this idempotency key is still being processed. Retry once it settles.",
            )
            .into_response(),
            Self::Order(OrderError::Validation(message)) => {
                error_body(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", &message).into_response()
            }
            Self::Order(OrderError::NotFound(id)) => error_body(
                StatusCode::NOT_FOUND,
                "ORDER_NOT_FOUND",
                &format!("Order with ID {id} not found."),
            )
            .into_response(),
            Self::Ledger(LedgerError::Storage(message))
            | Self::Order(OrderError::Storage(message)) => {
                tracing::error!("storage failure: {message}");
                error_body(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "An unexpected error occurred.",
                )
                .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_error_displays_without_payloads() {
        let err = ApiError::Ledger(LedgerError::Conflict {
            original: r#"{"amount":100}"#.into(),
            current: r#"{"amount":200}"#.into(),
        });
        assert!(err.to_string().contains("different payload"));
    }

    #[test]
    fn sqlx_errors_become_storage() {
        let err: LedgerError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, LedgerError::Storage(_)));
    }

    #[test]
    fn order_not_found_displays_id() {
        let err = OrderError::NotFound("abc-123".into());
        assert!(err.to_string().contains("abc-123"));
    }
}
