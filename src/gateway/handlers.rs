use crate::error::{ApiError, OrderError};
use crate::orders::CreateOrderRequest;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::{AppState, ORDERS_ENDPOINT, guard};

/// GET /health
pub(super) async fn handle_health() -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    });
    Json(body)
}

/// POST /api/v1/orders — idempotent create.
pub(super) async fn handle_create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<Value>, axum::extract::rejection::JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let key = extract_idempotency_key(&headers)?;
    let Json(payload) = body.map_err(|e| {
        ApiError::Order(OrderError::Validation(format!("Invalid JSON body: {e}")))
    })?;

    // Field validation happens before the ledger sees the payload, so a
    // malformed request never burns a reservation.
    let request: CreateOrderRequest = serde_json::from_value(payload.clone())
        .map_err(|_| OrderError::Validation("Missing required fields in the request body.".to_string()))?;
    request.validate()?;

    let orders = state.orders.clone();
    let (status, response) =
        guard::run_idempotent(&state.ledger, &key, ORDERS_ENDPOINT, &payload, move || async move {
            let order = orders.create(&request).await?;
            let body = serde_json::to_value(&order)
                .map_err(|e| OrderError::Storage(format!("serialize order response: {e}")))?;
            Ok((StatusCode::CREATED, body))
        })
        .await?;

    Ok((status, Json(response)))
}

/// POST /api/v1/orders/non-idempotent — the unguarded create, kept to
/// demonstrate the duplicate-effect problem the guarded route solves.
pub(super) async fn handle_create_order_unsafe(
    State(state): State<AppState>,
    body: Result<Json<CreateOrderRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(request) = body.map_err(|_| {
        ApiError::Order(OrderError::Validation(
            "Missing required fields in the request body.".to_string(),
        ))
    })?;

    let order = state.orders.create(&request).await?;
    let body = serde_json::to_value(&order)
        .map_err(|e| OrderError::Storage(format!("serialize order response: {e}")))?;
    Ok((StatusCode::CREATED, Json(body)))
}

/// GET /api/v1/orders/{id}
pub(super) async fn handle_get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let order = state
        .orders
        .get(&id)
        .await?
        .ok_or_else(|| OrderError::NotFound(id))?;
    let body = serde_json::to_value(&order)
        .map_err(|e| OrderError::Storage(format!("serialize order response: {e}")))?;
    Ok(Json(body))
}

/// Fallback for unmatched routes.
pub(super) async fn handle_not_found() -> impl IntoResponse {
    let body = serde_json::json!({
        "error": "NOT_FOUND",
        "message": "Route not found",
        "statusCode": StatusCode::NOT_FOUND.as_u16(),
    });
    (StatusCode::NOT_FOUND, Json(body))
}

/// The key is validated at the boundary; the ledger only ever sees
/// well-formed UUIDs.
fn extract_idempotency_key(headers: &HeaderMap) -> Result<String, ApiError> {
    let Some(raw) = headers
        .get("Idempotency-Key")
        .and_then(|value| value.to_str().ok())
    else {
        return Err(ApiError::MissingIdempotencyKey);
    };

    if Uuid::parse_str(raw).is_err() {
        tracing::warn!("rejected malformed idempotency key");
        return Err(ApiError::InvalidIdempotencyKey);
    }

    Ok(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn missing_header_rejected() {
        let headers = HeaderMap::new();
        assert!(matches!(
            extract_idempotency_key(&headers),
            Err(ApiError::MissingIdempotencyKey)
        ));
    }

    #[test]
    fn malformed_key_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("Idempotency-Key", HeaderValue::from_static("not-a-uuid"));
        assert!(matches!(
            extract_idempotency_key(&headers),
            Err(ApiError::InvalidIdempotencyKey)
        ));
    }

    #[test]
    fn valid_uuid_accepted() {
        let key = Uuid::new_v4().to_string();
        let mut headers = HeaderMap::new();
        headers.insert("Idempotency-Key", HeaderValue::from_str(&key).unwrap());
        assert_eq!(extract_idempotency_key(&headers).unwrap(), key);
    }
}
