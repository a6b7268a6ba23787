//! Order persistence: the underlying write operation the idempotency guard
//! wraps. A deliberately plain create/read-by-id store.

use crate::error::OrderError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub customer_email: String,
    pub product_id: String,
    pub amount: f64,
    pub currency: String,
}

impl CreateOrderRequest {
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.customer_email.trim().is_empty()
            || self.product_id.trim().is_empty()
            || self.currency.trim().is_empty()
            || self.amount <= 0.0
        {
            return Err(OrderError::Validation(
                "Missing required fields in the request body.".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub customer_email: String,
    pub product_id: String,
    pub amount: f64,
    pub currency: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct OrderStore {
    pool: SqlitePool,
}

impl OrderStore {
    pub async fn open(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS orders (
                id             TEXT PRIMARY KEY,
                customer_email TEXT NOT NULL,
                product_id     TEXT NOT NULL,
                amount         REAL NOT NULL,
                currency       TEXT NOT NULL,
                status         TEXT NOT NULL DEFAULT 'pending',
                created_at     TEXT NOT NULL
            );",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    pub async fn create(&self, request: &CreateOrderRequest) -> Result<Order, OrderError> {
        request.validate()?;

        let order = Order {
            id: Uuid::new_v4().to_string(),
            customer_email: request.customer_email.clone(),
            product_id: request.product_id.clone(),
            amount: request.amount,
            currency: request.currency.clone(),
            status: "pending".to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO orders (id, customer_email, product_id, amount, currency, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&order.id)
        .bind(&order.customer_email)
        .bind(&order.product_id)
        .bind(order.amount)
        .bind(&order.currency)
        .bind(&order.status)
        .bind(order.created_at.to_rfc3339_opts(SecondsFormat::Micros, true))
        .execute(&self.pool)
        .await?;

        Ok(order)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Order>, OrderError> {
        let row: Option<(String, String, String, f64, String, String, String)> = sqlx::query_as(
            "SELECT id, customer_email, product_id, amount, currency, status, created_at \
             FROM orders WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(
            |(id, customer_email, product_id, amount, currency, status, created_at)| {
                let created_at = DateTime::parse_from_rfc3339(&created_at)
                    .map(|parsed| parsed.with_timezone(&Utc))
                    .map_err(|e| {
                        OrderError::Storage(format!("invalid order timestamp: {created_at} ({e})"))
                    })?;
                Ok(Order {
                    id,
                    customer_email,
                    product_id,
                    amount,
                    currency,
                    status,
                    created_at,
                })
            },
        )
        .transpose()
    }

    pub async fn count(&self) -> Result<u64, OrderError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn request() -> CreateOrderRequest {
        CreateOrderRequest {
            customer_email: "test@example.com".to_string(),
            product_id: "prod-42".to_string(),
            amount: 100.0,
            currency: "USD".to_string(),
        }
    }

    #[tokio::test]
    async fn create_and_read_back() {
        let store = OrderStore::open(db::connect_in_memory().await.unwrap())
            .await
            .unwrap();

        let created = store.create(&request()).await.unwrap();
        assert_eq!(created.status, "pending");
        assert!(Uuid::parse_str(&created.id).is_ok());

        let fetched = store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.customer_email, created.customer_email);
        // Stored at microsecond precision.
        assert!((fetched.created_at - created.created_at).num_milliseconds().abs() < 1);
    }

    #[tokio::test]
    async fn unknown_id_is_none() {
        let store = OrderStore::open(db::connect_in_memory().await.unwrap())
            .await
            .unwrap();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_field_fails_validation() {
        let store = OrderStore::open(db::connect_in_memory().await.unwrap())
            .await
            .unwrap();

        let mut bad = request();
        bad.customer_email = String::new();
        let err = store.create(&bad).await.unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
    }

    #[tokio::test]
    async fn non_positive_amount_fails_validation() {
        let mut bad = request();
        bad.amount = 0.0;
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn count_tracks_inserts() {
        let store = OrderStore::open(db::connect_in_memory().await.unwrap())
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        store.create(&request()).await.unwrap();
        store.create(&request()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }
}
