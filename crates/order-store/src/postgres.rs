use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{MessageId, OrderId};
use domain::{Order, OrderChanges, OrderStatus, OutboxMessage, Quantity, Sku};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{AfterInsert, OrderStore, Result, StoreError};

const ORDER_COLUMNS: &str = "id, sku, quantity, status, expires_at, created_at, updated_at";
const OUTBOX_COLUMNS: &str =
    "id, type, payload, status, attempts, last_error, order_id, created_at";

/// PostgreSQL-backed order store implementation.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let sku: String = row.try_get("sku")?;
        let quantity: i32 = row.try_get("quantity")?;
        let status: String = row.try_get("status")?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            sku: Sku::parse(sku)?,
            quantity: Quantity::new(i64::from(quantity))?,
            status: status.parse()?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_outbox(row: PgRow) -> Result<OutboxMessage> {
        let status: String = row.try_get("status")?;
        let attempts: i32 = row.try_get("attempts")?;

        Ok(OutboxMessage {
            id: MessageId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("type")?,
            payload: row.try_get("payload")?,
            status: status.parse()?,
            attempts: u32::try_from(attempts).unwrap_or_default(),
            last_error: row.try_get("last_error")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        })
    }
}

fn status_names(statuses: &[OrderStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn quantity_column(quantity: Quantity) -> i32 {
    // Quantity::new caps values at i32::MAX.
    i32::try_from(quantity.get()).unwrap_or(i32::MAX)
}

async fn insert_order(conn: &mut PgConnection, order: &Order) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO orders (id, sku, quantity, status, expires_at, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(order.id.as_uuid())
    .bind(order.sku.as_str())
    .bind(quantity_column(order.quantity))
    .bind(order.status.as_str())
    .bind(order.expires_at)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(conn)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(ref db_err) = e
            && db_err.is_unique_violation()
        {
            return StoreError::DuplicateOrder(order.id);
        }
        StoreError::Database(e)
    })?;
    Ok(())
}

async fn insert_outbox(conn: &mut PgConnection, message: &OutboxMessage) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO outbox_messages (id, type, payload, status, attempts, last_error, order_id, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(message.id.as_uuid())
    .bind(&message.event_type)
    .bind(&message.payload)
    .bind(message.status.as_str())
    .bind(i32::try_from(message.attempts).unwrap_or(i32::MAX))
    .bind(&message.last_error)
    .bind(message.order_id.as_uuid())
    .bind(message.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn create_order(&self, order: &Order, outbox: Option<&OutboxMessage>) -> Result<()> {
        if let Some(message) = outbox.filter(|m| m.order_id != order.id) {
            return Err(StoreError::OrphanOutboxMessage(message.order_id));
        }

        let mut tx = self.pool.begin().await?;
        insert_order(&mut tx, order).await?;
        if let Some(message) = outbox {
            insert_outbox(&mut tx, message).await?;
        }
        tx.commit().await?;

        tracing::debug!(order_id = %order.id, with_outbox = outbox.is_some(), "Order row written");
        Ok(())
    }

    async fn create_order_with<'a>(
        &'a self,
        order: &'a Order,
        after_insert: AfterInsert<'a>,
    ) -> Result<Option<OutboxMessage>> {
        let mut tx = self.pool.begin().await?;
        insert_order(&mut tx, order).await?;

        let outbox = after_insert.await;
        if let Some(message) = &outbox {
            if message.order_id != order.id {
                return Err(StoreError::OrphanOutboxMessage(message.order_id));
            }
            insert_outbox(&mut tx, message).await?;
        }
        tx.commit().await?;

        tracing::debug!(order_id = %order.id, with_outbox = outbox.is_some(), "Order row written");
        Ok(outbox)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {ORDER_COLUMNS} FROM orders WHERE status = $1 ORDER BY created_at ASC, id ASC"
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at ASC, id ASC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn transition(
        &self,
        id: OrderId,
        from: &[OrderStatus],
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE orders
            SET status = $1,
                expires_at = CASE WHEN $1 = 'PENDING' THEN expires_at ELSE NULL END,
                updated_at = $2
            WHERE id = $3 AND status = ANY($4)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(to.as_str())
        .bind(at)
        .bind(id.as_uuid())
        .bind(status_names(from))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn update_order(
        &self,
        id: OrderId,
        from: &[OrderStatus],
        changes: &OrderChanges,
        at: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE orders
            SET sku = COALESCE($1, sku),
                quantity = COALESCE($2, quantity),
                updated_at = $3
            WHERE id = $4 AND status = ANY($5)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(changes.sku.as_ref().map(|s| s.as_str().to_string()))
        .bind(changes.quantity.map(quantity_column))
        .bind(at)
        .bind(id.as_uuid())
        .bind(status_names(from))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn delete_order(&self, id: OrderId, from: &[OrderStatus]) -> Result<bool> {
        // outbox_messages rows go with the order via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM orders WHERE id = $1 AND status = ANY($2)")
            .bind(id.as_uuid())
            .bind(status_names(from))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE status = 'PENDING' AND expires_at < $1
            ORDER BY expires_at ASC
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn pending_outbox(&self, limit: usize, max_attempts: u32) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {OUTBOX_COLUMNS}
            FROM outbox_messages
            WHERE status = 'pending' AND attempts < $1
            ORDER BY seq ASC
            LIMIT $2
            "#
        ))
        .bind(i32::try_from(max_attempts).unwrap_or(i32::MAX))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_outbox).collect()
    }

    async fn mark_outbox_processed(&self, id: MessageId) -> Result<()> {
        sqlx::query(
            "UPDATE outbox_messages SET status = 'processed' WHERE id = $1 AND status = 'pending'",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_outbox_failure(
        &self,
        id: MessageId,
        error: &str,
        max_attempts: u32,
    ) -> Result<Option<OutboxMessage>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE outbox_messages
            SET attempts = LEAST(attempts + 1, $1),
                last_error = $2,
                status = CASE WHEN attempts + 1 >= $1 THEN 'failed' ELSE 'pending' END
            WHERE id = $3 AND status = 'pending'
            RETURNING {OUTBOX_COLUMNS}
            "#
        ))
        .bind(i32::try_from(max_attempts).unwrap_or(i32::MAX))
        .bind(error)
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_outbox).transpose()
    }

    async fn outbox_for_order(&self, order_id: OrderId) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_messages WHERE order_id = $1 ORDER BY seq ASC"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_outbox).collect()
    }
}

