//! PostgreSQL store backed by sqlx.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::domain::aggregates::{
    Cart, CartItem, MovementType, Order, OrderItem, ReturnItem, ReturnRequest, StockMovement, User, VariantView,
};
use crate::domain::value_objects::{Money, PhoneNumber, Quantity, Sku};
use super::{OrderFilter, ReturnFilter, Store, StoreError, StoreResult, UnitOfWork};

const VARIANT_COLUMNS: &str = "SELECT v.id, v.sku, v.stock, v.product_id, p.name AS product_name, p.price, s.label AS size, c.name AS category \
    FROM variants v JOIN products p ON p.id = v.product_id JOIN sizes s ON s.id = v.size_id LEFT JOIN categories c ON c.id = p.category_id";
const ORDER_COLUMNS: &str = "SELECT id, order_number, user_id, status, total_amount, address, phone_number, notes, created_at, updated_at FROM orders";
const ORDER_ITEM_COLUMNS: &str = "SELECT id, order_id, variant_id, quantity, unit_price, total_price, personalization_id FROM order_items";
const RETURN_ITEM_COLUMNS: &str = "SELECT id, return_id, order_item_id, variant_id, quantity, status, updated_at FROM return_items";

#[derive(sqlx::FromRow)]
struct VariantRow { id: Uuid, sku: String, stock: i32, product_id: Uuid, product_name: String, price: Decimal, size: String, category: Option<String> }

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid, order_number: String, user_id: Uuid, status: String, total_amount: Decimal, address: String,
    phone_number: String, notes: Option<String>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow { id: Uuid, order_id: Uuid, variant_id: Uuid, quantity: i32, unit_price: Decimal, total_price: Decimal, personalization_id: Option<Uuid> }

#[derive(sqlx::FromRow)]
struct CartRow { id: Uuid, user_id: Uuid, created_at: DateTime<Utc>, updated_at: DateTime<Utc> }

#[derive(sqlx::FromRow)]
struct CartItemRow { id: Uuid, cart_id: Uuid, variant_id: Uuid, quantity: i32, personalization_id: Option<Uuid>, created_at: DateTime<Utc> }

#[derive(sqlx::FromRow)]
struct UserRow { id: Uuid, first_name: String, last_name: String, email: Option<String>, phone_number: Option<String>, role: String, created_at: DateTime<Utc> }

#[derive(sqlx::FromRow)]
struct MovementRow { id: Uuid, variant_id: Uuid, quantity: i32, movement_type: String, reason: String, created_at: DateTime<Utc> }

#[derive(sqlx::FromRow)]
struct ReturnRow { id: Uuid, order_id: Uuid, user_id: Uuid, reason: String, created_at: DateTime<Utc> }

#[derive(sqlx::FromRow)]
struct ReturnItemRow { id: Uuid, return_id: Uuid, order_item_id: Uuid, variant_id: Uuid, quantity: i32, status: String, updated_at: DateTime<Utc> }

fn corrupt(e: impl std::fmt::Display) -> StoreError { StoreError::Corrupt(e.to_string()) }

fn quantity(value: i32) -> StoreResult<Quantity> { Quantity::new(value).map_err(corrupt) }

impl TryFrom<VariantRow> for VariantView {
    type Error = StoreError;
    fn try_from(r: VariantRow) -> StoreResult<Self> {
        Ok(Self {
            id: r.id, sku: Sku::new(r.sku).map_err(corrupt)?, stock: r.stock, product_id: r.product_id,
            product_name: r.product_name, price: Money::new(r.price), size: r.size, category: r.category,
        })
    }
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;
    fn try_from(r: OrderRow) -> StoreResult<Self> {
        Ok(Order::restore(
            r.id, r.order_number, r.user_id, r.status.parse().map_err(corrupt)?, Money::new(r.total_amount),
            r.address, r.phone_number, r.notes, r.created_at, r.updated_at,
        ))
    }
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = StoreError;
    fn try_from(r: OrderItemRow) -> StoreResult<Self> {
        Ok(Self {
            id: r.id, order_id: r.order_id, variant_id: r.variant_id, quantity: quantity(r.quantity)?,
            unit_price: Money::new(r.unit_price), total_price: Money::new(r.total_price), personalization_id: r.personalization_id,
        })
    }
}

impl TryFrom<CartItemRow> for CartItem {
    type Error = StoreError;
    fn try_from(r: CartItemRow) -> StoreResult<Self> {
        Ok(Self { id: r.id, cart_id: r.cart_id, variant_id: r.variant_id, quantity: quantity(r.quantity)?, personalization_id: r.personalization_id, created_at: r.created_at })
    }
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;
    fn try_from(r: UserRow) -> StoreResult<Self> {
        Ok(Self {
            id: r.id, first_name: r.first_name, last_name: r.last_name, email: r.email,
            phone_number: r.phone_number.map(PhoneNumber::new).transpose().map_err(corrupt)?,
            role: r.role.parse().map_err(corrupt)?, created_at: r.created_at,
        })
    }
}

impl TryFrom<MovementRow> for StockMovement {
    type Error = StoreError;
    fn try_from(r: MovementRow) -> StoreResult<Self> {
        Ok(Self {
            id: r.id, variant_id: r.variant_id, quantity: quantity(r.quantity)?,
            movement_type: r.movement_type.parse::<MovementType>().map_err(corrupt)?, reason: r.reason, created_at: r.created_at,
        })
    }
}

impl TryFrom<ReturnItemRow> for ReturnItem {
    type Error = StoreError;
    fn try_from(r: ReturnItemRow) -> StoreResult<Self> {
        Ok(Self {
            id: r.id, return_id: r.return_id, order_item_id: r.order_item_id, variant_id: r.variant_id,
            quantity: quantity(r.quantity)?, status: r.status.parse().map_err(corrupt)?, updated_at: r.updated_at,
        })
    }
}

fn convert<R, T: TryFrom<R, Error = StoreError>>(rows: Vec<R>) -> StoreResult<Vec<T>> {
    rows.into_iter().map(T::try_from).collect()
}

async fn fetch_variants(conn: &mut PgConnection, ids: &[Uuid]) -> StoreResult<Vec<VariantView>> {
    let rows = sqlx::query_as::<_, VariantRow>(&format!("{} WHERE v.id = ANY($1)", VARIANT_COLUMNS))
        .bind(ids).fetch_all(&mut *conn).await?;
    convert(rows)
}

async fn fetch_order_items(conn: &mut PgConnection, order_ids: &[Uuid]) -> StoreResult<Vec<OrderItem>> {
    let rows = sqlx::query_as::<_, OrderItemRow>(&format!("{} WHERE order_id = ANY($1) ORDER BY order_id, id", ORDER_ITEM_COLUMNS))
        .bind(order_ids).fetch_all(&mut *conn).await?;
    convert(rows)
}

async fn fetch_cart(conn: &mut PgConnection, user_id: Uuid, for_update: bool) -> StoreResult<Option<Cart>> {
    let sql = if for_update { "SELECT id, user_id, created_at, updated_at FROM carts WHERE user_id = $1 FOR UPDATE" }
              else { "SELECT id, user_id, created_at, updated_at FROM carts WHERE user_id = $1" };
    let Some(cart) = sqlx::query_as::<_, CartRow>(sql).bind(user_id).fetch_optional(&mut *conn).await? else { return Ok(None) };
    let rows = sqlx::query_as::<_, CartItemRow>("SELECT id, cart_id, variant_id, quantity, personalization_id, created_at FROM cart_items WHERE cart_id = $1 ORDER BY created_at, id")
        .bind(cart.id).fetch_all(&mut *conn).await?;
    Ok(Some(Cart::restore(cart.id, cart.user_id, convert(rows)?, cart.created_at, cart.updated_at)))
}

async fn fetch_returns(conn: &mut PgConnection, rows: Vec<ReturnRow>) -> StoreResult<Vec<ReturnRequest>> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let item_rows = sqlx::query_as::<_, ReturnItemRow>(&format!("{} WHERE return_id = ANY($1) ORDER BY id", RETURN_ITEM_COLUMNS))
        .bind(&ids).fetch_all(&mut *conn).await?;
    let mut items: Vec<ReturnItem> = convert(item_rows)?;
    Ok(rows.into_iter().map(|r| {
        let (mine, rest): (Vec<ReturnItem>, Vec<ReturnItem>) = std::mem::take(&mut items).into_iter().partition(|i| i.return_id == r.id);
        items = rest;
        ReturnRequest::restore(r.id, r.order_id, r.user_id, r.reason, r.created_at, mine)
    }).collect())
}

fn order_insert_error(e: sqlx::Error, order_number: &str) -> StoreError {
    let duplicate = matches!(&e, sqlx::Error::Database(db) if db.constraint() == Some("orders_order_number_key"));
    if duplicate { StoreError::DuplicateOrderNumber(order_number.to_string()) } else { StoreError::Database(e) }
}

#[derive(Clone)]
pub struct PgStore { pool: PgPool }

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(PgUnitOfWork { tx: self.pool.begin().await? }))
    }

    async fn find_variants(&self, ids: &[Uuid]) -> StoreResult<Vec<VariantView>> {
        let mut conn = self.pool.acquire().await?;
        fetch_variants(&mut conn, ids).await
    }

    async fn find_orders(&self, filter: OrderFilter) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!("{} WHERE ($1::uuid IS NULL OR user_id = $1) AND ($2::uuid IS NULL OR id = $2) ORDER BY created_at DESC", ORDER_COLUMNS))
            .bind(filter.user_id).bind(filter.order_id).fetch_all(&self.pool).await?;
        convert(rows)
    }

    async fn find_order_items(&self, order_ids: &[Uuid]) -> StoreResult<Vec<OrderItem>> {
        let mut conn = self.pool.acquire().await?;
        fetch_order_items(&mut conn, order_ids).await
    }

    async fn find_cart(&self, user_id: Uuid) -> StoreResult<Option<Cart>> {
        let mut conn = self.pool.acquire().await?;
        fetch_cart(&mut conn, user_id, false).await
    }

    async fn find_returns(&self, filter: ReturnFilter) -> StoreResult<Vec<ReturnRequest>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, ReturnRow>("SELECT id, order_id, user_id, reason, created_at FROM return_requests WHERE ($1::uuid IS NULL OR user_id = $1) AND ($2::uuid IS NULL OR id = $2) ORDER BY created_at DESC")
            .bind(filter.user_id).bind(filter.return_id).fetch_all(&mut *conn).await?;
        fetch_returns(&mut conn, rows).await
    }

    async fn list_movements(&self, variant_id: Uuid) -> StoreResult<Vec<StockMovement>> {
        let rows = sqlx::query_as::<_, MovementRow>("SELECT id, variant_id, quantity, movement_type, reason, created_at FROM stock_movements WHERE variant_id = $1 ORDER BY created_at DESC, id DESC")
            .bind(variant_id).fetch_all(&self.pool).await?;
        convert(rows)
    }
}

/// One database transaction. Dropping it without commit rolls back.
pub struct PgUnitOfWork { tx: Transaction<'static, Postgres> }

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn load_cart(&mut self, user_id: Uuid) -> StoreResult<Option<Cart>> {
        fetch_cart(&mut self.tx, user_id, true).await
    }

    async fn create_cart(&mut self, cart: &Cart) -> StoreResult<()> {
        sqlx::query("INSERT INTO carts (id, user_id, created_at, updated_at) VALUES ($1, $2, $3, $4)")
            .bind(cart.id()).bind(cart.user_id()).bind(cart.created_at()).bind(cart.updated_at())
            .execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn save_cart_item(&mut self, item: &CartItem) -> StoreResult<()> {
        sqlx::query("INSERT INTO cart_items (id, cart_id, variant_id, quantity, personalization_id, created_at) VALUES ($1, $2, $3, $4, $5, $6) \
                     ON CONFLICT (id) DO UPDATE SET quantity = EXCLUDED.quantity")
            .bind(item.id).bind(item.cart_id).bind(item.variant_id).bind(item.quantity.value()).bind(item.personalization_id).bind(item.created_at)
            .execute(&mut *self.tx).await?;
        sqlx::query("UPDATE carts SET updated_at = NOW() WHERE id = $1").bind(item.cart_id).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn delete_cart_item(&mut self, item_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM cart_items WHERE id = $1").bind(item_id).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn clear_cart(&mut self, cart_id: Uuid) -> StoreResult<u64> {
        let done = sqlx::query("DELETE FROM cart_items WHERE cart_id = $1").bind(cart_id).execute(&mut *self.tx).await?;
        Ok(done.rows_affected())
    }

    async fn find_variants(&mut self, ids: &[Uuid]) -> StoreResult<Vec<VariantView>> {
        fetch_variants(&mut self.tx, ids).await
    }

    async fn upsert_guest_user(&mut self, guest: &User) -> StoreResult<User> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (id, first_name, last_name, phone_number, role, created_at) VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (phone_number) DO UPDATE SET phone_number = EXCLUDED.phone_number \
             RETURNING id, first_name, last_name, email, phone_number, role, created_at")
            .bind(guest.id).bind(&guest.first_name).bind(&guest.last_name).bind(guest.phone_number.as_ref().map(|p| p.as_str()))
            .bind(guest.role.as_str()).bind(guest.created_at)
            .fetch_one(&mut *self.tx).await?;
        User::try_from(row)
    }

    async fn decrement_stock(&mut self, variant_id: Uuid, quantity: Quantity) -> StoreResult<bool> {
        let done = sqlx::query("UPDATE variants SET stock = stock - $2, updated_at = NOW() WHERE id = $1 AND stock >= $2")
            .bind(variant_id).bind(quantity.value()).execute(&mut *self.tx).await?;
        debug!(%variant_id, quantity = quantity.value(), rows = done.rows_affected(), "conditional decrement");
        Ok(done.rows_affected() == 1)
    }

    async fn increment_stock(&mut self, variant_id: Uuid, quantity: Quantity) -> StoreResult<()> {
        let done = sqlx::query("UPDATE variants SET stock = stock + $2, updated_at = NOW() WHERE id = $1")
            .bind(variant_id).bind(quantity.value()).execute(&mut *self.tx).await?;
        if done.rows_affected() == 0 { return Err(StoreError::Corrupt(format!("variant {} does not exist", variant_id))); }
        Ok(())
    }

    async fn append_movement(&mut self, m: &StockMovement) -> StoreResult<()> {
        sqlx::query("INSERT INTO stock_movements (id, variant_id, quantity, movement_type, reason, created_at) VALUES ($1, $2, $3, $4, $5, $6)")
            .bind(m.id).bind(m.variant_id).bind(m.quantity.value()).bind(m.movement_type.as_str()).bind(&m.reason).bind(m.created_at)
            .execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order, items: &[OrderItem]) -> StoreResult<()> {
        sqlx::query("INSERT INTO orders (id, order_number, user_id, status, total_amount, address, phone_number, notes, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)")
            .bind(order.id()).bind(order.order_number()).bind(order.user_id()).bind(order.status().as_str()).bind(order.total_amount().amount())
            .bind(order.address()).bind(order.phone_number()).bind(order.notes()).bind(order.created_at()).bind(order.updated_at())
            .execute(&mut *self.tx).await
            .map_err(|e| order_insert_error(e, order.order_number()))?;
        for item in items {
            sqlx::query("INSERT INTO order_items (id, order_id, variant_id, quantity, unit_price, total_price, personalization_id) VALUES ($1, $2, $3, $4, $5, $6, $7)")
                .bind(item.id).bind(item.order_id).bind(item.variant_id).bind(item.quantity.value())
                .bind(item.unit_price.amount()).bind(item.total_price.amount()).bind(item.personalization_id)
                .execute(&mut *self.tx).await?;
        }
        Ok(())
    }

    async fn lock_order(&mut self, order_id: Uuid) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("{} WHERE id = $1 FOR UPDATE", ORDER_COLUMNS))
            .bind(order_id).fetch_optional(&mut *self.tx).await?;
        row.map(Order::try_from).transpose()
    }

    async fn order_items(&mut self, order_id: Uuid) -> StoreResult<Vec<OrderItem>> {
        fetch_order_items(&mut self.tx, &[order_id]).await
    }

    async fn update_order_status(&mut self, order: &Order) -> StoreResult<()> {
        sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(order.id()).bind(order.status().as_str()).bind(order.updated_at())
            .execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn returned_quantities(&mut self, order_id: Uuid) -> StoreResult<HashMap<Uuid, i32>> {
        let rows = sqlx::query_as::<_, (Uuid, i32)>(
            "SELECT ri.order_item_id, SUM(ri.quantity)::INT4 FROM return_items ri JOIN return_requests rr ON rr.id = ri.return_id \
             WHERE rr.order_id = $1 AND ri.status <> 'REFUSE' GROUP BY ri.order_item_id")
            .bind(order_id).fetch_all(&mut *self.tx).await?;
        Ok(rows.into_iter().collect())
    }

    async fn insert_return(&mut self, request: &ReturnRequest) -> StoreResult<()> {
        sqlx::query("INSERT INTO return_requests (id, order_id, user_id, reason, created_at) VALUES ($1, $2, $3, $4, $5)")
            .bind(request.id()).bind(request.order_id()).bind(request.user_id()).bind(request.reason()).bind(request.created_at())
            .execute(&mut *self.tx).await?;
        for item in request.items() {
            sqlx::query("INSERT INTO return_items (id, return_id, order_item_id, variant_id, quantity, status, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7)")
                .bind(item.id).bind(item.return_id).bind(item.order_item_id).bind(item.variant_id)
                .bind(item.quantity.value()).bind(item.status.as_str()).bind(item.updated_at)
                .execute(&mut *self.tx).await?;
        }
        Ok(())
    }

    async fn lock_return_by_item(&mut self, item_id: Uuid) -> StoreResult<Option<ReturnRequest>> {
        let Some((return_id,)) = sqlx::query_as::<_, (Uuid,)>("SELECT return_id FROM return_items WHERE id = $1 FOR UPDATE")
            .bind(item_id).fetch_optional(&mut *self.tx).await? else { return Ok(None) };
        let rows = sqlx::query_as::<_, ReturnRow>("SELECT id, order_id, user_id, reason, created_at FROM return_requests WHERE id = $1")
            .bind(return_id).fetch_all(&mut *self.tx).await?;
        Ok(fetch_returns(&mut self.tx, rows).await?.pop())
    }

    async fn update_return_item(&mut self, request: &ReturnRequest, item_id: Uuid) -> StoreResult<()> {
        let item = request.item(item_id).ok_or_else(|| StoreError::Corrupt(format!("return item {} not in return {}", item_id, request.id())))?;
        sqlx::query("UPDATE return_items SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(item.id).bind(item.status.as_str()).bind(item.updated_at)
            .execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
