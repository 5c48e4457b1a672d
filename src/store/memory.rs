//! In-memory store.
//!
//! A unit of work holds the store-wide lock for its whole lifetime and works on
//! a copy of the tables; committing swaps the copy in. Units of work are
//! therefore fully serialised, which gives the same no-oversell guarantee as the
//! conditional `UPDATE` of the PostgreSQL store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::aggregates::{Cart, CartItem, Order, OrderItem, ReturnItem, ReturnRequest, StockMovement, User, VariantView};
use crate::domain::value_objects::{Money, PhoneNumber, Quantity, Sku, SkuError};
use super::{OrderFilter, ReturnFilter, Store, StoreError, StoreResult, UnitOfWork};

#[derive(Clone, Debug)]
struct CartRecord { id: Uuid, user_id: Uuid, created_at: DateTime<Utc>, updated_at: DateTime<Utc> }

#[derive(Clone, Debug)]
struct ReturnRecord { id: Uuid, order_id: Uuid, user_id: Uuid, reason: String, created_at: DateTime<Utc> }

#[derive(Clone, Debug, Default)]
struct Tables {
    variants: HashMap<Uuid, VariantView>,
    users: Vec<User>,
    carts: Vec<CartRecord>,
    cart_items: Vec<CartItem>,
    orders: Vec<Order>,
    order_items: Vec<OrderItem>,
    movements: Vec<StockMovement>,
    returns: Vec<ReturnRecord>,
    return_items: Vec<ReturnItem>,
}

impl Tables {
    fn variants(&self, ids: &[Uuid]) -> Vec<VariantView> {
        let mut found: Vec<VariantView> = ids.iter().filter_map(|id| self.variants.get(id).cloned()).collect();
        found.sort_by_key(|v| v.id);
        found.dedup_by_key(|v| v.id);
        found
    }

    fn cart(&self, user_id: Uuid) -> Option<Cart> {
        let record = self.carts.iter().find(|c| c.user_id == user_id)?;
        let items = self.cart_items.iter().filter(|i| i.cart_id == record.id).cloned().collect();
        Some(Cart::restore(record.id, record.user_id, items, record.created_at, record.updated_at))
    }

    fn return_request(&self, record: &ReturnRecord) -> ReturnRequest {
        let items = self.return_items.iter().filter(|i| i.return_id == record.id).cloned().collect();
        ReturnRequest::restore(record.id, record.order_id, record.user_id, record.reason.clone(), record.created_at, items)
    }

    fn order_items(&self, order_ids: &[Uuid]) -> Vec<OrderItem> {
        self.order_items.iter().filter(|i| order_ids.contains(&i.order_id)).cloned().collect()
    }
}

/// Catalog row used to seed the in-memory store.
#[derive(Clone, Debug)]
pub struct NewVariant {
    pub sku: String,
    pub product_name: String,
    pub price: Decimal,
    pub size: String,
    pub category: Option<String>,
    pub stock: i32,
}

#[derive(Clone, Default)]
pub struct MemoryStore { tables: Arc<Mutex<Tables>> }

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub async fn seed_variant(&self, new: NewVariant) -> Result<VariantView, SkuError> {
        let variant = VariantView {
            id: Uuid::now_v7(), sku: Sku::new(new.sku)?, stock: new.stock.max(0), product_id: Uuid::now_v7(),
            product_name: new.product_name, price: Money::new(new.price), size: new.size, category: new.category,
        };
        self.tables.lock().await.variants.insert(variant.id, variant.clone());
        Ok(variant)
    }

    pub async fn seed_user(&self, user: User) {
        self.tables.lock().await.users.push(user);
    }

    pub async fn user_by_phone(&self, phone: &PhoneNumber) -> Option<User> {
        self.tables.lock().await.users.iter().find(|u| u.phone_number.as_ref() == Some(phone)).cloned()
    }

    pub async fn user_count(&self) -> usize { self.tables.lock().await.users.len() }

    pub async fn stock_of(&self, variant_id: Uuid) -> Option<i32> {
        self.tables.lock().await.variants.get(&variant_id).map(|v| v.stock)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, working }))
    }

    async fn find_variants(&self, ids: &[Uuid]) -> StoreResult<Vec<VariantView>> {
        Ok(self.tables.lock().await.variants(ids))
    }

    async fn find_orders(&self, filter: OrderFilter) -> StoreResult<Vec<Order>> {
        let tables = self.tables.lock().await;
        let mut orders: Vec<Order> = tables.orders.iter().rev()
            .filter(|o| filter.user_id.map_or(true, |u| o.user_id() == u))
            .filter(|o| filter.order_id.map_or(true, |id| o.id() == id))
            .cloned().collect();
        orders.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(orders)
    }

    async fn find_order_items(&self, order_ids: &[Uuid]) -> StoreResult<Vec<OrderItem>> {
        Ok(self.tables.lock().await.order_items(order_ids))
    }

    async fn find_cart(&self, user_id: Uuid) -> StoreResult<Option<Cart>> {
        Ok(self.tables.lock().await.cart(user_id))
    }

    async fn find_returns(&self, filter: ReturnFilter) -> StoreResult<Vec<ReturnRequest>> {
        let tables = self.tables.lock().await;
        let mut returns: Vec<ReturnRequest> = tables.returns.iter().rev()
            .filter(|r| filter.user_id.map_or(true, |u| r.user_id == u))
            .filter(|r| filter.return_id.map_or(true, |id| r.id == id))
            .map(|r| tables.return_request(r))
            .collect();
        returns.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(returns)
    }

    async fn list_movements(&self, variant_id: Uuid) -> StoreResult<Vec<StockMovement>> {
        let tables = self.tables.lock().await;
        Ok(tables.movements.iter().rev().filter(|m| m.variant_id == variant_id).cloned().collect())
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn load_cart(&mut self, user_id: Uuid) -> StoreResult<Option<Cart>> {
        Ok(self.working.cart(user_id))
    }

    async fn create_cart(&mut self, cart: &Cart) -> StoreResult<()> {
        self.working.carts.push(CartRecord { id: cart.id(), user_id: cart.user_id(), created_at: cart.created_at(), updated_at: cart.updated_at() });
        Ok(())
    }

    async fn save_cart_item(&mut self, item: &CartItem) -> StoreResult<()> {
        match self.working.cart_items.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => existing.quantity = item.quantity,
            None => self.working.cart_items.push(item.clone()),
        }
        Ok(())
    }

    async fn delete_cart_item(&mut self, item_id: Uuid) -> StoreResult<()> {
        self.working.cart_items.retain(|i| i.id != item_id);
        Ok(())
    }

    async fn clear_cart(&mut self, cart_id: Uuid) -> StoreResult<u64> {
        let before = self.working.cart_items.len();
        self.working.cart_items.retain(|i| i.cart_id != cart_id);
        Ok((before - self.working.cart_items.len()) as u64)
    }

    async fn find_variants(&mut self, ids: &[Uuid]) -> StoreResult<Vec<VariantView>> {
        Ok(self.working.variants(ids))
    }

    async fn upsert_guest_user(&mut self, guest: &User) -> StoreResult<User> {
        if let Some(existing) = self.working.users.iter().find(|u| u.phone_number.is_some() && u.phone_number == guest.phone_number) {
            return Ok(existing.clone());
        }
        self.working.users.push(guest.clone());
        Ok(guest.clone())
    }

    async fn decrement_stock(&mut self, variant_id: Uuid, quantity: Quantity) -> StoreResult<bool> {
        match self.working.variants.get_mut(&variant_id) {
            Some(v) if v.stock >= quantity.value() => { v.stock -= quantity.value(); Ok(true) }
            _ => Ok(false),
        }
    }

    async fn increment_stock(&mut self, variant_id: Uuid, quantity: Quantity) -> StoreResult<()> {
        let variant = self.working.variants.get_mut(&variant_id).ok_or_else(|| StoreError::Corrupt(format!("variant {} does not exist", variant_id)))?;
        variant.stock += quantity.value();
        Ok(())
    }

    async fn append_movement(&mut self, movement: &StockMovement) -> StoreResult<()> {
        self.working.movements.push(movement.clone());
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order, items: &[OrderItem]) -> StoreResult<()> {
        if self.working.orders.iter().any(|o| o.order_number() == order.order_number()) {
            return Err(StoreError::DuplicateOrderNumber(order.order_number().to_string()));
        }
        let mut stored = order.clone();
        stored.take_events();
        self.working.orders.push(stored);
        self.working.order_items.extend_from_slice(items);
        Ok(())
    }

    async fn lock_order(&mut self, order_id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.working.orders.iter().find(|o| o.id() == order_id).cloned())
    }

    async fn order_items(&mut self, order_id: Uuid) -> StoreResult<Vec<OrderItem>> {
        Ok(self.working.order_items(&[order_id]))
    }

    async fn update_order_status(&mut self, order: &Order) -> StoreResult<()> {
        let stored = self.working.orders.iter_mut().find(|o| o.id() == order.id()).ok_or_else(|| StoreError::Corrupt(format!("order {} does not exist", order.id())))?;
        *stored = order.clone();
        stored.take_events();
        Ok(())
    }

    async fn returned_quantities(&mut self, order_id: Uuid) -> StoreResult<HashMap<Uuid, i32>> {
        let return_ids: Vec<Uuid> = self.working.returns.iter().filter(|r| r.order_id == order_id).map(|r| r.id).collect();
        let mut held = HashMap::new();
        for item in self.working.return_items.iter().filter(|i| return_ids.contains(&i.return_id) && i.status.holds_quantity()) {
            *held.entry(item.order_item_id).or_insert(0) += item.quantity.value();
        }
        Ok(held)
    }

    async fn insert_return(&mut self, request: &ReturnRequest) -> StoreResult<()> {
        self.working.returns.push(ReturnRecord {
            id: request.id(), order_id: request.order_id(), user_id: request.user_id(), reason: request.reason().to_string(), created_at: request.created_at(),
        });
        self.working.return_items.extend_from_slice(request.items());
        Ok(())
    }

    async fn lock_return_by_item(&mut self, item_id: Uuid) -> StoreResult<Option<ReturnRequest>> {
        let Some(return_id) = self.working.return_items.iter().find(|i| i.id == item_id).map(|i| i.return_id) else { return Ok(None) };
        Ok(self.working.returns.iter().find(|r| r.id == return_id).map(|r| self.working.return_request(r)))
    }

    async fn update_return_item(&mut self, request: &ReturnRequest, item_id: Uuid) -> StoreResult<()> {
        let updated = request.item(item_id).ok_or_else(|| StoreError::Corrupt(format!("return item {} not in return {}", item_id, request.id())))?;
        let stored = self.working.return_items.iter_mut().find(|i| i.id == item_id).ok_or_else(|| StoreError::Corrupt(format!("return item {} does not exist", item_id)))?;
        *stored = updated.clone();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
