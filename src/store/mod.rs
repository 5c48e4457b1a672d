//! Persistence seams for the order core.
//!
//! [`Store`] serves plain reads. Anything that mutates stock, orders, carts or
//! returns goes through a [`UnitOfWork`] obtained from [`Store::begin`]: its
//! writes become visible only on [`UnitOfWork::commit`], and dropping it without
//! committing discards every write made through it.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{Cart, CartItem, Order, OrderItem, ReturnRequest, StockMovement, User, VariantView};
use crate::domain::value_objects::Quantity;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryStore, NewVariant};
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("order number {0} is already taken")]
    DuplicateOrderNumber(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Clone, Copy, Debug, Default)]
pub struct OrderFilter { pub user_id: Option<Uuid>, pub order_id: Option<Uuid> }

#[derive(Clone, Copy, Debug, Default)]
pub struct ReturnFilter { pub user_id: Option<Uuid>, pub return_id: Option<Uuid> }

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;

    /// Variants with product, size and category resolved. Unknown ids are skipped.
    async fn find_variants(&self, ids: &[Uuid]) -> StoreResult<Vec<VariantView>>;

    /// Newest first.
    async fn find_orders(&self, filter: OrderFilter) -> StoreResult<Vec<Order>>;

    async fn find_order_items(&self, order_ids: &[Uuid]) -> StoreResult<Vec<OrderItem>>;

    async fn find_cart(&self, user_id: Uuid) -> StoreResult<Option<Cart>>;

    /// Newest first.
    async fn find_returns(&self, filter: ReturnFilter) -> StoreResult<Vec<ReturnRequest>>;

    /// Ledger of one variant, newest first.
    async fn list_movements(&self, variant_id: Uuid) -> StoreResult<Vec<StockMovement>>;
}

#[async_trait]
pub trait UnitOfWork: Send {
    /// Loads and locks the user's cart.
    async fn load_cart(&mut self, user_id: Uuid) -> StoreResult<Option<Cart>>;
    async fn create_cart(&mut self, cart: &Cart) -> StoreResult<()>;
    /// Inserts the line or overwrites the quantity of an existing one.
    async fn save_cart_item(&mut self, item: &CartItem) -> StoreResult<()>;
    async fn delete_cart_item(&mut self, item_id: Uuid) -> StoreResult<()>;
    async fn clear_cart(&mut self, cart_id: Uuid) -> StoreResult<u64>;

    async fn find_variants(&mut self, ids: &[Uuid]) -> StoreResult<Vec<VariantView>>;

    /// Returns the user holding the guest's phone number, creating `guest` if none does.
    async fn upsert_guest_user(&mut self, guest: &User) -> StoreResult<User>;

    /// Atomic check-and-decrement: takes `quantity` off the variant's stock only
    /// if at least that much is on hand. Returns false when nothing was changed.
    async fn decrement_stock(&mut self, variant_id: Uuid, quantity: Quantity) -> StoreResult<bool>;
    async fn increment_stock(&mut self, variant_id: Uuid, quantity: Quantity) -> StoreResult<()>;
    async fn append_movement(&mut self, movement: &StockMovement) -> StoreResult<()>;

    /// Fails with [`StoreError::DuplicateOrderNumber`] when the number is taken.
    async fn insert_order(&mut self, order: &Order, items: &[OrderItem]) -> StoreResult<()>;
    /// Loads and locks an order for the rest of the unit of work.
    async fn lock_order(&mut self, order_id: Uuid) -> StoreResult<Option<Order>>;
    async fn order_items(&mut self, order_id: Uuid) -> StoreResult<Vec<OrderItem>>;
    async fn update_order_status(&mut self, order: &Order) -> StoreResult<()>;

    /// Quantity per order item held by non-refused return lines.
    async fn returned_quantities(&mut self, order_id: Uuid) -> StoreResult<HashMap<Uuid, i32>>;
    async fn insert_return(&mut self, request: &ReturnRequest) -> StoreResult<()>;
    /// Loads the return owning `item_id`, locking that line.
    async fn lock_return_by_item(&mut self, item_id: Uuid) -> StoreResult<Option<ReturnRequest>>;
    async fn update_return_item(&mut self, request: &ReturnRequest, item_id: Uuid) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
