//! Order placement, cancellation and order queries.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::aggregates::{
    generate_order_number, DeliveryDetails, Order, OrderItem, OrderLine, OrderStatus, StockMovement, User, VariantView,
};
use crate::domain::value_objects::{PhoneNumber, Quantity};
use crate::publisher::EventBus;
use crate::store::{OrderFilter, Store, StoreError, UnitOfWork};
use crate::{Result, StorefrontError};

/// Placements retried after an order-number collision before giving up.
pub const MAX_ORDER_NUMBER_ATTEMPTS: usize = 3;

#[derive(Clone, Debug)]
pub struct PlaceOrder { pub address: String, pub phone_number: String, pub notes: Option<String> }

#[derive(Clone, Debug)]
pub struct GuestOrder {
    pub first_name: String,
    pub last_name: String,
    pub phone_number: PhoneNumber,
    pub address: String,
    pub notes: Option<String>,
    pub items: Vec<RequestedItem>,
}

#[derive(Clone, Copy, Debug)]
pub struct RequestedItem { pub variant_id: Uuid, pub quantity: Quantity }

/// Order with its items and their catalog data.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItemDetails>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemDetails {
    #[serde(flatten)]
    pub item: OrderItem,
    pub variant: VariantView,
}

enum Checkout<'a> {
    Cart { user_id: Uuid, delivery: &'a DeliveryDetails },
    Guest(&'a GuestOrder),
}

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn Store>,
    events: EventBus,
    order_numbers: fn() -> String,
}

fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() { return Err(StorefrontError::Validation(format!("{} is required", field))); }
    Ok(value.to_string())
}

fn not_found(order_id: Uuid) -> StorefrontError { StorefrontError::NotFound(format!("order {} not found", order_id)) }

fn distinct_variant_ids(items: &[RequestedItem]) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = items.iter().map(|i| i.variant_id).collect();
    ids.sort();
    ids.dedup();
    ids
}

fn resolve_requested(items: &[RequestedItem], variants: &[VariantView]) -> Result<Vec<OrderLine>> {
    items.iter().map(|item| {
        let variant = variants.iter().find(|v| v.id == item.variant_id)
            .ok_or_else(|| StorefrontError::NotFound(format!("variant {} not found", item.variant_id)))?;
        Ok(OrderLine { variant: variant.clone(), quantity: item.quantity, personalization_id: None })
    }).collect()
}

/// Lines sorted by variant id. Concurrent checkouts lock variant rows in the
/// same order and cannot deadlock each other.
fn in_lock_order(lines: &[OrderLine]) -> Vec<&OrderLine> {
    let mut sorted: Vec<&OrderLine> = lines.iter().collect();
    sorted.sort_by_key(|l| l.variant.id);
    sorted
}

/// Conditional decrement plus one OUT ledger entry per line, stopping at the
/// first line that cannot be served. The caller drops the unit of work on error.
async fn reserve(uow: &mut dyn UnitOfWork, lines: &[OrderLine], order_number: &str) -> Result<()> {
    for line in in_lock_order(lines) {
        if !uow.decrement_stock(line.variant.id, line.quantity).await? {
            warn!(sku = %line.variant.sku, requested = line.quantity.value(), order_number, "insufficient stock, rolling back order");
            return Err(StorefrontError::InsufficientStock { sku: line.variant.sku.to_string() });
        }
        uow.append_movement(&StockMovement::sale(line.variant.id, line.quantity, order_number, line.personalization_id.is_some())).await?;
    }
    Ok(())
}

impl OrderService {
    pub fn new(store: Arc<dyn Store>, events: EventBus) -> Self {
        Self { store, events, order_numbers: generate_order_number }
    }

    pub fn with_order_numbers(mut self, order_numbers: fn() -> String) -> Self {
        self.order_numbers = order_numbers;
        self
    }

    /// Checks out the user's cart. On any failure the cart, stock and ledger are left untouched.
    #[instrument(skip_all, fields(%user_id))]
    pub async fn place_order(&self, user_id: Uuid, request: PlaceOrder) -> Result<OrderDetails> {
        let phone = PhoneNumber::new(&request.phone_number).map_err(|e| StorefrontError::Validation(e.to_string()))?;
        let delivery = DeliveryDetails {
            address: required("address", &request.address)?,
            phone_number: phone.to_string(),
            notes: request.notes.filter(|n| !n.trim().is_empty()),
        };
        self.checkout(Checkout::Cart { user_id, delivery: &delivery }).await
    }

    /// Orders an explicit list of variants for a guest identified by phone number.
    #[instrument(skip_all, fields(phone = %request.phone_number))]
    pub async fn place_guest_order(&self, request: GuestOrder) -> Result<OrderDetails> {
        required("first name", &request.first_name)?;
        required("last name", &request.last_name)?;
        required("address", &request.address)?;
        if request.items.is_empty() { return Err(StorefrontError::Validation("at least one item is required".into())); }

        let ids = distinct_variant_ids(&request.items);
        let found = self.store.find_variants(&ids).await?;
        if found.len() != ids.len() {
            let missing: Vec<String> = ids.iter().filter(|id| !found.iter().any(|v| v.id == **id)).map(|id| id.to_string()).collect();
            return Err(StorefrontError::NotFound(format!("variants not found: {}", missing.join(", "))));
        }

        // Early rejection only; the conditional decrement stays the authority.
        let mut wanted: HashMap<Uuid, i64> = HashMap::new();
        for item in &request.items { *wanted.entry(item.variant_id).or_insert(0) += i64::from(item.quantity.value()); }
        for item in &request.items {
            if let Some(v) = found.iter().find(|v| v.id == item.variant_id && !v.has_stock_for(wanted[&v.id])) {
                warn!(sku = %v.sku, stock = v.stock, requested = wanted[&v.id], "guest order rejected before checkout");
                return Err(StorefrontError::InsufficientStock { sku: v.sku.to_string() });
            }
        }

        self.checkout(Checkout::Guest(&request)).await
    }

    async fn checkout(&self, checkout: Checkout<'_>) -> Result<OrderDetails> {
        let mut attempt = 1;
        let (mut order, items) = loop {
            let number = (self.order_numbers)();
            let placed = match &checkout {
                Checkout::Cart { user_id, delivery } => self.place_from_cart(*user_id, delivery, &number).await,
                Checkout::Guest(guest) => self.place_for_guest(guest, &number).await,
            };
            match placed {
                Err(StorefrontError::Storage(StoreError::DuplicateOrderNumber(taken))) => {
                    if attempt >= MAX_ORDER_NUMBER_ATTEMPTS {
                        return Err(StorefrontError::Conflict(format!("could not allocate a unique order number after {} attempts", attempt)));
                    }
                    warn!(order_number = %taken, attempt, "order number collision, retrying");
                    attempt += 1;
                }
                other => break other?,
            }
        };
        info!(order_number = order.order_number(), total = %order.total_amount(), items = items.len(), "order placed");
        self.events.publish(order.take_events()).await;
        self.single(order, items).await
    }

    async fn place_from_cart(&self, user_id: Uuid, delivery: &DeliveryDetails, number: &str) -> Result<(Order, Vec<OrderItem>)> {
        let mut uow = self.store.begin().await?;
        let cart = match uow.load_cart(user_id).await? {
            Some(cart) if !cart.is_empty() => cart,
            _ => return Err(StorefrontError::Validation("cart is empty".into())),
        };
        let variants = uow.find_variants(&cart.variant_ids()).await?;
        let lines = cart.resolve(&variants)?;
        let (order, items) = Order::place(number, user_id, delivery.clone(), &lines)?;

        reserve(uow.as_mut(), &lines, order.order_number()).await?;
        uow.insert_order(&order, &items).await?;
        uow.clear_cart(cart.id()).await?;
        uow.commit().await?;
        Ok((order, items))
    }

    async fn place_for_guest(&self, guest: &GuestOrder, number: &str) -> Result<(Order, Vec<OrderItem>)> {
        let mut uow = self.store.begin().await?;
        let user = uow.upsert_guest_user(&User::guest(guest.first_name.trim(), guest.last_name.trim(), guest.phone_number.clone())).await?;
        let variants = uow.find_variants(&distinct_variant_ids(&guest.items)).await?;
        let lines = resolve_requested(&guest.items, &variants)?;
        let delivery = DeliveryDetails {
            address: guest.address.trim().to_string(),
            phone_number: guest.phone_number.to_string(),
            notes: guest.notes.clone().filter(|n| !n.trim().is_empty()),
        };
        let (order, items) = Order::place(number, user.id, delivery, &lines)?;

        uow.insert_order(&order, &items).await?;
        reserve(uow.as_mut(), &lines, order.order_number()).await?;
        uow.commit().await?;
        Ok((order, items))
    }

    /// Cancels one of the user's orders and puts its stock back.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, user_id: Uuid, order_id: Uuid) -> Result<OrderDetails> {
        self.cancel(order_id, Some(user_id)).await
    }

    async fn cancel(&self, order_id: Uuid, owner: Option<Uuid>) -> Result<OrderDetails> {
        let mut uow = self.store.begin().await?;
        let mut order = uow.lock_order(order_id).await?
            .filter(|o| owner.map_or(true, |u| o.is_owned_by(u)))
            .ok_or_else(|| not_found(order_id))?;
        if let Err(e) = order.cancel() {
            warn!(order_number = order.order_number(), status = %order.status(), "cancellation rejected");
            return Err(e.into());
        }

        let items = uow.order_items(order_id).await?;
        let mut restock: Vec<&OrderItem> = items.iter().collect();
        restock.sort_by_key(|i| i.variant_id);
        for item in restock {
            uow.increment_stock(item.variant_id, item.quantity).await?;
            uow.append_movement(&StockMovement::cancellation(item.variant_id, item.quantity, order.order_number())).await?;
        }
        uow.update_order_status(&order).await?;
        uow.commit().await?;

        info!(order_number = order.order_number(), restored_lines = items.len(), "order cancelled");
        self.events.publish(order.take_events()).await;
        self.single(order, items).await
    }

    /// Admin status change. Moving to `ANNULE` runs the stock-restoring cancellation.
    #[instrument(skip(self))]
    pub async fn update_status(&self, order_id: Uuid, status: OrderStatus) -> Result<OrderDetails> {
        if status == OrderStatus::Annule { return self.cancel(order_id, None).await; }

        let mut uow = self.store.begin().await?;
        let mut order = uow.lock_order(order_id).await?.ok_or_else(|| not_found(order_id))?;
        let from = order.status();
        let items = uow.order_items(order_id).await?;
        if order.change_status(status)? {
            uow.update_order_status(&order).await?;
            uow.commit().await?;
            info!(order_number = order.order_number(), %from, to = %status, "order status changed");
        } else {
            drop(uow);
        }
        self.events.publish(order.take_events()).await;
        self.single(order, items).await
    }

    pub async fn list_orders(&self, user_id: Uuid) -> Result<Vec<OrderDetails>> {
        let orders = self.store.find_orders(OrderFilter { user_id: Some(user_id), ..Default::default() }).await?;
        self.details(orders).await
    }

    pub async fn list_all_orders(&self) -> Result<Vec<OrderDetails>> {
        let orders = self.store.find_orders(OrderFilter::default()).await?;
        self.details(orders).await
    }

    /// `owner: None` reads any order (admin).
    pub async fn get_order(&self, order_id: Uuid, owner: Option<Uuid>) -> Result<OrderDetails> {
        let orders = self.store.find_orders(OrderFilter { user_id: owner, order_id: Some(order_id) }).await?;
        self.details(orders).await?.into_iter().next().ok_or_else(|| not_found(order_id))
    }

    async fn details(&self, orders: Vec<Order>) -> Result<Vec<OrderDetails>> {
        let ids: Vec<Uuid> = orders.iter().map(|o| o.id()).collect();
        let items = self.store.find_order_items(&ids).await?;
        self.hydrate(orders, items).await
    }

    async fn single(&self, order: Order, items: Vec<OrderItem>) -> Result<OrderDetails> {
        let id = order.id();
        self.hydrate(vec![order], items).await?.into_iter().next()
            .ok_or_else(|| StoreError::Corrupt(format!("order {} vanished while loading", id)).into())
    }

    async fn hydrate(&self, orders: Vec<Order>, items: Vec<OrderItem>) -> Result<Vec<OrderDetails>> {
        let mut variant_ids: Vec<Uuid> = items.iter().map(|i| i.variant_id).collect();
        variant_ids.sort();
        variant_ids.dedup();
        let variants: HashMap<Uuid, VariantView> = self.store.find_variants(&variant_ids).await?.into_iter().map(|v| (v.id, v)).collect();

        let mut by_order: HashMap<Uuid, Vec<OrderItemDetails>> = HashMap::new();
        for item in items {
            let variant = variants.get(&item.variant_id).cloned()
                .ok_or_else(|| StoreError::Corrupt(format!("order item {} references missing variant {}", item.id, item.variant_id)))?;
            by_order.entry(item.order_id).or_default().push(OrderItemDetails { item, variant });
        }
        Ok(orders.into_iter().map(|order| {
            let items = by_order.remove(&order.id()).unwrap_or_default();
            OrderDetails { order, items }
        }).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::MovementType;
    use crate::domain::value_objects::{Money, Sku};
    use crate::services::fixtures::Shop;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> PlaceOrder {
        PlaceOrder { address: "3 avenue Hassan II".into(), phone_number: "0611223344".into(), notes: None }
    }

    fn guest(phone: &str, items: Vec<RequestedItem>) -> GuestOrder {
        GuestOrder {
            first_name: "Sami".into(), last_name: "R".into(), phone_number: PhoneNumber::new(phone).unwrap(),
            address: "Hotel Atlas, Agadir".into(), notes: None, items,
        }
    }

    fn item(variant: &VariantView, qty: i32) -> RequestedItem { RequestedItem { variant_id: variant.id, quantity: Quantity::new(qty).unwrap() } }

    fn line_for(id: u128, qty: i32) -> OrderLine {
        OrderLine {
            variant: VariantView {
                id: Uuid::from_u128(id), sku: Sku::new(format!("V-{}", id)).unwrap(), stock: 10, product_id: Uuid::from_u128(100),
                product_name: "Tee".into(), price: Money::new(Decimal::ONE), size: "M".into(), category: None,
            },
            quantity: Quantity::new(qty).unwrap(),
            personalization_id: None,
        }
    }

    #[test]
    fn test_lines_are_locked_in_variant_order() {
        let lines = [line_for(3, 1), line_for(1, 2), line_for(2, 1), line_for(1, 4)];
        let ordered: Vec<(u128, i32)> = in_lock_order(&lines).iter().map(|l| (l.variant.id.as_u128(), l.quantity.value())).collect();
        assert_eq!(ordered, vec![(1, 2), (1, 4), (2, 1), (3, 1)]);
    }

    #[tokio::test]
    async fn test_reverse_cart_order_still_reserves_every_line() {
        let shop = Shop::new();
        let a = shop.variant("A", Decimal::ONE, 4).await;
        let b = shop.variant("B", Decimal::ONE, 4).await;
        let user = shop.customer().await;
        let (first, second) = if a.id > b.id { (&a, &b) } else { (&b, &a) };
        shop.add(user, first, 1).await;
        shop.add(user, second, 3).await;

        let placed = shop.orders.place_order(user, request()).await.unwrap();
        assert_eq!(placed.items.len(), 2);
        assert_eq!((shop.stock(first).await, shop.stock(second).await), (3, 1));
        for v in [first, second] {
            assert_eq!(shop.store.list_movements(v.id).await.unwrap().len(), 1);
        }

        shop.orders.cancel_order(user, placed.order.id()).await.unwrap();
        assert_eq!((shop.stock(&a).await, shop.stock(&b).await), (4, 4));
    }

    #[tokio::test]
    async fn test_place_order_from_cart() {
        let shop = Shop::new();
        let a = shop.variant("TEE-A", Decimal::new(2000, 2), 5).await;
        let user = shop.customer().await;
        shop.add(user, &a, 2).await;

        let placed = shop.orders.place_order(user, request()).await.unwrap();

        assert_eq!(placed.order.total_amount().amount(), Decimal::new(4000, 2));
        assert_eq!(placed.order.status(), OrderStatus::EnAttente);
        assert_eq!(placed.items.len(), 1);
        assert_eq!(placed.items[0].item.unit_price.amount(), Decimal::new(2000, 2));
        assert_eq!(placed.items[0].variant.sku.as_str(), "TEE-A");
        assert_eq!(shop.stock(&a).await, 3);
        let ledger = shop.store.list_movements(a.id).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].movement_type, MovementType::Out);
        assert_eq!(ledger[0].quantity.value(), 2);
        assert!(ledger[0].reason.contains(placed.order.order_number()));
        assert!(shop.carts.get_cart(user).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_stock_rolls_back_everything() {
        let shop = Shop::new();
        let a = shop.variant("TEE-A", Decimal::new(2000, 2), 5).await;
        let b = shop.variant("TEE-B", Decimal::new(1500, 2), 0).await;
        let user = shop.customer().await;
        shop.add(user, &a, 2).await;
        shop.add(user, &b, 1).await;

        let err = shop.orders.place_order(user, request()).await.unwrap_err();

        assert!(matches!(err, StorefrontError::InsufficientStock { ref sku } if sku == "TEE-B"));
        assert_eq!(shop.stock(&a).await, 5);
        assert!(shop.store.list_movements(a.id).await.unwrap().is_empty());
        assert_eq!(shop.carts.get_cart(user).await.unwrap().items.len(), 2);
        assert!(shop.orders.list_orders(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_at_later_item_keeps_earlier_items_untouched() {
        let shop = Shop::new();
        let a = shop.variant("A", Decimal::ONE, 4).await;
        let b = shop.variant("B", Decimal::ONE, 4).await;
        let c = shop.variant("C", Decimal::ONE, 1).await;
        let user = shop.customer().await;
        shop.add(user, &a, 1).await;
        shop.add(user, &b, 3).await;
        shop.add(user, &c, 2).await;

        assert!(shop.orders.place_order(user, request()).await.is_err());
        assert_eq!((shop.stock(&a).await, shop.stock(&b).await, shop.stock(&c).await), (4, 4, 1));
    }

    #[tokio::test]
    async fn test_empty_cart_is_rejected() {
        let shop = Shop::new();
        let user = shop.customer().await;
        let err = shop.orders.place_order(user, request()).await.unwrap_err();
        assert!(matches!(err, StorefrontError::Validation(ref m) if m == "cart is empty"));
    }

    #[tokio::test]
    async fn test_missing_contact_is_rejected() {
        let shop = Shop::new();
        let a = shop.variant("A", Decimal::ONE, 4).await;
        let user = shop.customer().await;
        shop.add(user, &a, 1).await;
        let err = shop.orders.place_order(user, PlaceOrder { address: " ".into(), ..request() }).await.unwrap_err();
        assert!(matches!(err, StorefrontError::Validation(_)));
        assert_eq!(shop.stock(&a).await, 4);
    }

    #[tokio::test]
    async fn test_total_is_exact_sum_of_lines() {
        let shop = Shop::new();
        let a = shop.variant("A", Decimal::new(1999, 2), 10).await;
        let b = shop.variant("B", Decimal::new(333, 2), 10).await;
        let user = shop.customer().await;
        shop.add(user, &a, 3).await;
        shop.add(user, &b, 7).await;

        let placed = shop.orders.place_order(user, request()).await.unwrap();
        let sum: Decimal = placed.items.iter().map(|i| i.item.total_price.amount()).sum();
        assert_eq!(placed.order.total_amount().amount(), sum);
        for line in &placed.items {
            assert_eq!(line.item.total_price.amount(), line.item.unit_price.amount() * Decimal::from(line.item.quantity.value()));
        }
        assert_eq!(sum, Decimal::new(8328, 2));
    }

    #[tokio::test]
    async fn test_concurrent_orders_never_oversell() {
        let shop = Arc::new(Shop::new());
        let a = shop.variant("LAST-UNITS", Decimal::TEN, 3).await;
        let mut users = vec![];
        for _ in 0..8 {
            let user = shop.customer().await;
            shop.add(user, &a, 1).await;
            users.push(user);
        }

        let tasks: Vec<_> = users.into_iter().map(|user| {
            let shop = shop.clone();
            tokio::spawn(async move { shop.orders.place_order(user, request()).await })
        }).collect();
        let mut placed = 0;
        let mut refused = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => placed += 1,
                Err(StorefrontError::InsufficientStock { .. }) => refused += 1,
                Err(other) => panic!("unexpected error {other}"),
            }
        }
        assert_eq!(placed, 3);
        assert_eq!(refused, 5);
        assert_eq!(shop.stock(&a).await, 0);
    }

    #[tokio::test]
    async fn test_cancel_restores_stock_and_records_ledger() {
        let shop = Shop::new();
        let a = shop.variant("TEE-A", Decimal::new(2000, 2), 5).await;
        let user = shop.customer().await;
        shop.add(user, &a, 2).await;
        let placed = shop.orders.place_order(user, request()).await.unwrap();

        let cancelled = shop.orders.cancel_order(user, placed.order.id()).await.unwrap();

        assert_eq!(cancelled.order.status(), OrderStatus::Annule);
        assert_eq!(shop.stock(&a).await, 5);
        let ledger = shop.store.list_movements(a.id).await.unwrap();
        let inbound: Vec<_> = ledger.iter().filter(|m| m.movement_type == MovementType::In).collect();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].quantity.value(), 2);
        assert!(inbound[0].reason.contains(placed.order.order_number()));
    }

    #[tokio::test]
    async fn test_cancel_twice_restores_once() {
        let shop = Shop::new();
        let a = shop.variant("A", Decimal::ONE, 5).await;
        let user = shop.customer().await;
        shop.add(user, &a, 2).await;
        let placed = shop.orders.place_order(user, request()).await.unwrap();
        shop.orders.cancel_order(user, placed.order.id()).await.unwrap();

        let err = shop.orders.cancel_order(user, placed.order.id()).await.unwrap_err();
        assert!(matches!(err, StorefrontError::Conflict(_)));
        assert_eq!(shop.stock(&a).await, 5);
        assert_eq!(shop.store.list_movements(a.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cannot_cancel_delivered_order() {
        let shop = Shop::new();
        let a = shop.variant("A", Decimal::ONE, 5).await;
        let user = shop.customer().await;
        shop.add(user, &a, 2).await;
        let placed = shop.orders.place_order(user, request()).await.unwrap();
        shop.orders.update_status(placed.order.id(), OrderStatus::EnCours).await.unwrap();
        shop.orders.update_status(placed.order.id(), OrderStatus::Livre).await.unwrap();

        let err = shop.orders.cancel_order(user, placed.order.id()).await.unwrap_err();

        assert!(matches!(err, StorefrontError::Conflict(ref m) if m == "cannot cancel a delivered order"));
        assert_eq!(shop.stock(&a).await, 3);
        assert_eq!(shop.orders.get_order(placed.order.id(), Some(user)).await.unwrap().order.status(), OrderStatus::Livre);
    }

    #[tokio::test]
    async fn test_cancel_is_scoped_to_owner() {
        let shop = Shop::new();
        let a = shop.variant("A", Decimal::ONE, 5).await;
        let owner = shop.customer().await;
        let stranger = shop.customer().await;
        shop.add(owner, &a, 1).await;
        let placed = shop.orders.place_order(owner, request()).await.unwrap();

        assert!(matches!(shop.orders.cancel_order(stranger, placed.order.id()).await.unwrap_err(), StorefrontError::NotFound(_)));
        assert!(matches!(shop.orders.get_order(placed.order.id(), Some(stranger)).await.unwrap_err(), StorefrontError::NotFound(_)));
        assert_eq!(shop.stock(&a).await, 4);
    }

    #[tokio::test]
    async fn test_admin_cancellation_restores_stock() {
        let shop = Shop::new();
        let a = shop.variant("A", Decimal::ONE, 5).await;
        let user = shop.customer().await;
        shop.add(user, &a, 2).await;
        let placed = shop.orders.place_order(user, request()).await.unwrap();

        let cancelled = shop.orders.update_status(placed.order.id(), OrderStatus::Annule).await.unwrap();
        assert_eq!(cancelled.order.status(), OrderStatus::Annule);
        assert_eq!(shop.stock(&a).await, 5);
        let err = shop.orders.update_status(placed.order.id(), OrderStatus::EnCours).await.unwrap_err();
        assert!(matches!(err, StorefrontError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_status_updates_do_not_touch_stock() {
        let shop = Shop::new();
        let a = shop.variant("A", Decimal::ONE, 5).await;
        let user = shop.customer().await;
        shop.add(user, &a, 2).await;
        let placed = shop.orders.place_order(user, request()).await.unwrap();

        let updated = shop.orders.update_status(placed.order.id(), OrderStatus::EnCours).await.unwrap();
        assert_eq!(updated.order.status(), OrderStatus::EnCours);
        assert_eq!(updated.items.len(), 1);
        assert_eq!(shop.stock(&a).await, 3);
        assert_eq!(shop.store.list_movements(a.id).await.unwrap().len(), 1);
        assert!(matches!(shop.orders.update_status(Uuid::new_v4(), OrderStatus::Livre).await.unwrap_err(), StorefrontError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_guest_orders_reuse_guest_by_phone() {
        let shop = Shop::new();
        let a = shop.variant("A", Decimal::new(1250, 2), 10).await;
        let before = shop.store.user_count().await;

        let first = shop.orders.place_guest_order(guest("06 00 00 00 09", vec![item(&a, 2)])).await.unwrap();
        let second = shop.orders.place_guest_order(guest("0600000009", vec![item(&a, 1)])).await.unwrap();

        assert_eq!(first.order.user_id(), second.order.user_id());
        assert_eq!(shop.store.user_count().await, before + 1);
        assert_eq!(first.order.total_amount().amount(), Decimal::new(2500, 2));
        assert_eq!(shop.stock(&a).await, 7);
        assert_eq!(shop.store.list_movements(a.id).await.unwrap().len(), 2);
        let guest_user = shop.store.user_by_phone(&PhoneNumber::new("0600000009").unwrap()).await.unwrap();
        assert!(guest_user.email.is_none());
    }

    #[tokio::test]
    async fn test_guest_order_with_unknown_variant() {
        let shop = Shop::new();
        let a = shop.variant("A", Decimal::ONE, 10).await;
        let ghost = RequestedItem { variant_id: Uuid::new_v4(), quantity: Quantity::new(1).unwrap() };
        let err = shop.orders.place_guest_order(guest("0600000010", vec![item(&a, 1), ghost])).await.unwrap_err();
        assert!(matches!(err, StorefrontError::NotFound(ref m) if m.contains(&ghost.variant_id.to_string())));
        assert_eq!(shop.stock(&a).await, 10);
        assert_eq!(shop.store.user_count().await, 0);
    }

    #[tokio::test]
    async fn test_guest_order_precheck_counts_duplicate_lines() {
        let shop = Shop::new();
        let a = shop.variant("A", Decimal::ONE, 3).await;
        let err = shop.orders.place_guest_order(guest("0600000011", vec![item(&a, 2), item(&a, 2)])).await.unwrap_err();
        assert!(matches!(err, StorefrontError::InsufficientStock { ref sku } if sku == "A"));

        let ok = shop.orders.place_guest_order(guest("0600000011", vec![item(&a, 2), item(&a, 1)])).await.unwrap();
        assert_eq!(ok.items.len(), 2);
        assert_eq!(shop.stock(&a).await, 0);
    }

    #[tokio::test]
    async fn test_guest_order_precheck_handles_huge_quantities() {
        let shop = Shop::new();
        let a = shop.variant("A", Decimal::ONE, 3).await;
        let err = shop.orders.place_guest_order(guest("0600000013", vec![item(&a, i32::MAX), item(&a, 1)])).await.unwrap_err();
        assert!(matches!(err, StorefrontError::InsufficientStock { ref sku } if sku == "A"));
        assert_eq!(shop.stock(&a).await, 3);
        assert!(shop.store.list_movements(a.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_guest_order_requires_items() {
        let shop = Shop::new();
        let err = shop.orders.place_guest_order(guest("0600000012", vec![])).await.unwrap_err();
        assert!(matches!(err, StorefrontError::Validation(_)));
    }

    static COLLIDING: AtomicUsize = AtomicUsize::new(0);

    fn colliding_numbers() -> String {
        // Two calls yield the same number before a fresh one.
        match COLLIDING.fetch_add(1, Ordering::SeqCst) { 0 | 1 => "ORD-1-0001".into(), n => format!("ORD-2-{:04}", n) }
    }

    #[tokio::test]
    async fn test_order_number_collision_is_retried() {
        let shop = Shop::new();
        let orders = shop.orders.clone().with_order_numbers(colliding_numbers);
        let a = shop.variant("A", Decimal::ONE, 5).await;
        let user = shop.customer().await;

        shop.add(user, &a, 1).await;
        let first = orders.place_order(user, request()).await.unwrap();
        shop.add(user, &a, 1).await;
        let second = orders.place_order(user, request()).await.unwrap();

        assert_eq!(first.order.order_number(), "ORD-1-0001");
        assert_ne!(second.order.order_number(), first.order.order_number());
        assert_eq!(shop.stock(&a).await, 3);
        assert_eq!(shop.store.list_movements(a.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_order_number_collision_gives_up() {
        let shop = Shop::new();
        let orders = shop.orders.clone().with_order_numbers(|| "ORD-9-9999".into());
        let a = shop.variant("A", Decimal::ONE, 5).await;
        let user = shop.customer().await;
        shop.add(user, &a, 1).await;
        orders.place_order(user, request()).await.unwrap();
        shop.add(user, &a, 1).await;

        let err = orders.place_order(user, request()).await.unwrap_err();
        assert!(matches!(err, StorefrontError::Conflict(_)));
        assert_eq!(shop.stock(&a).await, 4);
        assert_eq!(shop.carts.get_cart(user).await.unwrap().items.len(), 1);
    }

    #[tokio::test]
    async fn test_listing_orders() {
        let shop = Shop::new();
        let a = shop.variant("A", Decimal::ONE, 10).await;
        let lina = shop.customer().await;
        let omar = shop.customer().await;
        shop.add(lina, &a, 1).await;
        shop.orders.place_order(lina, request()).await.unwrap();
        shop.add(omar, &a, 1).await;
        shop.orders.place_order(omar, request()).await.unwrap();

        assert_eq!(shop.orders.list_orders(lina).await.unwrap().len(), 1);
        let all = shop.orders.list_all_orders().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|o| o.items.len() == 1));
    }
}
