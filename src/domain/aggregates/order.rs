//! Order Aggregate

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use crate::domain::aggregates::variant::VariantView;
use crate::domain::value_objects::{Money, Quantity};
use crate::domain::events::{DomainEvent, OrderEvent};

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: Uuid,
    order_number: String,
    user_id: Uuid,
    status: OrderStatus,
    total_amount: Money,
    address: String,
    phone_number: String,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

/// Line item with its price captured when the order was placed.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: Quantity,
    pub unit_price: Money,
    pub total_price: Money,
    pub personalization_id: Option<Uuid>,
}

/// A requested line resolved against the catalog, ready to become an [`OrderItem`].
#[derive(Clone, Debug)]
pub struct OrderLine { pub variant: VariantView, pub quantity: Quantity, pub personalization_id: Option<Uuid> }

impl OrderLine {
    pub fn line_total(&self) -> Money { self.variant.price.multiply(self.quantity) }
}

#[derive(Clone, Debug, Default)]
pub struct DeliveryDetails { pub address: String, pub phone_number: String, pub notes: Option<String> }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus { #[default] EnAttente, EnCours, Livre, Annule }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::EnAttente => "EN_ATTENTE", Self::EnCours => "EN_COURS", Self::Livre => "LIVRE", Self::Annule => "ANNULE" }
    }

    /// Fulfilment only moves forward: EN_ATTENTE, EN_COURS, LIVRE.
    pub fn can_advance_to(&self, to: OrderStatus) -> bool {
        matches!((self, to),
            (Self::EnAttente, OrderStatus::EnCours) | (Self::EnAttente, OrderStatus::Livre) | (Self::EnCours, OrderStatus::Livre))
    }
}

impl FromStr for OrderStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EN_ATTENTE" => Ok(Self::EnAttente),
            "EN_COURS" => Ok(Self::EnCours),
            "LIVRE" => Ok(Self::Livre),
            "ANNULE" => Ok(Self::Annule),
            other => Err(format!("unknown order status {}", other)),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// `ORD-<millis>-<4 random digits>`.
pub fn generate_order_number() -> String {
    format!("ORD-{}-{:04}", Utc::now().timestamp_millis(), rand::thread_rng().gen_range(0..10_000))
}

impl Order {
    /// Builds a pending order and its items from resolved lines, snapshotting
    /// unit prices. The total is the exact sum of the line totals.
    pub fn place(order_number: impl Into<String>, user_id: Uuid, delivery: DeliveryDetails, lines: &[OrderLine]) -> Result<(Self, Vec<OrderItem>), OrderError> {
        if lines.is_empty() { return Err(OrderError::NoItems); }
        let id = Uuid::now_v7();
        let now = Utc::now();
        let items: Vec<OrderItem> = lines.iter().map(|line| OrderItem {
            id: Uuid::now_v7(), order_id: id, variant_id: line.variant.id, quantity: line.quantity,
            unit_price: line.variant.price, total_price: line.line_total(), personalization_id: line.personalization_id,
        }).collect();
        let total_amount: Money = items.iter().map(|i| i.total_price).sum();
        let mut order = Self {
            id, order_number: order_number.into(), user_id, status: OrderStatus::EnAttente, total_amount,
            address: delivery.address, phone_number: delivery.phone_number, notes: delivery.notes,
            created_at: now, updated_at: now, events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Placed {
            order_id: id, order_number: order.order_number.clone(), user_id, total_amount: total_amount.amount(), item_count: items.len(),
        }));
        Ok((order, items))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: Uuid, order_number: String, user_id: Uuid, status: OrderStatus, total_amount: Money, address: String,
        phone_number: String, notes: Option<String>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
    ) -> Self {
        Self { id, order_number, user_id, status, total_amount, address, phone_number, notes, created_at, updated_at, events: vec![] }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_number(&self) -> &str { &self.order_number }
    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn total_amount(&self) -> Money { self.total_amount }
    pub fn address(&self) -> &str { &self.address }
    pub fn phone_number(&self) -> &str { &self.phone_number }
    pub fn notes(&self) -> Option<&str> { self.notes.as_deref() }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool { self.user_id == user_id }

    /// Only pending or in-progress orders can be cancelled.
    pub fn cancel(&mut self) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Livre => return Err(OrderError::Delivered),
            OrderStatus::Annule => return Err(OrderError::AlreadyCancelled),
            OrderStatus::EnAttente | OrderStatus::EnCours => {}
        }
        self.status = OrderStatus::Annule;
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Cancelled { order_id: self.id, order_number: self.order_number.clone() }));
        Ok(())
    }

    /// Admin transition without stock effects. Cancellation goes through [`Order::cancel`].
    /// Returns false when the order already had the requested status. A delivered
    /// order never moves back, so it can no longer be cancelled and restocked.
    pub fn change_status(&mut self, to: OrderStatus) -> Result<bool, OrderError> {
        if self.status == OrderStatus::Annule { return Err(OrderError::AlreadyCancelled); }
        if to == OrderStatus::Annule { return Err(OrderError::CancelRequiresRestock); }
        if self.status == to { return Ok(false); }
        if !self.status.can_advance_to(to) { return Err(OrderError::InvalidTransition { from: self.status, to }); }
        let from = self.status;
        self.status = to;
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::StatusChanged { order_id: self.id, from, to }));
        Ok(true)
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq)] pub enum OrderError { NoItems, Delivered, AlreadyCancelled, CancelRequiresRestock, InvalidTransition { from: OrderStatus, to: OrderStatus } }
impl std::error::Error for OrderError {}
impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoItems => write!(f, "order has no items"),
            Self::Delivered => write!(f, "cannot cancel a delivered order"),
            Self::AlreadyCancelled => write!(f, "order is already cancelled"),
            Self::CancelRequiresRestock => write!(f, "cancellation must restore stock"),
            Self::InvalidTransition { from, to } => write!(f, "cannot move order from {} to {}", from, to),
        }
    }
}
