//! Return Aggregate
//!
//! A return request covers part of a delivered order. Each returned line moves
//! through its own approval workflow and only puts stock back on the shelf once
//! it reaches [`ReturnItemStatus::Traite`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;
use crate::domain::aggregates::order::{Order, OrderItem, OrderStatus};
use crate::domain::value_objects::Quantity;
use crate::domain::events::{DomainEvent, ReturnEvent};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnItemStatus { #[default] EnAttente, Approuve, EnTraitement, Traite, Refuse }

impl ReturnItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnAttente => "EN_ATTENTE", Self::Approuve => "APPROUVE", Self::EnTraitement => "EN_TRAITEMENT",
            Self::Traite => "TRAITE", Self::Refuse => "REFUSE",
        }
    }

    pub fn can_transition_to(&self, to: ReturnItemStatus) -> bool {
        use ReturnItemStatus::*;
        matches!((self, to), (EnAttente, Approuve) | (EnAttente, Refuse) | (Approuve, EnTraitement) | (Approuve, Refuse) | (EnTraitement, Traite))
    }

    /// Refused lines no longer hold any of the ordered quantity.
    pub fn holds_quantity(&self) -> bool { *self != Self::Refuse }
}

impl FromStr for ReturnItemStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EN_ATTENTE" => Ok(Self::EnAttente),
            "APPROUVE" => Ok(Self::Approuve),
            "EN_TRAITEMENT" => Ok(Self::EnTraitement),
            "TRAITE" => Ok(Self::Traite),
            "REFUSE" => Ok(Self::Refuse),
            other => Err(format!("unknown return status {}", other)),
        }
    }
}

impl std::fmt::Display for ReturnItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnRequest {
    id: Uuid,
    order_id: Uuid,
    user_id: Uuid,
    reason: String,
    created_at: DateTime<Utc>,
    items: Vec<ReturnItem>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnItem {
    pub id: Uuid,
    pub return_id: Uuid,
    pub order_item_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: Quantity,
    pub status: ReturnItemStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct RequestedReturnItem { pub order_item_id: Uuid, pub quantity: Quantity }

/// Stock to put back after a line was processed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Restock { pub variant_id: Uuid, pub quantity: Quantity }

impl ReturnRequest {
    /// `already_returned` maps order item ids to the quantity held by earlier,
    /// non-refused returns of the same order.
    pub fn open(order: &Order, order_items: &[OrderItem], already_returned: &HashMap<Uuid, i32>, reason: &str, requested: &[RequestedReturnItem]) -> Result<Self, ReturnError> {
        if order.status() != OrderStatus::Livre { return Err(ReturnError::OrderNotDelivered(order.status())); }
        let reason = reason.trim();
        if reason.is_empty() { return Err(ReturnError::EmptyReason); }
        if requested.is_empty() { return Err(ReturnError::NoItems); }

        let id = Uuid::now_v7();
        let now = Utc::now();
        let mut asked: HashMap<Uuid, i64> = HashMap::new();
        let mut items = Vec::with_capacity(requested.len());
        for req in requested {
            let ordered = order_items.iter().find(|i| i.id == req.order_item_id).ok_or(ReturnError::UnknownOrderItem(req.order_item_id))?;
            let total_asked = asked.entry(req.order_item_id).or_insert(0);
            *total_asked += i64::from(req.quantity.value());
            let held = already_returned.get(&req.order_item_id).copied().unwrap_or(0);
            let returnable = ordered.quantity.value() - held;
            if *total_asked > i64::from(returnable) {
                return Err(ReturnError::ExceedsReturnable { order_item_id: req.order_item_id, returnable: returnable.max(0) });
            }
            items.push(ReturnItem {
                id: Uuid::now_v7(), return_id: id, order_item_id: ordered.id, variant_id: ordered.variant_id,
                quantity: req.quantity, status: ReturnItemStatus::EnAttente, updated_at: now,
            });
        }

        let mut request = Self { id, order_id: order.id(), user_id: order.user_id(), reason: reason.to_string(), created_at: now, items, events: vec![] };
        request.events.push(DomainEvent::Return(ReturnEvent::Requested { return_id: id, order_id: order.id(), item_count: request.items.len() }));
        Ok(request)
    }

    pub fn restore(id: Uuid, order_id: Uuid, user_id: Uuid, reason: String, created_at: DateTime<Utc>, items: Vec<ReturnItem>) -> Self {
        Self { id, order_id, user_id, reason, created_at, items, events: vec![] }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_id(&self) -> Uuid { self.order_id }
    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn reason(&self) -> &str { &self.reason }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn items(&self) -> &[ReturnItem] { &self.items }
    pub fn item(&self, item_id: Uuid) -> Option<&ReturnItem> { self.items.iter().find(|i| i.id == item_id) }

    /// Moves one line along the workflow. Entering `TRAITE` yields the stock to restore.
    pub fn transition_item(&mut self, item_id: Uuid, to: ReturnItemStatus) -> Result<Option<Restock>, ReturnError> {
        let return_id = self.id;
        let item = self.items.iter_mut().find(|i| i.id == item_id).ok_or(ReturnError::UnknownReturnItem(item_id))?;
        let from = item.status;
        if !from.can_transition_to(to) { return Err(ReturnError::InvalidTransition { from, to }); }
        item.status = to;
        item.updated_at = Utc::now();
        let restock = (to == ReturnItemStatus::Traite).then(|| Restock { variant_id: item.variant_id, quantity: item.quantity });

        self.events.push(DomainEvent::Return(ReturnEvent::ItemStatusChanged { return_id, return_item_id: item_id, from, to }));
        if let Some(r) = restock {
            self.events.push(DomainEvent::Return(ReturnEvent::StockRestored { return_id, variant_id: r.variant_id, quantity: r.quantity.value() }));
        }
        Ok(restock)
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReturnError {
    OrderNotDelivered(OrderStatus),
    EmptyReason,
    NoItems,
    UnknownOrderItem(Uuid),
    UnknownReturnItem(Uuid),
    ExceedsReturnable { order_item_id: Uuid, returnable: i32 },
    InvalidTransition { from: ReturnItemStatus, to: ReturnItemStatus },
}
impl std::error::Error for ReturnError {}
impl std::fmt::Display for ReturnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OrderNotDelivered(s) => write!(f, "only delivered orders can be returned (order is {})", s),
            Self::EmptyReason => write!(f, "a return reason is required"),
            Self::NoItems => write!(f, "a return must contain at least one item"),
            Self::UnknownOrderItem(id) => write!(f, "order item {} not found", id),
            Self::UnknownReturnItem(id) => write!(f, "return item {} not found", id),
            Self::ExceedsReturnable { order_item_id, returnable } => write!(f, "at most {} unit(s) of order item {} can be returned", returnable, order_item_id),
            Self::InvalidTransition { from, to } => write!(f, "cannot move a return item from {} to {}", from, to),
        }
    }
}
