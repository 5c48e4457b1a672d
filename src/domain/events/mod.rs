//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{OrderStatus, ReturnItemStatus};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DomainEvent {
    Order(OrderEvent),
    Return(ReturnEvent),
}

impl DomainEvent {
    /// Subject suffix used when the event is published.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Order(OrderEvent::Placed { .. }) => "order.placed",
            Self::Order(OrderEvent::Cancelled { .. }) => "order.cancelled",
            Self::Order(OrderEvent::StatusChanged { .. }) => "order.status_changed",
            Self::Return(ReturnEvent::Requested { .. }) => "return.requested",
            Self::Return(ReturnEvent::ItemStatusChanged { .. }) => "return.item_status_changed",
            Self::Return(ReturnEvent::StockRestored { .. }) => "return.stock_restored",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: Uuid, order_number: String, user_id: Uuid, total_amount: Decimal, item_count: usize },
    Cancelled { order_id: Uuid, order_number: String },
    StatusChanged { order_id: Uuid, from: OrderStatus, to: OrderStatus },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReturnEvent {
    Requested { return_id: Uuid, order_id: Uuid, item_count: usize },
    ItemStatusChanged { return_id: Uuid, return_item_id: Uuid, from: ReturnItemStatus, to: ReturnItemStatus },
    StockRestored { return_id: Uuid, variant_id: Uuid, quantity: i32 },
}
