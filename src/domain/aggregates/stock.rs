//! Stock ledger entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use crate::domain::value_objects::Quantity;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementType { In, Out }

impl MovementType {
    pub fn as_str(&self) -> &'static str { match self { Self::In => "IN", Self::Out => "OUT" } }
}

impl FromStr for MovementType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s { "IN" => Ok(Self::In), "OUT" => Ok(Self::Out), other => Err(format!("unknown movement type {}", other)) }
    }
}

/// Append-only record of one stock change on one variant.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockMovement {
    pub id: Uuid,
    pub variant_id: Uuid,
    pub quantity: Quantity,
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    fn new(variant_id: Uuid, quantity: Quantity, movement_type: MovementType, reason: String) -> Self {
        Self { id: Uuid::now_v7(), variant_id, quantity, movement_type, reason, created_at: Utc::now() }
    }

    pub fn sale(variant_id: Uuid, quantity: Quantity, order_number: &str, personalized: bool) -> Self {
        let reason = if personalized { format!("Order {} (personalized)", order_number) } else { format!("Order {}", order_number) };
        Self::new(variant_id, quantity, MovementType::Out, reason)
    }

    pub fn cancellation(variant_id: Uuid, quantity: Quantity, order_number: &str) -> Self {
        Self::new(variant_id, quantity, MovementType::In, format!("Cancellation of order {}", order_number))
    }

    pub fn return_restock(variant_id: Uuid, quantity: Quantity, order_number: &str) -> Self {
        Self::new(variant_id, quantity, MovementType::In, format!("Return for order {}", order_number))
    }

    /// Signed effect on the variant's stock.
    pub fn delta(&self) -> i32 {
        match self.movement_type { MovementType::In => self.quantity.value(), MovementType::Out => -self.quantity.value() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_reasons_embed_order_number() {
        let q = Quantity::new(2).unwrap();
        let v = Uuid::new_v4();
        let sale = StockMovement::sale(v, q, "ORD-1-0001", false);
        assert_eq!(sale.movement_type, MovementType::Out);
        assert_eq!(sale.delta(), -2);
        assert!(sale.reason.contains("ORD-1-0001"));
        assert!(StockMovement::sale(v, q, "ORD-1-0001", true).reason.contains("personalized"));
        let back = StockMovement::cancellation(v, q, "ORD-1-0001");
        assert_eq!(back.delta(), 2);
        assert!(back.reason.contains("ORD-1-0001"));
    }
    #[test]
    fn test_movement_type_wire_names() {
        assert_eq!(serde_json::to_string(&MovementType::Out).unwrap(), "\"OUT\"");
        assert_eq!("IN".parse::<MovementType>().unwrap(), MovementType::In);
    }
}
