//! Catalog variant as seen by the order core

use serde::Serialize;
use uuid::Uuid;
use crate::domain::value_objects::{Money, Sku};

/// A purchasable variant (product x size) resolved with the product data the
/// order core needs. Stock is the quantity on hand at read time.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantView {
    pub id: Uuid,
    pub sku: Sku,
    pub stock: i32,
    pub product_id: Uuid,
    pub product_name: String,
    pub price: Money,
    pub size: String,
    pub category: Option<String>,
}

impl VariantView {
    pub fn has_stock_for(&self, quantity: i64) -> bool { i64::from(self.stock) >= quantity }
}
