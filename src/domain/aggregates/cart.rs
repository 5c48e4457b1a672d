//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use crate::domain::aggregates::order::OrderLine;
use crate::domain::aggregates::variant::VariantView;
use crate::domain::value_objects::{Money, Quantity};

#[derive(Clone, Debug)]
pub struct Cart {
    id: Uuid,
    user_id: Uuid,
    items: Vec<CartItem>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: Quantity,
    pub personalization_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Cart line resolved against the catalog, as returned to the storefront.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub id: Uuid,
    pub variant: VariantView,
    pub quantity: Quantity,
    pub personalization_id: Option<Uuid>,
    pub line_total: Money,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub id: Option<Uuid>,
    pub items: Vec<CartLine>,
    pub total: Money,
}

impl CartView {
    pub fn empty() -> Self { Self { id: None, items: vec![], total: Money::ZERO } }
}

impl Cart {
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self { id: Uuid::now_v7(), user_id, items: vec![], created_at: now, updated_at: now }
    }

    pub fn restore(id: Uuid, user_id: Uuid, items: Vec<CartItem>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        Self { id, user_id, items, created_at, updated_at }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn item_count(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn variant_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.items.iter().map(|i| i.variant_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Adds a line, merging into an existing one with the same variant and
    /// personalization. Returns the line as it must now be persisted.
    pub fn add_item(&mut self, variant_id: Uuid, quantity: Quantity, personalization_id: Option<Uuid>) -> CartItem {
        self.updated_at = Utc::now();
        if let Some(existing) = self.items.iter_mut().find(|i| i.variant_id == variant_id && i.personalization_id == personalization_id) {
            existing.quantity = existing.quantity.add(quantity);
            return existing.clone();
        }
        let item = CartItem {
            id: Uuid::now_v7(), cart_id: self.id, variant_id, quantity, personalization_id, created_at: self.updated_at,
        };
        self.items.push(item.clone());
        item
    }

    pub fn remove_item(&mut self, item_id: Uuid) -> Result<CartItem, CartError> {
        let pos = self.items.iter().position(|i| i.id == item_id).ok_or(CartError::ItemNotFound(item_id))?;
        self.updated_at = Utc::now();
        Ok(self.items.remove(pos))
    }

    /// Pairs every line with its catalog variant, in cart order.
    pub fn resolve(&self, variants: &[VariantView]) -> Result<Vec<OrderLine>, CartError> {
        self.items.iter().map(|item| {
            let variant = variants.iter().find(|v| v.id == item.variant_id).ok_or(CartError::UnknownVariant(item.variant_id))?;
            Ok(OrderLine { variant: variant.clone(), quantity: item.quantity, personalization_id: item.personalization_id })
        }).collect()
    }

    pub fn view(&self, variants: &[VariantView]) -> Result<CartView, CartError> {
        let lines = self.resolve(variants)?;
        let items: Vec<CartLine> = self.items.iter().zip(lines).map(|(item, line)| CartLine {
            id: item.id, line_total: line.line_total(), variant: line.variant, quantity: item.quantity, personalization_id: item.personalization_id,
        }).collect();
        let total = items.iter().map(|l| l.line_total).sum();
        Ok(CartView { id: Some(self.id), items, total })
    }
}

#[derive(Debug, Clone, PartialEq)] pub enum CartError { ItemNotFound(Uuid), UnknownVariant(Uuid) }
impl std::error::Error for CartError {}
impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ItemNotFound(id) => write!(f, "cart item {} not found", id),
            Self::UnknownVariant(id) => write!(f, "variant {} not found", id),
        }
    }
}
