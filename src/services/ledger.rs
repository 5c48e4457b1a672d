//! Stock movement history per variant.

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::aggregates::StockMovement;
use crate::store::Store;
use crate::{Result, StorefrontError};

/// Read side of the append-only stock ledger.
#[derive(Clone)]
pub struct LedgerService { store: Arc<dyn Store> }

impl LedgerService {
    pub fn new(store: Arc<dyn Store>) -> Self { Self { store } }

    /// Movements of one variant, newest first.
    pub async fn movements(&self, variant_id: Uuid) -> Result<Vec<StockMovement>> {
        if self.store.find_variants(&[variant_id]).await?.is_empty() {
            return Err(StorefrontError::NotFound(format!("variant {} not found", variant_id)));
        }
        Ok(self.store.list_movements(variant_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::MovementType;
    use crate::services::fixtures::Shop;
    use crate::services::PlaceOrder;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_ledger_replays_to_current_stock() {
        let shop = Shop::new();
        let ledger = LedgerService::new(Arc::new(shop.store.clone()));
        let a = shop.variant("CAP-1", Decimal::TEN, 6).await;
        let user = shop.customer().await;
        shop.add(user, &a, 4).await;
        let placed = shop.orders.place_order(user, PlaceOrder { address: "9 rue Y".into(), phone_number: "0612345678".into(), notes: None }).await.unwrap();
        shop.orders.cancel_order(user, placed.order.id()).await.unwrap();

        let movements = ledger.movements(a.id).await.unwrap();
        assert_eq!(movements.iter().map(|m| m.movement_type).collect::<Vec<_>>(), vec![MovementType::In, MovementType::Out]);
        assert_eq!(6 + movements.iter().map(StockMovement::delta).sum::<i32>(), shop.stock(&a).await);
        assert!(matches!(ledger.movements(Uuid::new_v4()).await.unwrap_err(), StorefrontError::NotFound(_)));
    }
}
