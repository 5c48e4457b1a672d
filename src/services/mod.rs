//! Application services. Each mutating operation runs inside one unit of work.
pub mod cart;
pub mod ledger;
pub mod orders;
pub mod returns;

pub use cart::{AddToCart, CartService};
pub use ledger::LedgerService;
pub use orders::{GuestOrder, OrderDetails, OrderItemDetails, OrderService, PlaceOrder, RequestedItem, MAX_ORDER_NUMBER_ATTEMPTS};
pub use returns::{RequestReturn, ReturnService};

#[cfg(test)]
pub(crate) mod fixtures {
    use rust_decimal::Decimal;
    use std::sync::Arc;
    use uuid::Uuid;

    use crate::domain::aggregates::{User, UserRole, VariantView};
    use crate::domain::value_objects::Quantity;
    use crate::publisher::EventBus;
    use crate::store::{MemoryStore, NewVariant};
    use super::{CartService, OrderService, ReturnService};

    pub struct Shop {
        pub store: MemoryStore,
        pub orders: OrderService,
        pub carts: CartService,
        pub returns: ReturnService,
    }

    impl Shop {
        pub fn new() -> Self {
            let store = MemoryStore::new();
            let shared = Arc::new(store.clone());
            Self {
                orders: OrderService::new(shared.clone(), EventBus::disabled()),
                carts: CartService::new(shared.clone()),
                returns: ReturnService::new(shared, EventBus::disabled()),
                store,
            }
        }

        pub async fn variant(&self, sku: &str, price: Decimal, stock: i32) -> VariantView {
            self.store.seed_variant(NewVariant {
                sku: sku.into(), product_name: format!("Product {}", sku), price, size: "M".into(), category: Some("T-shirts".into()), stock,
            }).await.unwrap()
        }

        pub async fn customer(&self) -> Uuid {
            let user = User {
                id: Uuid::now_v7(), first_name: "Lina".into(), last_name: "K".into(), email: Some("lina@example.com".into()),
                phone_number: None, role: UserRole::Client, created_at: chrono::Utc::now(),
            };
            let id = user.id;
            self.store.seed_user(user).await;
            id
        }

        pub async fn stock(&self, variant: &VariantView) -> i32 { self.store.stock_of(variant.id).await.unwrap() }

        pub async fn add(&self, user_id: Uuid, variant: &VariantView, qty: i32) {
            self.carts.add_item(user_id, super::AddToCart { variant_id: variant.id, quantity: Quantity::new(qty).unwrap(), personalization_id: None }).await.unwrap();
        }
    }
}
