//! Cart reads and edits for the signed-in user.

use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::aggregates::{Cart, CartView};
use crate::domain::value_objects::Quantity;
use crate::store::Store;
use crate::{Result, StorefrontError};

#[derive(Clone, Copy, Debug)]
pub struct AddToCart { pub variant_id: Uuid, pub quantity: Quantity, pub personalization_id: Option<Uuid> }

#[derive(Clone)]
pub struct CartService { store: Arc<dyn Store> }

impl CartService {
    pub fn new(store: Arc<dyn Store>) -> Self { Self { store } }

    /// A user without a cart gets an empty view.
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView> {
        let Some(cart) = self.store.find_cart(user_id).await? else { return Ok(CartView::empty()) };
        let variants = self.store.find_variants(&cart.variant_ids()).await?;
        Ok(cart.view(&variants)?)
    }

    #[instrument(skip_all, fields(%user_id, variant_id = %request.variant_id))]
    pub async fn add_item(&self, user_id: Uuid, request: AddToCart) -> Result<CartView> {
        let mut uow = self.store.begin().await?;
        if uow.find_variants(&[request.variant_id]).await?.is_empty() {
            return Err(StorefrontError::NotFound(format!("variant {} not found", request.variant_id)));
        }
        let mut cart = match uow.load_cart(user_id).await? {
            Some(cart) => cart,
            None => {
                let cart = Cart::new(user_id);
                uow.create_cart(&cart).await?;
                cart
            }
        };
        let line = cart.add_item(request.variant_id, request.quantity, request.personalization_id);
        uow.save_cart_item(&line).await?;
        uow.commit().await?;

        debug!(item_id = %line.id, quantity = line.quantity.value(), "cart line saved");
        self.get_cart(user_id).await
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, item_id: Uuid) -> Result<CartView> {
        let mut uow = self.store.begin().await?;
        let mut cart = uow.load_cart(user_id).await?
            .ok_or_else(|| StorefrontError::NotFound(format!("cart item {} not found", item_id)))?;
        cart.remove_item(item_id)?;
        uow.delete_cart_item(item_id).await?;
        uow.commit().await?;
        self.get_cart(user_id).await
    }
}
