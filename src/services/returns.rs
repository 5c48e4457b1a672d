//! Return requests on delivered orders and their approval workflow.

use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::aggregates::{RequestedReturnItem, ReturnItemStatus, ReturnRequest, StockMovement};
use crate::publisher::EventBus;
use crate::store::{ReturnFilter, Store, StoreError};
use crate::{Result, StorefrontError};

#[derive(Clone, Debug)]
pub struct RequestReturn { pub order_id: Uuid, pub reason: String, pub items: Vec<RequestedReturnItem> }

#[derive(Clone)]
pub struct ReturnService { store: Arc<dyn Store>, events: EventBus }

impl ReturnService {
    pub fn new(store: Arc<dyn Store>, events: EventBus) -> Self { Self { store, events } }

    #[instrument(skip_all, fields(%user_id, order_id = %request.order_id))]
    pub async fn request_return(&self, user_id: Uuid, request: RequestReturn) -> Result<ReturnRequest> {
        let mut uow = self.store.begin().await?;
        let order = uow.lock_order(request.order_id).await?
            .filter(|o| o.is_owned_by(user_id))
            .ok_or_else(|| StorefrontError::NotFound(format!("order {} not found", request.order_id)))?;
        let order_items = uow.order_items(order.id()).await?;
        let held = uow.returned_quantities(order.id()).await?;
        let mut created = ReturnRequest::open(&order, &order_items, &held, &request.reason, &request.items)?;
        uow.insert_return(&created).await?;
        uow.commit().await?;

        info!(return_id = %created.id(), order_number = order.order_number(), items = created.items().len(), "return requested");
        self.events.publish(created.take_events()).await;
        Ok(created)
    }

    /// Admin decision on one returned line. Reaching `TRAITE` puts the quantity back in stock.
    #[instrument(skip(self))]
    pub async fn update_item_status(&self, item_id: Uuid, status: ReturnItemStatus) -> Result<ReturnRequest> {
        let mut uow = self.store.begin().await?;
        let mut request = uow.lock_return_by_item(item_id).await?
            .ok_or_else(|| StorefrontError::NotFound(format!("return item {} not found", item_id)))?;
        let restock = request.transition_item(item_id, status).map_err(|e| {
            warn!(error = %e, "return transition rejected");
            StorefrontError::from(e)
        })?;

        if let Some(restock) = restock {
            let order = uow.lock_order(request.order_id()).await?
                .ok_or_else(|| StoreError::Corrupt(format!("return {} references missing order {}", request.id(), request.order_id())))?;
            uow.increment_stock(restock.variant_id, restock.quantity).await?;
            uow.append_movement(&StockMovement::return_restock(restock.variant_id, restock.quantity, order.order_number())).await?;
            info!(order_number = order.order_number(), variant_id = %restock.variant_id, quantity = restock.quantity.value(), "returned stock restored");
        }
        uow.update_return_item(&request, item_id).await?;
        uow.commit().await?;

        self.events.publish(request.take_events()).await;
        Ok(request)
    }

    pub async fn list_returns(&self, user_id: Uuid) -> Result<Vec<ReturnRequest>> {
        Ok(self.store.find_returns(ReturnFilter { user_id: Some(user_id), ..Default::default() }).await?)
    }

    pub async fn list_all_returns(&self) -> Result<Vec<ReturnRequest>> {
        Ok(self.store.find_returns(ReturnFilter::default()).await?)
    }

    /// `owner: None` reads any return (admin).
    pub async fn get_return(&self, return_id: Uuid, owner: Option<Uuid>) -> Result<ReturnRequest> {
        self.store.find_returns(ReturnFilter { user_id: owner, return_id: Some(return_id) }).await?
            .into_iter().next()
            .ok_or_else(|| StorefrontError::NotFound(format!("return {} not found", return_id)))
    }
}
