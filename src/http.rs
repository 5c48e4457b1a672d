//! HTTP surface: routes, request bodies, caller identity and error responses.

use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{CartView, OrderStatus, RequestedReturnItem, ReturnItemStatus, ReturnRequest, StockMovement, UserRole};
use crate::domain::value_objects::{PhoneNumber, Quantity};
use crate::publisher::EventBus;
use crate::services::{
    AddToCart, CartService, GuestOrder, LedgerService, OrderDetails, OrderService, PlaceOrder, RequestReturn, RequestedItem, ReturnService,
};
use crate::store::Store;
use crate::StorefrontError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Clone)]
pub struct AppState {
    pub orders: OrderService,
    pub returns: ReturnService,
    pub carts: CartService,
    pub ledger: LedgerService,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, events: EventBus) -> Self {
        Self {
            orders: OrderService::new(store.clone(), events.clone()),
            returns: ReturnService::new(store.clone(), events),
            carts: CartService::new(store.clone()),
            ledger: LedgerService::new(store),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "opensase-storefront"})) }))
        .route("/api/v1/orders", get(list_orders).post(place_order))
        .route("/api/v1/orders/all", get(list_all_orders))
        .route("/api/v1/orders/guest", post(place_guest_order))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/status", put(update_order_status))
        .route("/api/v1/orders/:id/cancel", put(cancel_order))
        .route("/api/v1/cart", get(get_cart))
        .route("/api/v1/cart/items", post(add_to_cart))
        .route("/api/v1/cart/items/:id", delete(remove_from_cart))
        .route("/api/v1/returns", get(list_returns).post(request_return))
        .route("/api/v1/returns/all", get(list_all_returns))
        .route("/api/v1/returns/:id", get(get_return))
        .route("/api/v1/returns/items/:id/status", put(update_return_item_status))
        .route("/api/v1/variants/:id/movements", get(list_movements))
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid caller identity")]
    Unauthorized,

    #[error("admin role required")]
    Forbidden,

    #[error(transparent)]
    Service(#[from] StorefrontError),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody { pub error: String, pub message: String }

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Service(e) => match e {
                StorefrontError::Validation(_) => StatusCode::BAD_REQUEST,
                StorefrontError::NotFound(_) => StatusCode::NOT_FOUND,
                StorefrontError::InsufficientStock { .. } | StorefrontError::Conflict(_) => StatusCode::CONFLICT,
                StorefrontError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Service(StorefrontError::Storage(e)) => {
                error!(error = %e, "storage failure");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody { error: status.canonical_reason().unwrap_or("Error").to_string(), message };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn invalid(message: impl Into<String>) -> ApiError { ApiError::Service(StorefrontError::Validation(message.into())) }

/// Unwraps a JSON body and runs its field validation, both failing as 400.
fn payload<T: Validate>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    let Json(body) = body.map_err(|e| invalid(e.body_text()))?;
    body.validate().map_err(|e| invalid(e.to_string()))?;
    Ok(body)
}

fn quantity(value: i32) -> ApiResult<Quantity> { Quantity::new(value).map_err(|e| invalid(e.to_string())) }

// =============================================================================
// Caller identity
// =============================================================================

/// Caller identity as forwarded by the gateway.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Principal { pub user_id: Uuid, pub role: UserRole }

impl Principal {
    fn require_admin(&self) -> ApiResult<()> {
        if self.role == UserRole::Admin { Ok(()) } else { Err(ApiError::Forbidden) }
    }
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok());
        let user_id = header(USER_ID_HEADER).and_then(|v| Uuid::parse_str(v.trim()).ok()).ok_or(ApiError::Unauthorized)?;
        let role = match header(USER_ROLE_HEADER) {
            None => UserRole::Client,
            Some(raw) => UserRole::from_str(raw.trim()).map_err(|_| ApiError::Unauthorized)?,
        };
        Ok(Self { user_id, role })
    }
}

// =============================================================================
// Request bodies
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderBody {
    #[validate(length(min = 1, message = "address is required"))]
    pub address: String,
    #[validate(length(min = 1, message = "phone number is required"))]
    pub phone_number: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GuestOrderBody {
    #[validate(length(min = 1, message = "first name is required"))]
    pub first_name: String,
    #[validate(length(min = 1, message = "last name is required"))]
    pub last_name: String,
    pub phone_number: String,
    #[validate(length(min = 1, message = "address is required"))]
    pub address: String,
    pub notes: Option<String>,
    #[validate(length(min = 1, message = "at least one item is required"))]
    pub items: Vec<ItemBody>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody { pub variant_id: Uuid, pub quantity: i32 }

#[derive(Debug, Deserialize, Validate)]
pub struct StatusBody {
    #[validate(length(min = 1, message = "status is required"))]
    pub status: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartBody {
    pub variant_id: Uuid,
    #[validate(range(min = 1, message = "quantity must be positive"))]
    pub quantity: i32,
    pub personalization_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReturnBody {
    pub order_id: Uuid,
    #[validate(length(min = 1, message = "reason is required"))]
    pub reason: String,
    #[validate(length(min = 1, message = "at least one item is required"))]
    pub items: Vec<ReturnItemBody>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnItemBody { pub order_item_id: Uuid, pub quantity: i32 }

// =============================================================================
// Orders
// =============================================================================

async fn place_order(State(s): State<AppState>, who: Principal, body: Result<Json<PlaceOrderBody>, JsonRejection>) -> ApiResult<(StatusCode, Json<OrderDetails>)> {
    let body = payload(body)?;
    let placed = s.orders.place_order(who.user_id, PlaceOrder { address: body.address, phone_number: body.phone_number, notes: body.notes }).await?;
    Ok((StatusCode::CREATED, Json(placed)))
}

async fn place_guest_order(State(s): State<AppState>, body: Result<Json<GuestOrderBody>, JsonRejection>) -> ApiResult<(StatusCode, Json<OrderDetails>)> {
    let body = payload(body)?;
    let phone_number = PhoneNumber::new(&body.phone_number).map_err(|e| invalid(e.to_string()))?;
    let items = body.items.iter()
        .map(|i| Ok(RequestedItem { variant_id: i.variant_id, quantity: quantity(i.quantity)? }))
        .collect::<ApiResult<Vec<_>>>()?;
    let placed = s.orders.place_guest_order(GuestOrder {
        first_name: body.first_name, last_name: body.last_name, phone_number, address: body.address, notes: body.notes, items,
    }).await?;
    Ok((StatusCode::CREATED, Json(placed)))
}

async fn list_orders(State(s): State<AppState>, who: Principal) -> ApiResult<Json<Vec<OrderDetails>>> {
    Ok(Json(s.orders.list_orders(who.user_id).await?))
}

async fn list_all_orders(State(s): State<AppState>, who: Principal) -> ApiResult<Json<Vec<OrderDetails>>> {
    who.require_admin()?;
    Ok(Json(s.orders.list_all_orders().await?))
}

async fn get_order(State(s): State<AppState>, who: Principal, Path(id): Path<Uuid>) -> ApiResult<Json<OrderDetails>> {
    let owner = (who.role != UserRole::Admin).then_some(who.user_id);
    Ok(Json(s.orders.get_order(id, owner).await?))
}

async fn update_order_status(State(s): State<AppState>, who: Principal, Path(id): Path<Uuid>, body: Result<Json<StatusBody>, JsonRejection>) -> ApiResult<Json<OrderDetails>> {
    who.require_admin()?;
    let status = OrderStatus::from_str(payload(body)?.status.trim()).map_err(invalid)?;
    Ok(Json(s.orders.update_status(id, status).await?))
}

async fn cancel_order(State(s): State<AppState>, who: Principal, Path(id): Path<Uuid>) -> ApiResult<Json<OrderDetails>> {
    Ok(Json(s.orders.cancel_order(who.user_id, id).await?))
}

// =============================================================================
// Cart
// =============================================================================

async fn get_cart(State(s): State<AppState>, who: Principal) -> ApiResult<Json<CartView>> {
    Ok(Json(s.carts.get_cart(who.user_id).await?))
}

async fn add_to_cart(State(s): State<AppState>, who: Principal, body: Result<Json<AddToCartBody>, JsonRejection>) -> ApiResult<(StatusCode, Json<CartView>)> {
    let body = payload(body)?;
    let request = AddToCart { variant_id: body.variant_id, quantity: quantity(body.quantity)?, personalization_id: body.personalization_id };
    Ok((StatusCode::CREATED, Json(s.carts.add_item(who.user_id, request).await?)))
}

async fn remove_from_cart(State(s): State<AppState>, who: Principal, Path(id): Path<Uuid>) -> ApiResult<Json<CartView>> {
    Ok(Json(s.carts.remove_item(who.user_id, id).await?))
}

// =============================================================================
// Returns
// =============================================================================

async fn request_return(State(s): State<AppState>, who: Principal, body: Result<Json<ReturnBody>, JsonRejection>) -> ApiResult<(StatusCode, Json<ReturnRequest>)> {
    let body = payload(body)?;
    let items = body.items.iter()
        .map(|i| Ok(RequestedReturnItem { order_item_id: i.order_item_id, quantity: quantity(i.quantity)? }))
        .collect::<ApiResult<Vec<_>>>()?;
    let created = s.returns.request_return(who.user_id, RequestReturn { order_id: body.order_id, reason: body.reason, items }).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_returns(State(s): State<AppState>, who: Principal) -> ApiResult<Json<Vec<ReturnRequest>>> {
    Ok(Json(s.returns.list_returns(who.user_id).await?))
}

async fn list_all_returns(State(s): State<AppState>, who: Principal) -> ApiResult<Json<Vec<ReturnRequest>>> {
    who.require_admin()?;
    Ok(Json(s.returns.list_all_returns().await?))
}

async fn get_return(State(s): State<AppState>, who: Principal, Path(id): Path<Uuid>) -> ApiResult<Json<ReturnRequest>> {
    let owner = (who.role != UserRole::Admin).then_some(who.user_id);
    Ok(Json(s.returns.get_return(id, owner).await?))
}

async fn update_return_item_status(State(s): State<AppState>, who: Principal, Path(id): Path<Uuid>, body: Result<Json<StatusBody>, JsonRejection>) -> ApiResult<Json<ReturnRequest>> {
    who.require_admin()?;
    let status = ReturnItemStatus::from_str(payload(body)?.status.trim()).map_err(invalid)?;
    Ok(Json(s.returns.update_item_status(id, status).await?))
}

// =============================================================================
// Stock ledger
// =============================================================================

async fn list_movements(State(s): State<AppState>, who: Principal, Path(id): Path<Uuid>) -> ApiResult<Json<Vec<StockMovement>>> {
    who.require_admin()?;
    Ok(Json(s.ledger.movements(id).await?))
}
