//! OpenSASE Storefront - order core of the apparel printing shop
//!
//! Turns carts and guest baskets into orders while reserving stock, and gives
//! the stock back when an order is cancelled or a returned item is processed.
//!
//! ## Features
//! - Checkout from cart and guest checkout keyed by phone number
//! - Atomic conditional stock reservation, no overselling
//! - Append-only stock ledger
//! - Cancellation and return workflows with stock restoration
//! - PostgreSQL and in-memory stores behind one unit-of-work seam

use thiserror::Error;

pub mod config;
pub mod domain;
pub mod http;
pub mod publisher;
pub mod services;
pub mod store;

use domain::aggregates::{CartError, OrderError, ReturnError};
use store::StoreError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum StorefrontError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("insufficient stock for {sku}")]
    InsufficientStock { sku: String },

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<OrderError> for StorefrontError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::NoItems => Self::Validation(e.to_string()),
            OrderError::Delivered | OrderError::AlreadyCancelled | OrderError::CancelRequiresRestock | OrderError::InvalidTransition { .. } => {
                Self::Conflict(e.to_string())
            }
        }
    }
}

impl From<CartError> for StorefrontError {
    fn from(e: CartError) -> Self { Self::NotFound(e.to_string()) }
}

impl From<ReturnError> for StorefrontError {
    fn from(e: ReturnError) -> Self {
        match e {
            ReturnError::OrderNotDelivered(_) | ReturnError::InvalidTransition { .. } => Self::Conflict(e.to_string()),
            ReturnError::UnknownOrderItem(_) | ReturnError::UnknownReturnItem(_) => Self::NotFound(e.to_string()),
            ReturnError::EmptyReason | ReturnError::NoItems | ReturnError::ExceedsReturnable { .. } => Self::Validation(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorefrontError>;
