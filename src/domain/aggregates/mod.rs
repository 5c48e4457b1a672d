//! Aggregates module
pub mod variant;
pub mod order;
pub mod cart;
pub mod stock;
pub mod user;
pub mod returns;

pub use variant::VariantView;
pub use order::{generate_order_number, DeliveryDetails, Order, OrderError, OrderItem, OrderLine, OrderStatus};
pub use cart::{Cart, CartError, CartItem, CartLine, CartView};
pub use stock::{MovementType, StockMovement};
pub use user::{User, UserRole};
pub use returns::{RequestedReturnItem, Restock, ReturnError, ReturnItem, ReturnItemStatus, ReturnRequest};
