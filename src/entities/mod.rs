pub mod category;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod product;
pub mod user;

pub use order::OrderStatus;
pub use payment::{PaymentMethod, PaymentStatus};
pub use user::UserRole;
