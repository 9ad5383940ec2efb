pub mod models;
pub mod pii;

pub use models::events::AvailabilityEvent;
pub use pii::{mask_email, Masked};
