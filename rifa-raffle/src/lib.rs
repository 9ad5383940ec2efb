pub mod checkout;
pub mod ledger;
pub mod notification;
pub mod pricing;
pub mod reaper;
pub mod reconciler;
pub mod reservation;
pub mod retry;

pub use checkout::{CheckoutError, CheckoutService, ReferenceStatus};
pub use ledger::{NumberLedger, NumberStatus, Progress};
pub use notification::{GatewayNotification, RawNotification, ResolvedPayment};
pub use pricing::RaffleTerms;
pub use reaper::ClaimReaper;
pub use reconciler::{PaymentReconciler, Reconciliation};
pub use reservation::{ReservationError, ReservationManager, ReservationRequest};
pub use retry::RetryPolicy;
