pub mod mailer;
pub mod mercadopago;
pub mod mock;
pub mod signature;

pub use mailer::{LogNotifier, SmtpNotifier, SmtpSettings};
pub use mercadopago::MercadoPagoClient;
pub use mock::{MockPaymentGateway, RecordingNotifier};
pub use signature::SignatureError;
