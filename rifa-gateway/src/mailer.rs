use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use rifa_core::notifier::{NotifyError, Notifier};
use rifa_core::{PendingClaim, Sale};
use rifa_shared::mask_email;

/// Thousands separated with dots, as amounts are written in COP.
pub fn format_amount(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(ch);
    }
    if amount < 0 {
        out.insert(0, '-');
    }
    out
}

/// Buyer-supplied text is inserted into HTML bodies only through this.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn confirmation_body(sale: &Sale, currency: &str) -> String {
    format!(
        r#"<h2>¡Gracias, {name}!</h2>
<p>Tu pago fue aprobado y tus números quedaron registrados correctamente:</p>
<h3>{numbers}</h3>
<p><b>Monto:</b> ${amount} {currency}</p>
<p><b>Método:</b> {method}</p>
<p><b>Referencia:</b> {reference}</p>
<p>Fecha: {paid_at}</p>
<hr>
<p>¡Mucha suerte en el sorteo!</p>"#,
        name = escape_html(&sale.buyer_name),
        numbers = sale.number_strings().join(", "),
        amount = format_amount(sale.amount_paid),
        currency = escape_html(currency),
        method = escape_html(&sale.payment_method),
        reference = escape_html(&sale.reference),
        paid_at = sale.paid_at.format("%Y-%m-%d %H:%M UTC"),
    )
}

fn rejection_body(claim: &PendingClaim) -> String {
    format!(
        r#"<h2>Hola, {name}</h2>
<p>Tu pago para la referencia <b>{reference}</b> no fue aprobado.</p>
<p>Los números {numbers} quedaron libres nuevamente. Puedes intentar otra compra cuando quieras.</p>"#,
        name = escape_html(&claim.buyer_name),
        reference = escape_html(&claim.reference),
        numbers = claim.number_strings().join(", "),
    )
}

pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}

/// Sends buyer notifications over SMTP.
#[derive(Clone)]
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
    raffle_name: String,
    currency: String,
}

impl SmtpNotifier {
    pub fn new(settings: SmtpSettings, raffle_name: String, currency: String) -> Result<Self, NotifyError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
            .map_err(|e| NotifyError::Build(format!("SMTP relay error: {e}")))?
            .port(settings.port)
            .credentials(Credentials::new(settings.username, settings.password))
            .build();

        Ok(Self {
            transport,
            from: format!("{} <{}>", settings.from_name, settings.from_email),
            raffle_name,
            currency,
        })
    }

    async fn send(&self, to: &str, subject: String, html: String) -> Result<(), NotifyError> {
        let email = Message::builder()
            .from(self.from.parse().map_err(|e| NotifyError::InvalidAddress(format!("{e}")))?)
            .to(to.parse().map_err(|e| NotifyError::InvalidAddress(format!("{e}")))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html)
            .map_err(|e| NotifyError::Build(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_confirmation(&self, sale: &Sale) -> Result<(), NotifyError> {
        self.send(
            &sale.buyer_email,
            format!("Pago confirmado - {}", self.raffle_name),
            confirmation_body(sale, &self.currency),
        )
        .await?;
        tracing::info!(reference = %sale.reference, to = %mask_email(&sale.buyer_email), "Confirmation e-mail sent");
        Ok(())
    }

    async fn send_rejection(&self, claim: &PendingClaim) -> Result<(), NotifyError> {
        self.send(
            &claim.buyer_email,
            format!("Pago no aprobado - {}", self.raffle_name),
            rejection_body(claim),
        )
        .await?;
        tracing::info!(reference = %claim.reference, to = %mask_email(&claim.buyer_email), "Rejection e-mail sent");
        Ok(())
    }
}

/// Used when no SMTP server is configured: notifications only reach the log.
#[derive(Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_confirmation(&self, sale: &Sale) -> Result<(), NotifyError> {
        tracing::info!(
            reference = %sale.reference,
            to = %mask_email(&sale.buyer_email),
            numbers = %sale.number_strings().join(","),
            "SMTP not configured, confirmation not e-mailed"
        );
        Ok(())
    }

    async fn send_rejection(&self, claim: &PendingClaim) -> Result<(), NotifyError> {
        tracing::info!(
            reference = %claim.reference,
            to = %mask_email(&claim.buyer_email),
            "SMTP not configured, rejection not e-mailed"
        );
        Ok(())
    }
}
