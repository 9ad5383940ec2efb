use axum::{extract::State, http::header, response::IntoResponse};
use prometheus::{opts, CounterVec, Encoder, Registry, TextEncoder};

use crate::{error::AppError, state::AppState};

/// Process-local Prometheus registry for the storefront and webhook counters.
pub struct ApiMetrics {
    registry: Registry,
    /// Labels: `outcome` (created, conflict, invalid, error)
    reservations: CounterVec,
    /// Labels: `outcome` (confirmed, released, duplicate, ignored, deferred, failed, bad_signature)
    reconciliations: CounterVec,
}

impl ApiMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reservations = CounterVec::new(
            opts!("rifa_reservations_total", "Reservation attempts by outcome"),
            &["outcome"],
        )?;
        let reconciliations = CounterVec::new(
            opts!("rifa_webhook_reconciliations_total", "Gateway notifications by reconciliation outcome"),
            &["outcome"],
        )?;

        registry.register(Box::new(reservations.clone()))?;
        registry.register(Box::new(reconciliations.clone()))?;

        Ok(Self { registry, reservations, reconciliations })
    }

    pub fn record_reservation(&self, outcome: &str) {
        self.reservations.with_label_values(&[outcome]).inc();
    }

    pub fn record_reconciliation(&self, outcome: &str) {
        self.reconciliations.with_label_values(&[outcome]).inc();
    }

    pub fn reservation_count(&self, outcome: &str) -> u64 {
        self.reservations.with_label_values(&[outcome]).get() as u64
    }

    pub fn reconciliation_count(&self, outcome: &str) -> u64 {
        self.reconciliations.with_label_values(&[outcome]).get() as u64
    }

    pub fn export(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let body = state
        .metrics
        .export()
        .map_err(|e| AppError::InternalServerError(format!("Metrics export failed: {}", e)))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_up_in_export() {
        let metrics = ApiMetrics::new().unwrap();
        metrics.record_reservation("created");
        metrics.record_reservation("created");
        metrics.record_reconciliation("duplicate");

        assert_eq!(metrics.reservation_count("created"), 2);
        let text = metrics.export().unwrap();
        assert!(text.contains("rifa_reservations_total{outcome=\"created\"} 2"));
        assert!(text.contains("rifa_webhook_reconciliations_total{outcome=\"duplicate\"} 1"));
    }
}
