use serde::{Deserialize, Serialize};

/// Change in ticket availability, fanned out to live storefront listeners.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AvailabilityEvent {
    NumbersReserved {
        reference: String,
        numbers: Vec<String>,
        at: i64,
    },
    NumbersSold {
        reference: String,
        numbers: Vec<String>,
        at: i64,
    },
    NumbersReleased {
        reference: String,
        numbers: Vec<String>,
        at: i64,
    },
}

impl AvailabilityEvent {
    pub fn reserved(reference: &str, numbers: Vec<String>) -> Self {
        Self::NumbersReserved {
            reference: reference.to_string(),
            numbers,
            at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn sold(reference: &str, numbers: Vec<String>) -> Self {
        Self::NumbersSold {
            reference: reference.to_string(),
            numbers,
            at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn released(reference: &str, numbers: Vec<String>) -> Self {
        Self::NumbersReleased {
            reference: reference.to_string(),
            numbers,
            at: chrono::Utc::now().timestamp(),
        }
    }

    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::NumbersReserved { .. } => "numbers_reserved",
            Self::NumbersSold { .. } => "numbers_sold",
            Self::NumbersReleased { .. } => "numbers_released",
        }
    }
}
