use serde::Serialize;

use rifa_core::TOTAL_NUMBERS;

/// Sale terms shared by reservation, checkout and the public config endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RaffleTerms {
    /// Price of one number, in whole currency units.
    pub price_per_ticket: i64,

    /// Most numbers a single purchase may hold.
    pub max_numbers_per_purchase: usize,

    pub currency: String,

    pub raffle_name: String,
}

impl RaffleTerms {
    /// Amount owed for `count` numbers. None on overflow.
    pub fn amount_for(&self, count: usize) -> Option<i64> {
        i64::try_from(count).ok()?.checked_mul(self.price_per_ticket)
    }

    pub fn total_numbers(&self) -> u16 {
        TOTAL_NUMBERS
    }
}
