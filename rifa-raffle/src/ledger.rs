use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use rifa_core::repository::TicketRepository;
use rifa_core::{Occupancy, StoreResult, TicketNumber, TOTAL_NUMBERS};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NumberStatus {
    pub number: TicketNumber,
    pub available: bool,
}

/// Sales progress. Only sold numbers count towards the percentage.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Progress {
    pub sold: usize,
    pub reserved: usize,
    pub total: u16,
    pub percentage: u8,
}

impl Progress {
    pub fn from_counts(sold: usize, reserved: usize) -> Self {
        let percentage = (sold * 100 / usize::from(TOTAL_NUMBERS)).min(100) as u8;
        Self { sold, reserved, total: TOTAL_NUMBERS, percentage }
    }
}

/// Read-only view of which numbers are free, derived from persisted claims
/// and sales on every call.
#[derive(Clone)]
pub struct NumberLedger {
    tickets: Arc<dyn TicketRepository>,
}

impl NumberLedger {
    pub fn new(tickets: Arc<dyn TicketRepository>) -> Self {
        Self { tickets }
    }

    /// Numbers held by a live claim or a sale.
    pub async fn occupied_numbers(&self) -> StoreResult<BTreeSet<TicketNumber>> {
        let occupied = self.tickets.occupied_numbers().await?;
        Ok(occupied.into_iter().map(|(number, _)| number).collect())
    }

    /// Every number in the inventory, ascending, with its availability.
    pub async fn availability(&self) -> StoreResult<Vec<NumberStatus>> {
        let occupied = self.occupied_numbers().await?;
        Ok(TicketNumber::all()
            .map(|number| NumberStatus { number, available: !occupied.contains(&number) })
            .collect())
    }

    pub async fn progress(&self) -> StoreResult<Progress> {
        let occupied = self.tickets.occupied_numbers().await?;
        let sold = occupied.iter().filter(|(_, o)| *o == Occupancy::Sold).count();
        Ok(Progress::from_counts(sold, occupied.len() - sold))
    }
}
