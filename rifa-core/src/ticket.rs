use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Size of the raffle inventory: numbers 000 through 999.
pub const TOTAL_NUMBERS: u16 = 1000;

/// One raffle ticket number.
///
/// Canonical form is the zero-padded three digit string (`"007"`). Integers and
/// unpadded strings are accepted on input and normalize to the same value, so
/// `7`, `"7"` and `"007"` all denote the same ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketNumber(u16);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TicketNumberError {
    #[error("Ticket number is empty")]
    Empty,
    #[error("Ticket number is not numeric: {0}")]
    NotNumeric(String),
    #[error("Ticket number out of range (000-999): {0}")]
    OutOfRange(String),
}

impl TicketNumber {
    pub fn new(value: u16) -> Result<Self, TicketNumberError> {
        if value >= TOTAL_NUMBERS {
            return Err(TicketNumberError::OutOfRange(value.to_string()));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u16 {
        self.0
    }

    /// Every number in the inventory, ascending.
    pub fn all() -> impl Iterator<Item = TicketNumber> {
        (0..TOTAL_NUMBERS).map(TicketNumber)
    }
}

impl FromStr for TicketNumber {
    type Err = TicketNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(TicketNumberError::Empty);
        }
        if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TicketNumberError::NotNumeric(trimmed.to_string()));
        }

        // Leading zeros carry no meaning; anything longer than three significant
        // digits is out of range and would overflow the parse anyway.
        let significant = trimmed.trim_start_matches('0');
        if significant.len() > 3 {
            return Err(TicketNumberError::OutOfRange(trimmed.to_string()));
        }
        let value = if significant.is_empty() {
            0
        } else {
            significant
                .parse::<u16>()
                .map_err(|_| TicketNumberError::NotNumeric(trimmed.to_string()))?
        };

        TicketNumber::new(value).map_err(|_| TicketNumberError::OutOfRange(trimmed.to_string()))
    }
}

impl TryFrom<i64> for TicketNumber {
    type Error = TicketNumberError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u16::try_from(value)
            .map_err(|_| TicketNumberError::OutOfRange(value.to_string()))
            .and_then(TicketNumber::new)
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

impl Serialize for TicketNumber {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

struct TicketNumberVisitor;

impl<'de> Visitor<'de> for TicketNumberVisitor {
    type Value = TicketNumber;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a ticket number between 000 and 999, as string or integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        let v = i64::try_from(v).map_err(|_| E::custom(TicketNumberError::OutOfRange(v.to_string())))?;
        TicketNumber::try_from(v).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        TicketNumber::try_from(v).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for TicketNumber {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(TicketNumberVisitor)
    }
}

/// Comma separated canonical numbers, for messages and logs.
pub fn join<'a, I>(numbers: I) -> String
where
    I: IntoIterator<Item = &'a TicketNumber>,
{
    numbers
        .into_iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
