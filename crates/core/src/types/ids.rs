//! Identifier newtypes.
//!
//! String identifiers come from the exchange or the client (users,
//! instruments, exchange order ids); numeric identifiers are assigned locally
//! from monotonic counters.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new identifier.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Trading user (investor) identifier.
    UserId
);
string_id!(
    /// Instrument identifier (e.g., "rb2405").
    InstrumentId
);
string_id!(
    /// Exchange identifier (e.g., "SHFE").
    ExchangeId
);
string_id!(
    /// Locally assigned, globally unique reference of one sub-order.
    OrderRef
);
string_id!(
    /// Exchange-assigned order identifier, known once the exchange accepts
    /// the sub-order.
    OrderSysId
);

/// Locally generated identity of one client instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "REQ-{}", self.0)
    }
}

/// Identity of one reservation within its owning ledger or position book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReservationId(pub u64);

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RSV-{}", self.0)
    }
}

/// Identity of one position lot within a position book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LotId(pub u64);

impl fmt::Display for LotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LOT-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_id_display() {
        assert_eq!(format!("{}", RequestId(42)), "REQ-42");
        assert_eq!(format!("{}", ReservationId(7)), "RSV-7");
        assert_eq!(format!("{}", LotId(3)), "LOT-3");
    }

    #[test]
    fn test_string_id_roundtrip() {
        let id = InstrumentId::new("rb2405");
        assert_eq!(id.as_str(), "rb2405");
        assert_eq!(format!("{}", id), "rb2405");
        assert_eq!(id, InstrumentId("rb2405".to_string()));
    }

    #[test]
    fn test_request_id_ordering() {
        assert!(RequestId(1) < RequestId(2));
    }
}
