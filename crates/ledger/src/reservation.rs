//! Volume bookkeeping shared by cash and position reservations.

use og_core::types::ReservationId;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Lifecycle stage of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStage {
    Ongoing,
    /// Terminal. Remaining volume is zero for good.
    Canceled,
}

/// Reserved, traded and stage of one reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedVolume {
    pub volume: u32,
    pub traded: u32,
    pub stage: ReservationStage,
}

impl ReservedVolume {
    pub fn new(volume: u32) -> Self {
        Self {
            volume,
            traded: 0,
            stage: ReservationStage::Ongoing,
        }
    }

    /// Volume still held: zero once canceled, else `volume - traded`.
    #[inline]
    pub fn remaining(&self) -> u32 {
        match self.stage {
            ReservationStage::Canceled => 0,
            ReservationStage::Ongoing => self.volume.saturating_sub(self.traded),
        }
    }

    pub fn is_live(&self) -> bool {
        self.remaining() > 0
    }

    /// Record a fill. Exceeding the remaining volume is fatal and leaves the
    /// counters untouched.
    pub fn consume(&mut self, id: ReservationId, volume: u32) -> Result<(), LedgerError> {
        let remaining = self.remaining();
        if volume > remaining {
            return Err(LedgerError::OverConsume {
                id,
                remaining,
                requested: volume,
            });
        }
        self.traded += volume;
        Ok(())
    }

    /// Cancel. Returns `false` if already canceled.
    pub fn cancel(&mut self) -> bool {
        if self.stage == ReservationStage::Canceled {
            return false;
        }
        self.stage = ReservationStage::Canceled;
        true
    }
}
