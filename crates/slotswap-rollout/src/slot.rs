//! Active/previous slot bookkeeping.

use slotswap_core::SlotIdentity;

/// Which slot is currently serving.
///
/// Plain owned state: the deployer holds it behind its single-flight
/// guard and is the only code that toggles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotState {
    current: SlotIdentity,
}

impl Default for SlotState {
    /// Starts on `B` so the first cutover targets `A`.
    fn default() -> Self {
        Self {
            current: SlotIdentity::B,
        }
    }
}

impl SlotState {
    pub fn new(current: SlotIdentity) -> Self {
        Self { current }
    }

    pub fn current_slot(&self) -> SlotIdentity {
        self.current
    }

    pub fn previous_slot(&self) -> SlotIdentity {
        self.current.complement()
    }

    /// Flip the active slot and return the new one.
    pub fn toggle(&mut self) -> SlotIdentity {
        self.current = self.current.complement();
        self.current
    }
}
