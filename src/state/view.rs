//! Screen progression of one device.

use thiserror::Error;

/// Screen a device is on. Moves forward only; leaving the room starts over from `Welcome`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ClientView {
    /// No room yet: create one or enter a code.
    #[default]
    Welcome,
    /// Room known, profile not submitted.
    Profile,
    /// Joined and waiting for the creator to start.
    Lobby,
    /// A session has been observed.
    Game,
    /// The session is completed; round history is shown.
    Memory,
}

/// Error returned when a view change would move backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid view transition: {from:?} cannot move back to {to:?}")]
pub struct InvalidTransition {
    /// Current view.
    pub from: ClientView,
    /// Requested view.
    pub to: ClientView,
}

impl ClientView {
    fn rank(self) -> u8 {
        match self {
            ClientView::Welcome => 0,
            ClientView::Profile => 1,
            ClientView::Lobby => 2,
            ClientView::Game => 3,
            ClientView::Memory => 4,
        }
    }

    /// Move to `to`. Returns `Ok(false)` when already there; skipping ahead is allowed.
    pub fn advance(&mut self, to: ClientView) -> Result<bool, InvalidTransition> {
        if to == *self {
            return Ok(false);
        }
        if to.rank() < self.rank() {
            return Err(InvalidTransition { from: *self, to });
        }
        *self = to;
        Ok(true)
    }
}
