//! Observation encoding and the fixed action space.
//!
//! This crate is the boundary between the game engine and the policy
//! network: [`encode_observation`] maps a position to the `(46, 9, 9)`
//! input tensor, and [`action`] maps engine moves onto a fixed
//! 13689-slot action space with a legality mask. Both sides apply the same
//! perspective normalization — the board is rotated 180° when White is to
//! move — so the network always sees itself playing "up" and mask indices
//! always agree with plane coordinates.

pub use self::{action::*, planes::*};

pub mod action;
pub mod planes;

/// An action index could not be mapped back to a move.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum ActionError {
    #[display("action index {index} is outside the action space")]
    OutOfRange {
        #[error(not(source))]
        index: usize,
    },
    #[display("action index {index} does not decode to a well-formed move")]
    Malformed {
        #[error(not(source))]
        index: usize,
    },
}
