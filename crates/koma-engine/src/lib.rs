pub use self::{core::*, engine::*};

pub mod core;
pub mod engine;

/// A move was rejected without mutating the position.
///
/// `Illegal` and `GameOver` are recoverable: the caller should re-query the
/// legal move set (or stop driving a finished game). `State` wraps a detected
/// invariant violation and must never be treated as an ordinary rejection.
#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum MoveError {
    #[display("move {mv} is not legal in the current position")]
    Illegal {
        #[error(not(source))]
        mv: crate::core::Move,
    },
    #[display("game is already over")]
    GameOver,
    #[display("state corruption detected: {_0}")]
    State(StateError),
}

impl From<StateError> for MoveError {
    fn from(err: StateError) -> Self {
        MoveError::State(err)
    }
}

/// An internal invariant of the position was violated.
///
/// These are programming errors, not illegal moves: the affected episode or
/// process must halt rather than continue on a corrupt position. Converting a
/// `StateError` into an illegal-move rejection is forbidden everywhere in
/// this crate.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum StateError {
    #[display("no king found for {color:?}")]
    MissingKing {
        #[error(not(source))]
        color: crate::core::Color,
    },
    #[display("hand count underflow for {color:?} {kind:?}")]
    HandUnderflow {
        color: crate::core::Color,
        kind: crate::core::PieceKind,
    },
    #[display("square {square} does not hold the expected piece")]
    SquareMismatch {
        #[error(not(source))]
        square: crate::core::Square,
    },
    #[display("undo record does not match the last recorded move")]
    HistoryMismatch,
    #[display("piece supply violated for {kind:?}: counted {counted}, expected {expected}")]
    SupplyViolation {
        kind: crate::core::PieceKind,
        counted: u8,
        expected: u8,
    },
    #[display("king was captured; legal move generation must prevent this")]
    KingCaptured,
}

/// A SFEN string could not be parsed into a position.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum SfenError {
    #[display("SFEN is missing the {_0} field")]
    MissingField(#[error(not(source))] &'static str),
    #[display("invalid board field: {_0}")]
    InvalidBoard(#[error(not(source))] String),
    #[display("invalid side-to-move field: {_0}")]
    InvalidSideToMove(#[error(not(source))] String),
    #[display("invalid hand field: {_0}")]
    InvalidHand(#[error(not(source))] String),
    #[display("invalid ply field: {_0}")]
    InvalidPly(#[error(not(source))] String),
}
