use serde::{Deserialize, Serialize};

use super::piece::{Color, PieceKind};
use crate::StateError;

/// The 7 droppable kinds, in hand-table order. Kings are never in hand.
pub const HAND_KINDS: [PieceKind; 7] = [
    PieceKind::Pawn,
    PieceKind::Lance,
    PieceKind::Knight,
    PieceKind::Silver,
    PieceKind::Gold,
    PieceKind::Bishop,
    PieceKind::Rook,
];

/// Index of a kind within [`HAND_KINDS`]. Promoted kinds map through their
/// base form; the King has no hand slot.
#[must_use]
pub const fn hand_index(kind: PieceKind) -> Option<usize> {
    match kind.demote() {
        PieceKind::Pawn => Some(0),
        PieceKind::Lance => Some(1),
        PieceKind::Knight => Some(2),
        PieceKind::Silver => Some(3),
        PieceKind::Gold => Some(4),
        PieceKind::Bishop => Some(5),
        PieceKind::Rook => Some(6),
        _ => None,
    }
}

/// One player's komadai: counts of captured pieces available for dropping.
///
/// Counts are always of unpromoted base kinds. Decrementing an empty slot is
/// a [`StateError`], not a quiet no-op: an underflow here means the
/// make/undo bookkeeping has already diverged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Hand {
    counts: [u8; HAND_KINDS.len()],
}

impl Hand {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            counts: [0; HAND_KINDS.len()],
        }
    }

    /// Pieces of `kind` held. Promoted kinds query their base slot; a King
    /// query reports zero.
    #[must_use]
    pub fn count(&self, kind: PieceKind) -> u8 {
        hand_index(kind).map_or(0, |i| self.counts[i])
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|&c| c == 0)
    }

    /// Adds one piece, demoted to its base kind.
    ///
    /// Adding a King is state corruption: kings are never captured by legal
    /// play. Exceeding the fixed per-kind supply is likewise corruption.
    pub fn add(&mut self, kind: PieceKind) -> Result<(), StateError> {
        let index = hand_index(kind).ok_or(StateError::KingCaptured)?;
        self.counts[index] += 1;
        if self.counts[index] > kind.supply() {
            return Err(StateError::SupplyViolation {
                kind: kind.demote(),
                counted: self.counts[index],
                expected: kind.supply(),
            });
        }
        Ok(())
    }

    /// Removes one piece of `kind`'s base form.
    pub fn remove(&mut self, kind: PieceKind, color: Color) -> Result<(), StateError> {
        let index = hand_index(kind).ok_or(StateError::KingCaptured)?;
        if self.counts[index] == 0 {
            return Err(StateError::HandUnderflow {
                color,
                kind: kind.demote(),
            });
        }
        self.counts[index] -= 1;
        Ok(())
    }

    /// Kinds currently held, with their counts.
    pub fn pieces(&self) -> impl Iterator<Item = (PieceKind, u8)> + '_ {
        HAND_KINDS
            .iter()
            .zip(&self.counts)
            .filter(|(_, count)| **count > 0)
            .map(|(&kind, &count)| (kind, count))
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove() {
        let mut hand = Hand::empty();
        hand.add(PieceKind::Pawn).unwrap();
        hand.add(PieceKind::Pawn).unwrap();
        assert_eq!(hand.count(PieceKind::Pawn), 2);
        hand.remove(PieceKind::Pawn, Color::Black).unwrap();
        assert_eq!(hand.count(PieceKind::Pawn), 1);
    }

    #[test]
    fn captured_promoted_piece_demotes() {
        let mut hand = Hand::empty();
        hand.add(PieceKind::Dragon).unwrap();
        assert_eq!(hand.count(PieceKind::Rook), 1);
        assert_eq!(hand.count(PieceKind::Dragon), 1);
    }

    #[test]
    fn underflow_is_corruption() {
        let mut hand = Hand::empty();
        let err = hand.remove(PieceKind::Gold, Color::White).unwrap_err();
        assert_eq!(
            err,
            StateError::HandUnderflow {
                color: Color::White,
                kind: PieceKind::Gold,
            }
        );
    }

    #[test]
    fn king_capture_is_corruption() {
        let mut hand = Hand::empty();
        assert_eq!(
            hand.add(PieceKind::King).unwrap_err(),
            StateError::KingCaptured
        );
    }

    #[test]
    fn oversupply_is_corruption() {
        let mut hand = Hand::empty();
        hand.add(PieceKind::Rook).unwrap();
        hand.add(PieceKind::Rook).unwrap();
        assert!(hand.add(PieceKind::Rook).is_err());
    }
}
