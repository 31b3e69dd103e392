use std::sync::LazyLock;

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

use super::{
    hand::{HAND_KINDS, Hand},
    piece::{Color, Piece, PieceKind},
    square::{SQUARE_COUNT, Square},
};

/// Largest per-kind hand count (18 pawns) plus one, sizing the hand key
/// table.
const HAND_COUNT_KEYS: usize = 19;

/// Pre-computed random keys for Zobrist position hashing.
///
/// A position hash covers board contents, both hands, and the side to move,
/// matching the repetition-detection contract: the hash recorded after move
/// N encodes whoever moves next.
pub struct ZobristKeys {
    board: [[[u64; 2]; PieceKind::LEN]; SQUARE_COUNT],
    hand: [[[u64; HAND_COUNT_KEYS]; HAND_KINDS.len()]; 2],
    white_to_move: u64,
}

impl ZobristKeys {
    /// Keys are drawn from a PCG stream with a fixed seed so hashes are
    /// stable across processes and runs.
    fn new() -> Self {
        let mut rng = Pcg64Mcg::seed_from_u64(0x6b6f_6d61);
        let mut keys = ZobristKeys {
            board: [[[0; 2]; PieceKind::LEN]; SQUARE_COUNT],
            hand: [[[0; HAND_COUNT_KEYS]; HAND_KINDS.len()]; 2],
            white_to_move: 0,
        };
        for square in &mut keys.board {
            for kind in square.iter_mut() {
                for key in kind.iter_mut() {
                    *key = rng.next_u64();
                }
            }
        }
        for color in &mut keys.hand {
            for slot in color.iter_mut() {
                // Count zero contributes nothing so an empty hand hashes
                // identically however it was reached.
                for key in slot.iter_mut().skip(1) {
                    *key = rng.next_u64();
                }
            }
        }
        keys.white_to_move = rng.next_u64();
        keys
    }

    #[must_use]
    pub fn piece_key(&self, square: Square, piece: Piece) -> u64 {
        self.board[square.index()][piece.kind.index()][piece.color.index()]
    }

    #[must_use]
    pub fn hand_key(&self, color: Color, slot: usize, count: u8) -> u64 {
        self.hand[color.index()][slot][usize::from(count)]
    }

    /// Full hash over board squares, hands, and side to move.
    #[must_use]
    pub fn hash(
        &self,
        pieces: impl Iterator<Item = (Square, Piece)>,
        hands: &[Hand; 2],
        side_to_move: Color,
    ) -> u64 {
        let mut hash = 0;
        for (square, piece) in pieces {
            hash ^= self.piece_key(square, piece);
        }
        for color in Color::ALL {
            for (slot, kind) in HAND_KINDS.iter().enumerate() {
                let count = hands[color.index()].count(*kind);
                hash ^= self.hand_key(color, slot, count);
            }
        }
        if side_to_move == Color::White {
            hash ^= self.white_to_move;
        }
        hash
    }
}

/// Global key table, generated once.
pub static ZOBRIST: LazyLock<ZobristKeys> = LazyLock::new(ZobristKeys::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_to_move_changes_hash() {
        let hands = [Hand::empty(), Hand::empty()];
        let pieces = [(
            Square::new(4, 4),
            Piece::new(PieceKind::King, Color::Black),
        )];
        let black = ZOBRIST.hash(pieces.iter().copied(), &hands, Color::Black);
        let white = ZOBRIST.hash(pieces.iter().copied(), &hands, Color::White);
        assert_ne!(black, white);
    }

    #[test]
    fn hand_count_changes_hash() {
        let pieces: [(Square, Piece); 0] = [];
        let empty = [Hand::empty(), Hand::empty()];
        let mut one_pawn = empty;
        one_pawn[Color::Black.index()].add(PieceKind::Pawn).unwrap();
        let a = ZOBRIST.hash(pieces.iter().copied(), &empty, Color::Black);
        let b = ZOBRIST.hash(pieces.iter().copied(), &one_pawn, Color::Black);
        assert_ne!(a, b);
    }

    #[test]
    fn keys_are_deterministic() {
        let fresh = ZobristKeys::new();
        let sq = Square::new(0, 0);
        let piece = Piece::new(PieceKind::Pawn, Color::Black);
        assert_eq!(fresh.piece_key(sq, piece), ZOBRIST.piece_key(sq, piece));
    }
}
