//! Move ↔ action-index mapping and the legality mask.

use koma_engine::{Color, HAND_KINDS, Move, Position, SQUARE_COUNT, Square, StateError, hand_index};

use crate::ActionError;

use super::planes::orient;

/// Board-move slots: (from, to, promote) in the mover's frame.
pub const BOARD_ACTIONS: usize = SQUARE_COUNT * SQUARE_COUNT * 2;

/// Drop slots: (droppable kind, to).
pub const DROP_ACTIONS: usize = HAND_KINDS.len() * SQUARE_COUNT;

/// Total fixed action space (13689). Most slots are illegal in any given
/// position; the mask says which are live.
pub const ACTION_SPACE: usize = BOARD_ACTIONS + DROP_ACTIONS;

/// Maps a move to its action index in `perspective`'s frame.
///
/// The same rotation as [`crate::planes::encode_observation`] is applied,
/// so a network trained on mover-relative planes indexes moves
/// mover-relatively too.
pub fn encode_move(mv: Move, perspective: Color) -> Result<usize, ActionError> {
    match mv {
        Move::Board { from, to, promote } => {
            let from = orient(from, perspective).index();
            let to = orient(to, perspective).index();
            Ok((from * SQUARE_COUNT + to) * 2 + usize::from(promote))
        }
        Move::Drop { to, kind } => {
            let slot = hand_index(kind).ok_or(ActionError::Malformed { index: 0 })?;
            let to = orient(to, perspective).index();
            Ok(BOARD_ACTIONS + slot * SQUARE_COUNT + to)
        }
    }
}

/// Inverse of [`encode_move`]. Rejects indices outside the space and
/// degenerate board moves (`from == to`); legality beyond shape is the
/// rules engine's concern.
pub fn decode_action(index: usize, perspective: Color) -> Result<Move, ActionError> {
    if index >= ACTION_SPACE {
        return Err(ActionError::OutOfRange { index });
    }
    if index < BOARD_ACTIONS {
        let promote = index % 2 == 1;
        let cell = index / 2;
        let to = cell % SQUARE_COUNT;
        let from = cell / SQUARE_COUNT;
        if from == to {
            return Err(ActionError::Malformed { index });
        }
        let from = orient(square(from), perspective);
        let to = orient(square(to), perspective);
        Ok(Move::Board { from, to, promote })
    } else {
        let rest = index - BOARD_ACTIONS;
        let kind = HAND_KINDS[rest / SQUARE_COUNT];
        let to = orient(square(rest % SQUARE_COUNT), perspective);
        Ok(Move::Drop { to, kind })
    }
}

fn square(index: usize) -> Square {
    Square::from_index(index).expect("index bounded by SQUARE_COUNT")
}

/// The legal move set of a position projected onto the fixed action space.
#[derive(Debug, Clone)]
pub struct LegalActions {
    mask: Vec<bool>,
    moves: Vec<(usize, Move)>,
}

impl LegalActions {
    /// Builds the mask for the side to move. Runs legal move generation,
    /// which simulates on (and restores) the position.
    pub fn build(pos: &mut Position) -> Result<Self, StateError> {
        let perspective = pos.side_to_move();
        let legal = pos.legal_moves()?;
        let mut mask = vec![false; ACTION_SPACE];
        let mut moves = Vec::with_capacity(legal.len());
        for mv in legal {
            let index = encode_move(mv, perspective)
                .expect("legal moves always encode");
            mask[index] = true;
            moves.push((index, mv));
        }
        Ok(Self { mask, moves })
    }

    /// Boolean mask over the whole action space.
    #[must_use]
    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// Number of legal actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.moves.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// The move behind a masked-in action index, if that index is legal.
    #[must_use]
    pub fn decode(&self, index: usize) -> Option<Move> {
        self.moves
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, mv)| *mv)
    }

    /// All `(action index, move)` pairs.
    #[must_use]
    pub fn indexed(&self) -> &[(usize, Move)] {
        &self.moves
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koma_engine::PieceKind;

    #[test]
    fn action_space_size() {
        assert_eq!(ACTION_SPACE, 13_689);
    }

    #[test]
    fn encode_decode_round_trip_both_perspectives() {
        let moves = [
            Move::from_usi("7g7f").unwrap(),
            Move::from_usi("8h2b+").unwrap(),
            Move::from_usi("P*5e").unwrap(),
            Move::from_usi("R*1a").unwrap(),
        ];
        for color in Color::ALL {
            for mv in moves {
                let index = encode_move(mv, color).unwrap();
                assert_eq!(decode_action(index, color).unwrap(), mv);
            }
        }
    }

    #[test]
    fn perspectives_disagree_on_indices() {
        let mv = Move::from_usi("7g7f").unwrap();
        let black = encode_move(mv, Color::Black).unwrap();
        let white = encode_move(mv, Color::White).unwrap();
        assert_ne!(black, white);
    }

    #[test]
    fn decode_rejects_bad_indices() {
        assert!(matches!(
            decode_action(ACTION_SPACE, Color::Black),
            Err(ActionError::OutOfRange { .. })
        ));
        // from == to inside the board block.
        let degenerate = (3 * SQUARE_COUNT + 3) * 2;
        assert!(matches!(
            decode_action(degenerate, Color::Black),
            Err(ActionError::Malformed { .. })
        ));
    }

    #[test]
    fn mask_matches_legal_moves() {
        let mut pos = Position::new();
        let actions = LegalActions::build(&mut pos).unwrap();
        assert_eq!(actions.len(), 30);
        let set_bits = actions.mask().iter().filter(|&&b| b).count();
        assert_eq!(set_bits, 30);
        for &(index, mv) in actions.indexed() {
            assert_eq!(actions.decode(index), Some(mv));
            assert!(actions.mask()[index]);
        }
    }

    #[test]
    fn drop_indices_live_in_the_drop_block() {
        let mut pos =
            Position::from_sfen("4k4/9/9/9/9/9/9/9/4K4 b G 1").unwrap();
        let actions = LegalActions::build(&mut pos).unwrap();
        let gold_slot = HAND_KINDS
            .iter()
            .position(|&k| k == PieceKind::Gold)
            .unwrap();
        for &(index, mv) in actions.indexed() {
            if mv.is_drop() {
                assert!(index >= BOARD_ACTIONS + gold_slot * SQUARE_COUNT);
                assert!(index < BOARD_ACTIONS + (gold_slot + 1) * SQUARE_COUNT);
            }
        }
    }
}
