//! Position → observation tensor.

use koma_engine::{BOARD_SIZE, Color, HAND_KINDS, PieceKind, Position, Square, StateError};
use ndarray::Array3;

/// Board planes per side: one per piece kind, promotion status included in
/// the kind itself.
const KIND_PLANES: usize = PieceKind::LEN;

/// Hand planes per side, one per droppable kind.
const HAND_PLANES: usize = HAND_KINDS.len();

/// Channel block offsets. Mover-relative: the side to move always occupies
/// the first block of each pair.
const MOVER_BOARD: usize = 0;
const OPPONENT_BOARD: usize = MOVER_BOARD + KIND_PLANES;
const MOVER_HAND: usize = OPPONENT_BOARD + KIND_PLANES;
const OPPONENT_HAND: usize = MOVER_HAND + HAND_PLANES;
const SIDE_TO_MOVE: usize = OPPONENT_HAND + HAND_PLANES;
const PLY: usize = SIDE_TO_MOVE + 1;
const REPETITION: usize = PLY + 1;
const CHECK: usize = REPETITION + 1;

/// Total observation channels (46).
pub const CHANNELS: usize = CHECK + 1;

/// Encodes a position from the mover's point of view.
///
/// Output shape is `(CHANNELS, 9, 9)`. When White is to move the board is
/// rotated 180° so the mover always plays toward row 0; the action-space
/// mapping in [`crate::action`] applies the same rotation, which is the
/// invariant that keeps network outputs and board coordinates in agreement.
///
/// Hand counts are normalized per kind by that kind's own maximum (pawns by
/// 18, rooks by 2, …); a shared divisor would collapse the dynamic range of
/// the low-supply kinds.
pub fn encode_observation(pos: &Position) -> Result<Array3<f32>, StateError> {
    let mover = pos.side_to_move();
    let mut obs = Array3::zeros((CHANNELS, BOARD_SIZE, BOARD_SIZE));

    for (sq, piece) in pos.pieces() {
        let block = if piece.color == mover {
            MOVER_BOARD
        } else {
            OPPONENT_BOARD
        };
        let sq = orient(sq, mover);
        obs[[block + piece.kind.index(), sq.row(), sq.col()]] = 1.0;
    }

    for (relative, color) in [(MOVER_HAND, mover), (OPPONENT_HAND, mover.opponent())] {
        for (slot, kind) in HAND_KINDS.iter().enumerate() {
            let count = pos.hand(color).count(*kind);
            if count > 0 {
                let value = f32::from(count) / f32::from(kind.supply());
                fill_plane(&mut obs, relative + slot, value);
            }
        }
    }

    if mover == Color::Black {
        fill_plane(&mut obs, SIDE_TO_MOVE, 1.0);
    }
    fill_plane(
        &mut obs,
        PLY,
        f32::from(pos.ply()) / f32::from(pos.config().max_plies),
    );
    #[expect(clippy::cast_precision_loss)]
    let repetition = ((pos.repetition_count().saturating_sub(1)) as f32 / 3.0).min(1.0);
    fill_plane(&mut obs, REPETITION, repetition);
    if pos.is_in_check(mover)? {
        fill_plane(&mut obs, CHECK, 1.0);
    }

    Ok(obs)
}

/// The square as seen by `mover`: identity for Black, 180° for White.
#[must_use]
pub const fn orient(sq: Square, mover: Color) -> Square {
    match mover {
        Color::Black => sq,
        Color::White => sq.rotate(),
    }
}

fn fill_plane(obs: &mut Array3<f32>, channel: usize, value: f32) {
    obs.index_axis_mut(ndarray::Axis(0), channel).fill(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_shape() {
        let obs = encode_observation(&Position::new()).unwrap();
        assert_eq!(obs.shape(), &[CHANNELS, BOARD_SIZE, BOARD_SIZE]);
        assert_eq!(CHANNELS, 46);
    }

    #[test]
    fn startpos_black_perspective() {
        let pos = Position::new();
        let obs = encode_observation(&pos).unwrap();
        // Black pawns sit on rank g (row 6) and Black is the mover.
        let pawn_plane = MOVER_BOARD + PieceKind::Pawn.index();
        for col in 0..BOARD_SIZE {
            assert_eq!(obs[[pawn_plane, 6, col]], 1.0);
        }
        // White pawns land in the opponent block on row 2.
        let opp_pawn_plane = OPPONENT_BOARD + PieceKind::Pawn.index();
        for col in 0..BOARD_SIZE {
            assert_eq!(obs[[opp_pawn_plane, 2, col]], 1.0);
        }
        assert_eq!(obs[[SIDE_TO_MOVE, 0, 0]], 1.0);
        assert_eq!(obs[[CHECK, 0, 0]], 0.0);
    }

    #[test]
    fn white_perspective_is_rotated() {
        let mut pos = Position::new();
        pos.make_move(koma_engine::Move::from_usi("7g7f").unwrap())
            .unwrap();
        assert_eq!(pos.side_to_move(), Color::White);
        let obs = encode_observation(&pos).unwrap();
        // After rotation White's own pawns also appear on row 6 of the
        // mover block.
        let pawn_plane = MOVER_BOARD + PieceKind::Pawn.index();
        for col in 0..BOARD_SIZE {
            assert_eq!(obs[[pawn_plane, 6, col]], 1.0);
        }
        // The side-to-move plane is zero for White.
        assert_eq!(obs[[SIDE_TO_MOVE, 4, 4]], 0.0);
    }

    #[test]
    fn hand_planes_normalize_per_kind() {
        // Two rooks in hand is that kind's maximum → 1.0, not 2/18.
        let pos =
            Position::from_sfen("4k4/9/9/9/9/9/9/9/4K4 b 2R2P 1").unwrap();
        let obs = encode_observation(&pos).unwrap();
        let rook_slot = HAND_KINDS.iter().position(|&k| k == PieceKind::Rook).unwrap();
        let pawn_slot = HAND_KINDS.iter().position(|&k| k == PieceKind::Pawn).unwrap();
        assert_eq!(obs[[MOVER_HAND + rook_slot, 0, 0]], 1.0);
        let expected_pawn = 2.0 / 18.0;
        assert!((obs[[MOVER_HAND + pawn_slot, 0, 0]] - expected_pawn).abs() < 1e-6);
    }

    #[test]
    fn check_plane_is_set_when_mover_in_check() {
        // White to move, white king on 5a checked by a black gold on 5b.
        let pos = Position::from_sfen("4k4/4G4/9/9/9/9/9/9/4K4 w - 1").unwrap();
        let obs = encode_observation(&pos).unwrap();
        assert_eq!(obs[[CHECK, 0, 0]], 1.0);
    }
}
