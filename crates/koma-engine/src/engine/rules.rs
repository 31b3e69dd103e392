//! Legal move generation and check detection.
//!
//! The engine follows the classic simulate-then-undo discipline: every
//! pseudo-legal candidate is applied to the real position, the mover's king
//! is tested for safety exactly once, and the move is reversed. Rollback is
//! owned by a [`Simulation`] guard so no exit path — early return, `?`, or
//! panic — can leave the shared position mutated.

use arrayvec::ArrayVec;

use crate::{
    StateError,
    core::{
        hand::hand_index,
        mov::Move,
        piece::{Color, Piece, PieceKind},
        square::{BOARD_SIZE, Square},
    },
};

use super::position::{MoveRecord, Position};

/// Single-step offsets, expressed for Black (moving toward row 0). White
/// mirrors the row component.
const GOLD_STEPS: [(i8, i8); 6] = [(-1, -1), (-1, 0), (-1, 1), (0, -1), (0, 1), (1, 0)];
const SILVER_STEPS: [(i8, i8); 5] = [(-1, -1), (-1, 0), (-1, 1), (1, -1), (1, 1)];
const KING_STEPS: [(i8, i8); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];
const KNIGHT_STEPS: [(i8, i8); 2] = [(-2, -1), (-2, 1)];
const PAWN_STEP: [(i8, i8); 1] = [(-1, 0)];

const ORTHOGONAL_RAYS: [(i8, i8); 4] = [(-1, 0), (0, -1), (0, 1), (1, 0)];
const DIAGONAL_RAYS: [(i8, i8); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];
const LANCE_RAY: [(i8, i8); 1] = [(-1, 0)];

fn step_offsets(kind: PieceKind) -> &'static [(i8, i8)] {
    match kind {
        PieceKind::Pawn => &PAWN_STEP,
        PieceKind::Knight => &KNIGHT_STEPS,
        PieceKind::Silver => &SILVER_STEPS,
        PieceKind::Gold
        | PieceKind::PromotedPawn
        | PieceKind::PromotedLance
        | PieceKind::PromotedKnight
        | PieceKind::PromotedSilver => &GOLD_STEPS,
        PieceKind::King => &KING_STEPS,
        // Horse and Dragon add king-like steps on top of their rays.
        PieceKind::Horse => &ORTHOGONAL_RAYS,
        PieceKind::Dragon => &DIAGONAL_RAYS,
        PieceKind::Lance | PieceKind::Bishop | PieceKind::Rook => &[],
    }
}

fn ray_directions(kind: PieceKind) -> &'static [(i8, i8)] {
    match kind {
        PieceKind::Lance => &LANCE_RAY,
        PieceKind::Bishop | PieceKind::Horse => &DIAGONAL_RAYS,
        PieceKind::Rook | PieceKind::Dragon => &ORTHOGONAL_RAYS,
        _ => &[],
    }
}

const fn orient(color: Color, (d_row, d_col): (i8, i8)) -> (i8, i8) {
    match color {
        Color::Black => (d_row, d_col),
        Color::White => (-d_row, d_col),
    }
}

/// Destinations reachable by `piece` from `from`, ignoring the mover's own
/// king safety: step targets plus ray walks that stop at the first blocker
/// (inclusive when it is an enemy piece).
#[must_use]
pub fn pseudo_destinations(pos: &Position, from: Square, piece: Piece) -> Vec<Square> {
    let mut out = Vec::new();
    for &step in step_offsets(piece.kind) {
        let (d_row, d_col) = orient(piece.color, step);
        if let Some(to) = from.offset(d_row, d_col) {
            if pos.piece_at(to).is_none_or(|p| p.color != piece.color) {
                out.push(to);
            }
        }
    }
    for &ray in ray_directions(piece.kind) {
        let (d_row, d_col) = orient(piece.color, ray);
        let mut current = from;
        while let Some(to) = current.offset(d_row, d_col) {
            match pos.piece_at(to) {
                None => out.push(to),
                Some(p) => {
                    if p.color != piece.color {
                        out.push(to);
                    }
                    break;
                }
            }
            current = to;
        }
    }
    out
}

/// Whether any piece of `by` has a pseudo-legal move onto `target`.
#[must_use]
pub fn is_square_attacked(pos: &Position, target: Square, by: Color) -> bool {
    pos.pieces()
        .filter(|(_, p)| p.color == by)
        .any(|(from, piece)| pseudo_destinations(pos, from, piece).contains(&target))
}

/// Whether `color`'s king is attacked by the opponent.
///
/// A board with no king of `color` is corrupt; reporting it as "in check"
/// would mask the corruption as a legal game state, so it is surfaced as a
/// [`StateError`] instead.
pub fn is_in_check(pos: &Position, color: Color) -> Result<bool, StateError> {
    let king = pos
        .find_king(color)
        .ok_or(StateError::MissingKing { color })?;
    Ok(is_square_attacked(pos, king, color.opponent()))
}

/// Scoped simulate-then-undo guard.
///
/// `begin` applies the move; `finish` reverses it and propagates any
/// rollback failure. If the guard is dropped without `finish` (early `?`
/// return or panic between the two), `Drop` performs the rollback, so the
/// position is restored on every exit path.
pub(crate) struct Simulation<'a> {
    pos: &'a mut Position,
    record: Option<MoveRecord>,
}

impl<'a> Simulation<'a> {
    pub fn begin(pos: &'a mut Position, mv: Move) -> Result<Self, StateError> {
        let record = pos.apply_unchecked(mv)?;
        Ok(Self {
            pos,
            record: Some(record),
        })
    }

    pub fn position(&self) -> &Position {
        self.pos
    }

    pub fn position_mut(&mut self) -> &mut Position {
        self.pos
    }

    pub fn finish(mut self) -> Result<(), StateError> {
        match self.record.take() {
            Some(record) => self.pos.undo_move(&record),
            None => Ok(()),
        }
    }
}

impl Drop for Simulation<'_> {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            let rollback = self.pos.undo_move(&record);
            if !std::thread::panicking() {
                rollback.expect("simulation rollback failed");
            }
        }
    }
}

/// Applies `mv`, tests the mover's king exactly once, and reverses.
fn leaves_king_safe(pos: &mut Position, mv: Move, color: Color) -> Result<bool, StateError> {
    let sim = Simulation::begin(pos, mv)?;
    let in_check = is_in_check(sim.position(), color);
    sim.finish()?;
    Ok(!in_check?)
}

/// Promotion flags worth trying for a board move: nothing outside the zone,
/// forced promotion on dead ranks, both options otherwise.
fn promotion_options(piece: Piece, from: Square, to: Square) -> ArrayVec<bool, 2> {
    let mut options = ArrayVec::new();
    let zone = from.in_promotion_zone(piece.color) || to.in_promotion_zone(piece.color);
    if !piece.kind.can_promote() || !zone {
        options.push(false);
        return options;
    }
    if must_promote(piece.kind, to, piece.color) {
        options.push(true);
        return options;
    }
    options.push(false);
    options.push(true);
    options
}

/// A pawn or lance on the last rank, or a knight on the last two, could
/// never move again; promotion is mandatory there.
fn must_promote(kind: PieceKind, to: Square, color: Color) -> bool {
    match kind {
        PieceKind::Pawn | PieceKind::Lance => to.ranks_to_back(color) == 0,
        PieceKind::Knight => to.ranks_to_back(color) <= 1,
        _ => false,
    }
}

/// Rank restriction for drops, mirroring [`must_promote`]: a piece may not
/// be dropped where it could never move.
fn drop_rank_allowed(kind: PieceKind, to: Square, color: Color) -> bool {
    match kind {
        PieceKind::Pawn | PieceKind::Lance => to.ranks_to_back(color) >= 1,
        PieceKind::Knight => to.ranks_to_back(color) >= 2,
        _ => true,
    }
}

/// Nifu: an unpromoted pawn of `color` already stands on `file_col`.
fn has_pawn_on_file(pos: &Position, file_col: usize, color: Color) -> bool {
    (0..BOARD_SIZE).any(|row| {
        pos.piece_at(Square::new(row, file_col))
            .is_some_and(|p| p.kind == PieceKind::Pawn && p.color == color)
    })
}

/// Uchi-fu-zume: would dropping `color`'s pawn on `to` deliver a checkmate
/// with no legal response?
///
/// A dropped pawn checks from the square directly in front of the king, so
/// the check cannot be blocked and no drop can answer it; the only possible
/// replies are board moves (capturing the pawn or stepping the king away).
/// That keeps the refutation search over board moves only and free of
/// recursive drop analysis.
pub fn is_drop_pawn_mate(pos: &mut Position, to: Square, color: Color) -> Result<bool, StateError> {
    let mv = Move::Drop {
        to,
        kind: PieceKind::Pawn,
    };
    let mut sim = Simulation::begin(pos, mv)?;
    let opponent = color.opponent();
    let verdict: Result<bool, StateError> = (|| {
        if !is_in_check(sim.position(), opponent)? {
            return Ok(false);
        }
        Ok(!has_board_escape(sim.position_mut(), opponent)?)
    })();
    sim.finish()?;
    verdict
}

/// Whether `color` has any legal board move (drops excluded).
fn has_board_escape(pos: &mut Position, color: Color) -> Result<bool, StateError> {
    let own_pieces: Vec<(Square, Piece)> =
        pos.pieces().filter(|(_, p)| p.color == color).collect();
    for (from, piece) in own_pieces {
        let destinations = pseudo_destinations(pos, from, piece);
        for to in destinations {
            for promote in promotion_options(piece, from, to) {
                let mv = Move::Board { from, to, promote };
                if leaves_king_safe(pos, mv, color)? {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

/// Every legal move for the side to move.
///
/// Board moves: pseudo-legal destinations with promotion variants. Drops:
/// empty squares filtered by dead-rank rules, nifu, and uchi-fu-zume for
/// pawns. Each candidate is confirmed by a single simulate-check-undo pass.
pub fn legal_moves(pos: &mut Position) -> Result<Vec<Move>, StateError> {
    let color = pos.side_to_move();
    let mut moves = Vec::new();

    let own_pieces: Vec<(Square, Piece)> =
        pos.pieces().filter(|(_, p)| p.color == color).collect();
    for (from, piece) in own_pieces {
        let destinations = pseudo_destinations(pos, from, piece);
        for to in destinations {
            for promote in promotion_options(piece, from, to) {
                let mv = Move::Board { from, to, promote };
                if leaves_king_safe(pos, mv, color)? {
                    moves.push(mv);
                }
            }
        }
    }

    let held: Vec<PieceKind> = pos.hand(color).pieces().map(|(kind, _)| kind).collect();
    for kind in held {
        for to in Square::all() {
            if pos.piece_at(to).is_some() || !drop_rank_allowed(kind, to, color) {
                continue;
            }
            if kind == PieceKind::Pawn
                && (has_pawn_on_file(pos, to.col(), color) || is_drop_pawn_mate(pos, to, color)?)
            {
                continue;
            }
            let mv = Move::Drop { to, kind };
            if leaves_king_safe(pos, mv, color)? {
                moves.push(mv);
            }
        }
    }

    Ok(moves)
}

/// Whether a single move is legal for the side to move, without generating
/// the full move set: shape checks first, then one king-safety simulation.
pub fn is_legal_move(pos: &mut Position, mv: Move) -> Result<bool, StateError> {
    let color = pos.side_to_move();
    match mv {
        Move::Board { from, to, promote } => {
            let Some(piece) = pos.piece_at(from).filter(|p| p.color == color) else {
                return Ok(false);
            };
            if !pseudo_destinations(pos, from, piece).contains(&to) {
                return Ok(false);
            }
            if !promotion_options(piece, from, to).contains(&promote) {
                return Ok(false);
            }
        }
        Move::Drop { to, kind } => {
            if kind.is_promoted() || hand_index(kind).is_none() {
                return Ok(false);
            }
            if pos.hand(color).count(kind) == 0 || pos.piece_at(to).is_some() {
                return Ok(false);
            }
            if !drop_rank_allowed(kind, to, color) {
                return Ok(false);
            }
            if kind == PieceKind::Pawn
                && (has_pawn_on_file(pos, to.col(), color) || is_drop_pawn_mate(pos, to, color)?)
            {
                return Ok(false);
            }
        }
    }
    leaves_king_safe(pos, mv, color)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::position::GameStatus;

    fn pos(sfen: &str) -> Position {
        Position::from_sfen(sfen).unwrap()
    }

    #[test]
    fn startpos_has_thirty_legal_moves() {
        let mut p = Position::new();
        assert_eq!(p.legal_moves().unwrap().len(), 30);
    }

    #[test]
    fn legal_moves_never_leave_own_king_in_check() {
        let mut p = Position::new();
        for m in ["7g7f", "3c3d", "8h2b+", "3a2b"] {
            p.make_move(Move::from_usi(m).unwrap()).unwrap();
        }
        let color = p.side_to_move();
        for mv in p.legal_moves().unwrap() {
            let record = p.apply_unchecked(mv).unwrap();
            assert!(!is_in_check(&p, color).unwrap(), "{mv} leaves king in check");
            p.undo_move(&record).unwrap();
        }
    }

    #[test]
    fn generation_restores_the_position() {
        let mut p = Position::new();
        let hash = p.current_hash();
        let history_len = p.hash_history().len();
        p.legal_moves().unwrap();
        assert_eq!(p.current_hash(), hash);
        assert_eq!(p.hash_history().len(), history_len);
    }

    #[test]
    fn missing_king_is_state_error_not_check() {
        // Lone black king only; White has no king anywhere.
        let p = pos("9/9/9/9/4k4/9/9/9/9 b - 1");
        assert_eq!(
            is_in_check(&p, Color::Black).unwrap_err(),
            StateError::MissingKing {
                color: Color::Black
            }
        );
    }

    #[test]
    fn sliding_pieces_stop_at_blockers() {
        // Black rook on 5e; friendly pawn on 5c blocks upward, enemy pawn
        // on 5g is capturable but not passable.
        let p = pos("9/9/4P4/9/4R4/9/4p4/9/4K3k b - 1");
        let rook_sq = Square::from_usi("5e").unwrap();
        let rook = p.piece_at(rook_sq).unwrap();
        let dests = pseudo_destinations(&p, rook_sq, rook);
        assert!(dests.contains(&Square::from_usi("5d").unwrap()));
        assert!(!dests.contains(&Square::from_usi("5c").unwrap()));
        assert!(dests.contains(&Square::from_usi("5g").unwrap()));
        assert!(!dests.contains(&Square::from_usi("5h").unwrap()));
    }

    #[test]
    fn mandatory_promotion_on_dead_ranks() {
        // Black pawn on 5b: moving to 5a must promote.
        let mut p = pos("k8/4P4/9/9/9/9/9/9/8K b - 1");
        let moves = p.legal_moves().unwrap();
        let to_last = Move::from_usi("5b5a").unwrap();
        let promoting = Move::from_usi("5b5a+").unwrap();
        assert!(!moves.contains(&to_last));
        assert!(moves.contains(&promoting));
    }

    #[test]
    fn knight_must_promote_on_last_two_ranks() {
        let mut p = pos("k8/9/4N4/9/9/9/9/9/8K b - 1");
        let moves = p.legal_moves().unwrap();
        assert!(!moves.contains(&Move::from_usi("5c4a").unwrap()));
        assert!(moves.contains(&Move::from_usi("5c4a+").unwrap()));
    }

    #[test]
    fn double_pawn_drop_is_excluded() {
        // Black pawn already on file 5; pawn in hand.
        let mut p = pos("k8/9/9/9/9/4P4/9/9/8K b P 1");
        let moves = p.legal_moves().unwrap();
        assert!(
            moves
                .iter()
                .all(|m| *m != Move::from_usi("P*5e").unwrap() && *m != Move::from_usi("P*5c").unwrap())
        );
        // Dropping on a pawn-free file is fine.
        assert!(moves.contains(&Move::from_usi("P*4e").unwrap()));
    }

    #[test]
    fn pawn_and_knight_drop_rank_restrictions() {
        let mut p = pos("k8/9/9/9/9/9/9/9/8K b PN 1");
        let moves = p.legal_moves().unwrap();
        assert!(!moves.iter().any(|m| matches!(
            m,
            Move::Drop { to, kind: PieceKind::Pawn } if to.ranks_to_back(Color::Black) == 0
        )));
        assert!(!moves.iter().any(|m| matches!(
            m,
            Move::Drop { to, kind: PieceKind::Knight } if to.ranks_to_back(Color::Black) <= 1
        )));
        // Both kinds are droppable on live ranks.
        assert!(moves.contains(&Move::from_usi("P*5e").unwrap()));
        assert!(moves.contains(&Move::from_usi("N*5e").unwrap()));
    }

    #[test]
    fn drop_pawn_mate_is_illegal_but_other_drop_mate_is_not() {
        // White king cornered on 9a. A black dragon on 7b covers 8a/8b and
        // guards 9b along the rank; a knight on 8d guards 9b as well. The
        // pawn drop P*9b would be an unanswerable mate → uchi-fu-zume.
        let mut p = pos("k8/2+R6/9/1N7/9/9/9/9/4K4 b P 1");
        assert!(is_drop_pawn_mate(&mut p, Square::from_usi("9b").unwrap(), Color::Black).unwrap());
        let moves = p.legal_moves().unwrap();
        assert!(!moves.contains(&Move::from_usi("P*9b").unwrap()));

        // The same mating square is fine for a non-pawn drop.
        let mut p2 = pos("k8/2+R6/9/1N7/9/9/9/9/4K4 b G 1");
        let moves2 = p2.legal_moves().unwrap();
        let gold_mate = Move::from_usi("G*9b").unwrap();
        assert!(moves2.contains(&gold_mate));
        p2.make_move(gold_mate).unwrap();
        assert_eq!(
            p2.status(),
            GameStatus::Checkmate {
                winner: Color::Black
            }
        );
    }

    #[test]
    fn drop_pawn_check_with_escape_is_legal() {
        // King can step aside: the pawn drop checks but does not mate.
        let mut p = pos("4k4/9/9/9/9/9/9/9/4K4 b P 1");
        assert!(!is_drop_pawn_mate(&mut p, Square::from_usi("5b").unwrap(), Color::Black).unwrap());
        let moves = p.legal_moves().unwrap();
        assert!(moves.contains(&Move::from_usi("P*5b").unwrap()));
    }

    #[test]
    fn checkmate_is_detected() {
        // Lone white king on 9a; a black gold steps up to 9b, guarded from
        // behind by the rook on 9i. Zero legal replies and in check → mate.
        let mut p = pos("k8/9/G8/9/9/9/9/9/R3K4 b - 1");
        let mate = Move::from_usi("9c9b").unwrap();
        let moves = p.legal_moves().unwrap();
        assert!(moves.contains(&mate), "mating move should be legal");
        p.make_move(mate).unwrap();
        assert_eq!(
            p.status(),
            GameStatus::Checkmate {
                winner: Color::Black
            }
        );
    }

    #[test]
    fn stalemated_side_loses() {
        // After Black's quiet pawn push, White's lone king on 9a has no
        // legal move but is not in check: the gold on 7b covers 8a/8b, the
        // knight on 8d covers 9b. Standard rules score this against the
        // stalemated side.
        let mut p = pos("k8/2G6/9/1N7/9/9/8P/9/4K4 b - 1");
        p.make_move(Move::from_usi("1g1f").unwrap()).unwrap();
        assert_eq!(
            p.status(),
            GameStatus::Stalemate {
                winner: Color::Black
            }
        );
        assert!(!p.is_in_check(Color::White).unwrap());
    }

    #[test]
    fn fourfold_repetition_draws() {
        let mut p = Position::new();
        // Shuttle both rooks; the start position recurs after every 4 plies.
        let cycle = ["2h3h", "8b7b", "3h2h", "7b8b"];
        let mut status = p.status();
        'outer: for _ in 0..4 {
            for m in cycle {
                p.make_move(Move::from_usi(m).unwrap()).unwrap();
                status = p.status();
                if status.is_terminal() {
                    break 'outer;
                }
            }
        }
        assert_eq!(status, GameStatus::RepetitionDraw);
        // The draw must land exactly on the fourth recurrence.
        assert_eq!(p.repetition_count(), 4);
    }
}
