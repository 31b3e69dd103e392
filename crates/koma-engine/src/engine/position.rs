use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    MoveError, StateError,
    core::{
        hand::{HAND_KINDS, Hand},
        mov::Move,
        piece::{Color, Piece, PieceKind},
        square::{SQUARE_COUNT, Square},
        zobrist::ZOBRIST,
    },
};

use super::rules;

/// How a game ended, or that it has not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, derive_more::IsVariant)]
pub enum GameStatus {
    InProgress,
    /// The side to move has no legal moves and is in check.
    Checkmate { winner: Color },
    /// The side to move has no legal moves but is not in check. Under
    /// standard Shogi rules the stalemated side loses.
    Stalemate { winner: Color },
    /// Fourfold repetition of the same position with the same side to move.
    RepetitionDraw,
    /// The configured ply cap was reached.
    MaxMovesDraw,
    Resignation { winner: Color },
}

impl GameStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, GameStatus::InProgress)
    }

    /// The winning color, if the outcome has one.
    #[must_use]
    pub const fn winner(self) -> Option<Color> {
        match self {
            GameStatus::Checkmate { winner }
            | GameStatus::Stalemate { winner }
            | GameStatus::Resignation { winner } => Some(winner),
            _ => None,
        }
    }
}

/// Everything needed to reverse one `make_move` exactly.
///
/// `moved` is the piece as it stood before the move (pre-promotion for a
/// promoting board move; the dropped piece for a drop). `captured` is the
/// board-resident piece removed from the destination, still in whatever
/// promoted form it had there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveRecord {
    pub mv: Move,
    pub moved: Piece,
    pub captured: Option<Piece>,
    pub prev_status: GameStatus,
}

/// Tunable limits for a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PositionConfig {
    /// Plies after which the game is declared a draw.
    pub max_plies: u16,
}

impl PositionConfig {
    #[must_use]
    pub const fn new(max_plies: u16) -> Self {
        assert!(max_plies > 0);
        Self { max_plies }
    }
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self::new(512)
    }
}

/// 81-cell piece grid with `Square`-checked access.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
struct PieceGrid(#[serde(with = "serde_grid")] [Option<Piece>; SQUARE_COUNT]);

impl PieceGrid {
    const fn empty() -> Self {
        Self([None; SQUARE_COUNT])
    }

    fn get(&self, sq: Square) -> Option<Piece> {
        self.0[sq.index()]
    }

    fn set(&mut self, sq: Square, piece: Option<Piece>) {
        self.0[sq.index()] = piece;
    }
}

impl fmt::Debug for PieceGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.0.iter().filter_map(|p| p.as_ref()))
            .finish()
    }
}

mod serde_grid {
    use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error};

    use crate::core::{piece::Piece, square::SQUARE_COUNT};

    pub fn serialize<S: Serializer>(
        grid: &[Option<Piece>; SQUARE_COUNT],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        grid.as_slice().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[Option<Piece>; SQUARE_COUNT], D::Error> {
        let cells = Vec::<Option<Piece>>::deserialize(deserializer)?;
        cells
            .try_into()
            .map_err(|_| D::Error::custom("board must have exactly 81 cells"))
    }
}

/// The canonical game state: board, hands, histories, and termination
/// status.
///
/// All mutation goes through [`make_move`](Position::make_move) and
/// [`undo_move`](Position::undo_move) (plus the crate-internal simulate
/// path used by the rules engine); the two are exactly symmetric, including
/// the history lists. `Clone` produces a fully independent deep copy —
/// histories included — so clones are safe for speculative search without
/// breaking repetition detection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Position {
    grid: PieceGrid,
    hands: [Hand; 2],
    side_to_move: Color,
    ply: u16,
    move_history: Vec<MoveRecordStored>,
    hash_history: Vec<u64>,
    status: GameStatus,
    config: PositionConfig,
    start_sfen: String,
}

/// Serializable mirror of [`MoveRecord`]. Kept private so the public record
/// type stays a plain value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
struct MoveRecordStored {
    mv: Move,
    moved: Piece,
    captured: Option<Piece>,
    prev_status: GameStatus,
}

impl From<MoveRecord> for MoveRecordStored {
    fn from(r: MoveRecord) -> Self {
        Self {
            mv: r.mv,
            moved: r.moved,
            captured: r.captured,
            prev_status: r.prev_status,
        }
    }
}

impl From<MoveRecordStored> for MoveRecord {
    fn from(r: MoveRecordStored) -> Self {
        Self {
            mv: r.mv,
            moved: r.moved,
            captured: r.captured,
            prev_status: r.prev_status,
        }
    }
}

impl Position {
    /// Standard opening position.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PositionConfig::default())
    }

    #[must_use]
    pub fn with_config(config: PositionConfig) -> Self {
        Self::from_sfen_with_config(super::sfen::START_SFEN, config).expect("startpos SFEN")
    }

    pub(crate) fn bare(config: PositionConfig) -> Self {
        Self {
            grid: PieceGrid::empty(),
            hands: [Hand::empty(), Hand::empty()],
            side_to_move: Color::Black,
            ply: 0,
            move_history: Vec::new(),
            hash_history: Vec::new(),
            status: GameStatus::InProgress,
            config,
            start_sfen: String::new(),
        }
    }

    /// Called by the SFEN importer once board/hands/side are in place.
    pub(crate) fn seal_start(&mut self, start_sfen: String) {
        self.start_sfen = start_sfen;
        self.hash_history = vec![self.compute_hash()];
    }

    #[must_use]
    pub fn piece_at(&self, sq: Square) -> Option<Piece> {
        self.grid.get(sq)
    }

    pub(crate) fn place(&mut self, sq: Square, piece: Piece) {
        self.grid.set(sq, Some(piece));
    }

    pub(crate) fn hand_mut(&mut self, color: Color) -> &mut Hand {
        &mut self.hands[color.index()]
    }

    pub(crate) fn set_side_to_move(&mut self, color: Color) {
        self.side_to_move = color;
    }

    pub(crate) fn set_ply(&mut self, ply: u16) {
        self.ply = ply;
    }

    #[must_use]
    pub fn hand(&self, color: Color) -> &Hand {
        &self.hands[color.index()]
    }

    #[must_use]
    pub fn side_to_move(&self) -> Color {
        self.side_to_move
    }

    /// Half-moves played since the start position.
    #[must_use]
    pub fn ply(&self) -> u16 {
        self.ply
    }

    #[must_use]
    pub fn status(&self) -> GameStatus {
        self.status
    }

    #[must_use]
    pub fn config(&self) -> PositionConfig {
        self.config
    }

    /// The SFEN this game started from, unaffected by play since.
    #[must_use]
    pub fn start_sfen(&self) -> &str {
        &self.start_sfen
    }

    #[must_use]
    pub fn move_history(&self) -> Vec<MoveRecord> {
        self.move_history.iter().map(|&r| r.into()).collect()
    }

    /// Position hashes after each move, preceded by the start hash.
    #[must_use]
    pub fn hash_history(&self) -> &[u64] {
        &self.hash_history
    }

    /// All occupied squares with their pieces, row-major.
    pub fn pieces(&self) -> impl Iterator<Item = (Square, Piece)> + '_ {
        Square::all().filter_map(|sq| self.grid.get(sq).map(|p| (sq, p)))
    }

    #[must_use]
    pub fn find_king(&self, color: Color) -> Option<Square> {
        self.pieces()
            .find(|(_, p)| p.kind == PieceKind::King && p.color == color)
            .map(|(sq, _)| sq)
    }

    pub(crate) fn compute_hash(&self) -> u64 {
        ZOBRIST.hash(self.pieces(), &self.hands, self.side_to_move)
    }

    /// Hash of the current position (board, hands, side to move).
    #[must_use]
    pub fn current_hash(&self) -> u64 {
        self.hash_history
            .last()
            .copied()
            .unwrap_or_else(|| self.compute_hash())
    }

    /// How many times the current position has occurred, this occurrence
    /// included. Sennichite triggers at four.
    #[must_use]
    pub fn repetition_count(&self) -> usize {
        let current = self.current_hash();
        self.hash_history.iter().filter(|&&h| h == current).count()
    }

    /// Applies a move after checking it against the legal move set,
    /// switches the side to move, records history, and re-evaluates
    /// termination.
    ///
    /// Illegal moves and moves on a finished game are rejected without any
    /// mutation. A [`MoveError::State`] means the position was already
    /// corrupt and the episode must stop.
    pub fn make_move(&mut self, mv: Move) -> Result<MoveRecord, MoveError> {
        if self.status.is_terminal() {
            return Err(MoveError::GameOver);
        }
        if !rules::is_legal_move(self, mv)? {
            return Err(MoveError::Illegal { mv });
        }
        let record = self.apply(mv)?;
        self.update_status()?;
        Ok(record)
    }

    /// The simulate path: identical mutation and history bookkeeping to
    /// [`make_move`], but no legality pre-check and no termination
    /// re-evaluation. Callers must reverse with [`undo_move`].
    pub(crate) fn apply_unchecked(&mut self, mv: Move) -> Result<MoveRecord, StateError> {
        self.apply(mv)
    }

    fn apply(&mut self, mv: Move) -> Result<MoveRecord, StateError> {
        let mover = self.side_to_move;
        let (moved, captured) = match mv {
            Move::Board { from, to, promote } => {
                let piece = self
                    .grid
                    .get(from)
                    .filter(|p| p.color == mover)
                    .ok_or(StateError::SquareMismatch { square: from })?;
                let captured = self.grid.get(to);
                if let Some(captured) = captured {
                    if captured.color == mover {
                        return Err(StateError::SquareMismatch { square: to });
                    }
                    self.hands[mover.index()].add(captured.kind)?;
                }
                let placed = if promote {
                    piece
                        .promote()
                        .ok_or(StateError::SquareMismatch { square: from })?
                } else {
                    piece
                };
                self.grid.set(from, None);
                self.grid.set(to, Some(placed));
                (piece, captured)
            }
            Move::Drop { to, kind } => {
                if self.grid.get(to).is_some() {
                    return Err(StateError::SquareMismatch { square: to });
                }
                self.hands[mover.index()].remove(kind, mover)?;
                let piece = Piece::new(kind.demote(), mover);
                self.grid.set(to, Some(piece));
                (piece, None)
            }
        };
        let record = MoveRecord {
            mv,
            moved,
            captured,
            prev_status: self.status,
        };
        self.side_to_move = mover.opponent();
        self.ply += 1;
        self.move_history.push(record.into());
        self.hash_history.push(self.compute_hash());
        Ok(record)
    }

    /// Exact inverse of the move described by `record`, which must be the
    /// most recent entry in the move history.
    ///
    /// Board, hands, side to move, ply, status, and both history lists are
    /// rolled back. Every detected inconsistency is a fatal
    /// [`StateError`]; none is ever tolerated silently, because a quietly
    /// wrong undo is indistinguishable from corrupting all downstream
    /// training data.
    pub fn undo_move(&mut self, record: &MoveRecord) -> Result<(), StateError> {
        match self.move_history.last() {
            Some(&last) if MoveRecord::from(last) == *record => {}
            _ => return Err(StateError::HistoryMismatch),
        }
        if self.hash_history.len() < 2 {
            return Err(StateError::HistoryMismatch);
        }
        let mover = self.side_to_move.opponent();
        match record.mv {
            Move::Board { from, to, promote } => {
                let expected = if promote {
                    record
                        .moved
                        .promote()
                        .ok_or(StateError::SquareMismatch { square: to })?
                } else {
                    record.moved
                };
                match self.grid.get(to) {
                    Some(placed) if placed == expected => {}
                    _ => return Err(StateError::SquareMismatch { square: to }),
                }
                if self.grid.get(from).is_some() {
                    return Err(StateError::SquareMismatch { square: from });
                }
                self.grid.set(to, record.captured);
                self.grid.set(from, Some(record.moved));
                if let Some(captured) = record.captured {
                    self.hands[mover.index()].remove(captured.kind, mover)?;
                }
            }
            Move::Drop { to, kind } => {
                let expected = Piece::new(kind.demote(), mover);
                match self.grid.get(to) {
                    Some(placed) if placed == expected => {}
                    _ => return Err(StateError::SquareMismatch { square: to }),
                }
                self.grid.set(to, None);
                self.hands[mover.index()].add(kind)?;
            }
        }
        self.move_history.pop();
        self.hash_history.pop();
        self.side_to_move = mover;
        self.ply -= 1;
        self.status = record.prev_status;
        Ok(())
    }

    /// Concede the game for `color`. No effect once the game is over.
    pub fn resign(&mut self, color: Color) {
        if !self.status.is_terminal() {
            self.status = GameStatus::Resignation {
                winner: color.opponent(),
            };
        }
    }

    /// Legal moves for the side to move. Delegates to the rules engine,
    /// which simulates on this position (and restores it) per candidate.
    pub fn legal_moves(&mut self) -> Result<Vec<Move>, StateError> {
        rules::legal_moves(self)
    }

    /// Whether `color`'s king is attacked. A missing king is corruption,
    /// never "in check".
    pub fn is_in_check(&self, color: Color) -> Result<bool, StateError> {
        rules::is_in_check(self, color)
    }

    /// Verifies that every base kind's total across board and both hands
    /// equals its fixed supply.
    pub fn audit_conservation(&self) -> Result<(), StateError> {
        for kind in HAND_KINDS.iter().copied().chain([PieceKind::King]) {
            let on_board = self
                .pieces()
                .filter(|(_, p)| p.kind.demote() == kind)
                .count();
            let in_hands = usize::from(self.hands[0].count(kind)) + usize::from(self.hands[1].count(kind));
            let counted = on_board + in_hands;
            let expected = usize::from(kind.supply());
            if counted != expected {
                #[expect(clippy::cast_possible_truncation)]
                return Err(StateError::SupplyViolation {
                    kind,
                    counted: counted.min(usize::from(u8::MAX)) as u8,
                    expected: kind.supply(),
                });
            }
        }
        Ok(())
    }

    fn update_status(&mut self) -> Result<(), StateError> {
        let next = self.side_to_move;
        let replies = rules::legal_moves(self)?;
        if replies.is_empty() {
            let winner = next.opponent();
            self.status = if rules::is_in_check(self, next)? {
                GameStatus::Checkmate { winner }
            } else {
                GameStatus::Stalemate { winner }
            };
            return Ok(());
        }
        if self.repetition_count() >= 4 {
            self.status = GameStatus::RepetitionDraw;
            return Ok(());
        }
        if self.ply >= self.config.max_plies {
            self.status = GameStatus::MaxMovesDraw;
        }
        Ok(())
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usi(s: &str) -> Move {
        Move::from_usi(s).unwrap()
    }

    #[test]
    fn startpos_basics() {
        let pos = Position::new();
        assert_eq!(pos.side_to_move(), Color::Black);
        assert_eq!(pos.ply(), 0);
        assert_eq!(pos.status(), GameStatus::InProgress);
        assert_eq!(pos.pieces().count(), 40);
        assert!(pos.hand(Color::Black).is_empty());
        pos.audit_conservation().unwrap();
    }

    #[test]
    fn make_and_undo_restores_everything() {
        let mut pos = Position::new();
        let snapshot = pos.clone();
        let record = pos.make_move(usi("7g7f")).unwrap();
        assert_eq!(pos.side_to_move(), Color::White);
        assert_eq!(pos.ply(), 1);
        assert_eq!(pos.move_history().len(), 1);
        assert_eq!(pos.hash_history().len(), 2);

        pos.undo_move(&record).unwrap();
        assert_eq!(pos.side_to_move(), snapshot.side_to_move());
        assert_eq!(pos.ply(), 0);
        assert_eq!(pos.move_history().len(), 0);
        assert_eq!(pos.hash_history(), snapshot.hash_history());
        assert_eq!(pos.current_hash(), snapshot.current_hash());
        for sq in Square::all() {
            assert_eq!(pos.piece_at(sq), snapshot.piece_at(sq));
        }
    }

    #[test]
    fn capture_round_trip_restores_hands() {
        let mut pos = Position::new();
        for m in ["7g7f", "3c3d", "8h2b+"] {
            pos.make_move(usi(m)).unwrap();
        }
        assert_eq!(pos.hand(Color::Black).count(PieceKind::Bishop), 1);
        pos.audit_conservation().unwrap();

        let record = *pos.move_history().last().unwrap();
        let mut undone = pos.clone();
        undone.undo_move(&record).unwrap();
        assert_eq!(undone.hand(Color::Black).count(PieceKind::Bishop), 0);
        undone.audit_conservation().unwrap();
    }

    #[test]
    fn illegal_move_rejected_without_mutation() {
        let mut pos = Position::new();
        let before = pos.current_hash();
        let err = pos.make_move(usi("1a1b")).unwrap_err();
        assert!(matches!(err, MoveError::Illegal { .. }));
        assert_eq!(pos.current_hash(), before);
        assert_eq!(pos.ply(), 0);
    }

    #[test]
    fn undo_with_stale_record_is_history_mismatch() {
        let mut pos = Position::new();
        let first = pos.make_move(usi("7g7f")).unwrap();
        pos.make_move(usi("3c3d")).unwrap();
        assert_eq!(
            pos.undo_move(&first).unwrap_err(),
            StateError::HistoryMismatch
        );
    }

    #[test]
    fn clone_keeps_full_history() {
        let mut pos = Position::new();
        for m in ["7g7f", "3c3d", "2g2f"] {
            pos.make_move(usi(m)).unwrap();
        }
        let clone = pos.clone();
        assert_eq!(clone.move_history().len(), 3);
        assert_eq!(clone.hash_history(), pos.hash_history());

        // Mutating the clone must not alias the original.
        let mut clone = clone;
        clone.make_move(usi("8c8d")).unwrap();
        assert_eq!(pos.move_history().len(), 3);
        assert_eq!(pos.ply(), 3);
    }

    #[test]
    fn moves_after_game_over_are_rejected() {
        let mut pos = Position::new();
        pos.resign(Color::Black);
        assert_eq!(
            pos.status(),
            GameStatus::Resignation {
                winner: Color::White
            }
        );
        let err = pos.make_move(usi("7g7f")).unwrap_err();
        assert!(matches!(err, MoveError::GameOver));
    }

    #[test]
    fn undo_reverses_a_resignation_free_terminal_move() {
        // A terminal move (here: reaching the ply cap) must still undo.
        let mut pos = Position::with_config(PositionConfig::new(1));
        let record = pos.make_move(usi("7g7f")).unwrap();
        assert_eq!(pos.status(), GameStatus::MaxMovesDraw);
        pos.undo_move(&record).unwrap();
        assert_eq!(pos.status(), GameStatus::InProgress);
        assert_eq!(pos.ply(), 0);
    }

    #[test]
    fn conservation_over_random_play() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand_pcg::Pcg64Mcg::seed_from_u64(7);
        let mut pos = Position::new();
        for _ in 0..60 {
            if pos.status().is_terminal() {
                break;
            }
            let moves = pos.legal_moves().unwrap();
            let mv = moves[rng.random_range(0..moves.len())];
            pos.make_move(mv).unwrap();
            pos.audit_conservation().unwrap();
        }
    }

    #[test]
    fn random_play_round_trips_via_undo() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand_pcg::Pcg64Mcg::seed_from_u64(11);
        let mut pos = Position::new();
        let mut records = Vec::new();
        let reference = pos.clone();
        for _ in 0..40 {
            if pos.status().is_terminal() {
                break;
            }
            let moves = pos.legal_moves().unwrap();
            let mv = moves[rng.random_range(0..moves.len())];
            records.push(pos.make_move(mv).unwrap());
        }
        for record in records.iter().rev() {
            pos.undo_move(record).unwrap();
        }
        assert_eq!(pos.current_hash(), reference.current_hash());
        assert_eq!(pos.ply(), 0);
        assert_eq!(pos.hash_history().len(), 1);
        for sq in Square::all() {
            assert_eq!(pos.piece_at(sq), reference.piece_at(sq));
        }
        assert_eq!(pos.hand(Color::Black), reference.hand(Color::Black));
        assert_eq!(pos.hand(Color::White), reference.hand(Color::White));
    }
}
