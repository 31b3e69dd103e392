//! SFEN position import/export and game-record notation.
//!
//! SFEN is the standard compact text form for a Shogi position: board,
//! side to move, hands, and move number. Game records are exported as the
//! starting SFEN plus a USI move list, so drops (`P*5e`) and promotions
//! (`2b8h+`) stay distinguishable and the recorded start reflects the
//! actual game-start hands rather than hands mutated by play.

use std::fmt;
use std::fmt::Write as _;

use crate::{
    SfenError,
    core::{
        piece::{Color, Piece, PieceKind},
        square::{BOARD_SIZE, Square},
    },
};

use super::position::{Position, PositionConfig};

/// The standard opening position.
pub const START_SFEN: &str = "lnsgkgsnl/1r5b1/ppppppppp/9/9/9/PPPPPPPPP/1B5R1/LNSGKGSNL b - 1";

/// Hand export order, highest value first, per common SFEN practice.
const HAND_EXPORT_ORDER: [PieceKind; 7] = [
    PieceKind::Rook,
    PieceKind::Bishop,
    PieceKind::Gold,
    PieceKind::Silver,
    PieceKind::Knight,
    PieceKind::Lance,
    PieceKind::Pawn,
];

impl Position {
    /// Builds a position from SFEN with the default configuration.
    pub fn from_sfen(sfen: &str) -> Result<Self, SfenError> {
        Self::from_sfen_with_config(sfen, PositionConfig::default())
    }

    pub fn from_sfen_with_config(sfen: &str, config: PositionConfig) -> Result<Self, SfenError> {
        let mut fields = sfen.split_whitespace();
        let board = fields.next().ok_or(SfenError::MissingField("board"))?;
        let stm = fields.next().ok_or(SfenError::MissingField("side to move"))?;
        let hands = fields.next().ok_or(SfenError::MissingField("hands"))?;
        let ply = fields.next();

        let mut pos = Position::bare(config);
        parse_board(&mut pos, board)?;
        pos.set_side_to_move(match stm {
            "b" => Color::Black,
            "w" => Color::White,
            other => return Err(SfenError::InvalidSideToMove(other.to_owned())),
        });
        parse_hands(&mut pos, hands)?;
        if let Some(ply) = ply {
            let number: u16 = ply
                .parse()
                .map_err(|_| SfenError::InvalidPly(ply.to_owned()))?;
            if number == 0 {
                return Err(SfenError::InvalidPly(ply.to_owned()));
            }
            pos.set_ply(number - 1);
        }

        let start = pos.to_sfen();
        pos.seal_start(start);
        Ok(pos)
    }

    /// Serializes the current position (board, side to move, hands, move
    /// number).
    #[must_use]
    pub fn to_sfen(&self) -> String {
        let mut out = String::new();
        for row in 0..BOARD_SIZE {
            if row > 0 {
                out.push('/');
            }
            let mut empty_run = 0;
            for col in 0..BOARD_SIZE {
                match self.piece_at(Square::new(row, col)) {
                    None => empty_run += 1,
                    Some(piece) => {
                        if empty_run > 0 {
                            let _ = write!(out, "{empty_run}");
                            empty_run = 0;
                        }
                        if piece.is_promoted() {
                            out.push('+');
                        }
                        out.push(piece_char(piece));
                    }
                }
            }
            if empty_run > 0 {
                let _ = write!(out, "{empty_run}");
            }
        }

        out.push(' ');
        out.push(match self.side_to_move() {
            Color::Black => 'b',
            Color::White => 'w',
        });

        out.push(' ');
        let mut any_hand = false;
        for color in Color::ALL {
            for kind in HAND_EXPORT_ORDER {
                let count = self.hand(color).count(kind);
                if count == 0 {
                    continue;
                }
                any_hand = true;
                if count > 1 {
                    let _ = write!(out, "{count}");
                }
                out.push(piece_char(Piece::new(kind, color)));
            }
        }
        if !any_hand {
            out.push('-');
        }

        let _ = write!(out, " {}", self.ply() + 1);
        out
    }

    /// The full game record: starting SFEN plus the USI move list. An empty
    /// history exports the start position alone.
    #[must_use]
    pub fn record(&self) -> String {
        let mut out = format!("sfen {}", self.start_sfen());
        let history = self.move_history();
        if !history.is_empty() {
            out.push_str(" moves");
            for record in history {
                let _ = write!(out, " {}", record.mv.to_usi());
            }
        }
        out
    }
}

fn piece_char(piece: Piece) -> char {
    let c = piece.kind.sfen_char();
    match piece.color {
        Color::Black => c,
        Color::White => c.to_ascii_lowercase(),
    }
}

fn parse_board(pos: &mut Position, field: &str) -> Result<(), SfenError> {
    let invalid = || SfenError::InvalidBoard(field.to_owned());
    let ranks: Vec<&str> = field.split('/').collect();
    if ranks.len() != BOARD_SIZE {
        return Err(invalid());
    }
    let mut kings = [0_u8; 2];
    for (row, rank) in ranks.iter().enumerate() {
        let mut col = 0;
        let mut promoted = false;
        for c in rank.chars() {
            if let Some(skip) = c.to_digit(10) {
                if promoted || skip == 0 {
                    return Err(invalid());
                }
                col += skip as usize;
                continue;
            }
            if c == '+' {
                if promoted {
                    return Err(invalid());
                }
                promoted = true;
                continue;
            }
            let color = if c.is_ascii_uppercase() {
                Color::Black
            } else {
                Color::White
            };
            let base =
                PieceKind::from_sfen_char(c.to_ascii_uppercase()).ok_or_else(invalid)?;
            let kind = if promoted {
                base.promote().ok_or_else(invalid)?
            } else {
                base
            };
            promoted = false;
            if col >= BOARD_SIZE {
                return Err(invalid());
            }
            if kind == PieceKind::King {
                kings[color.index()] += 1;
                if kings[color.index()] > 1 {
                    return Err(invalid());
                }
            }
            pos.place(Square::new(row, col), Piece::new(kind, color));
            col += 1;
        }
        if col != BOARD_SIZE || promoted {
            return Err(invalid());
        }
    }
    Ok(())
}

fn parse_hands(pos: &mut Position, field: &str) -> Result<(), SfenError> {
    if field == "-" {
        return Ok(());
    }
    let invalid = || SfenError::InvalidHand(field.to_owned());
    let mut count: u32 = 0;
    for c in field.chars() {
        if let Some(digit) = c.to_digit(10) {
            count = count * 10 + digit;
            if count > u32::from(PieceKind::Pawn.supply()) {
                return Err(invalid());
            }
            continue;
        }
        let color = if c.is_ascii_uppercase() {
            Color::Black
        } else {
            Color::White
        };
        let kind = PieceKind::from_sfen_char(c.to_ascii_uppercase()).ok_or_else(invalid)?;
        if kind == PieceKind::King {
            return Err(invalid());
        }
        let n = if count == 0 { 1 } else { count };
        for _ in 0..n {
            pos.hand_mut(color).add(kind).map_err(|_| invalid())?;
        }
        count = 0;
    }
    if count != 0 {
        return Err(invalid());
    }
    Ok(())
}

impl fmt::Display for Position {
    /// ASCII diagram: ranks `a` through `i`, files 9 through 1, with hands
    /// and the side to move below.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  9  8  7  6  5  4  3  2  1")?;
        for row in 0..BOARD_SIZE {
            for col in 0..BOARD_SIZE {
                match self.piece_at(Square::new(row, col)) {
                    None => write!(f, " . ")?,
                    Some(piece) => {
                        let promoted = if piece.is_promoted() { '+' } else { ' ' };
                        write!(f, "{promoted}{} ", piece_char(piece))?;
                    }
                }
            }
            writeln!(f, " {}", Square::new(row, 0).rank_char())?;
        }
        writeln!(f, "side to move: {:?}", self.side_to_move())?;
        write!(f, "sfen: {}", self.to_sfen())
    }
}
