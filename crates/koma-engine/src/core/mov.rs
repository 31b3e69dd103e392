use std::fmt;

use serde::{Deserialize, Serialize};

use super::{piece::PieceKind, square::Square};

/// A move in USI/SFEN terms: either sliding a piece across the board or
/// dropping a captured piece from hand.
///
/// Drops never promote, which the shape itself guarantees.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, derive_more::IsVariant,
)]
pub enum Move {
    Board {
        from: Square,
        to: Square,
        promote: bool,
    },
    Drop {
        to: Square,
        kind: PieceKind,
    },
}

impl Move {
    /// Destination square of either variant.
    #[must_use]
    pub const fn to(self) -> Square {
        match self {
            Move::Board { to, .. } | Move::Drop { to, .. } => to,
        }
    }

    /// USI text: `7g7f`, `2b8h+` for a promoting board move, `P*5e` for a
    /// drop.
    #[must_use]
    pub fn to_usi(self) -> String {
        match self {
            Move::Board { from, to, promote } => {
                format!("{from}{to}{}", if promote { "+" } else { "" })
            }
            Move::Drop { to, kind } => format!("{}*{to}", kind.sfen_char()),
        }
    }

    /// Parses USI move text. Returns `None` for malformed input; legality is
    /// the rules engine's concern.
    #[must_use]
    pub fn from_usi(s: &str) -> Option<Self> {
        if let Some((kind_str, to_str)) = s.split_once('*') {
            let mut chars = kind_str.chars();
            let kind = PieceKind::from_sfen_char(chars.next()?)?;
            if chars.next().is_some() || kind == PieceKind::King {
                return None;
            }
            return Some(Move::Drop {
                to: Square::from_usi(to_str)?,
                kind,
            });
        }
        let (body, promote) = match s.strip_suffix('+') {
            Some(body) => (body, true),
            None => (s, false),
        };
        if !body.is_ascii() || body.len() != 4 {
            return None;
        }
        let from = Square::from_usi(&body[..2])?;
        let to = Square::from_usi(&body[2..])?;
        if from == to {
            return None;
        }
        Some(Move::Board { from, to, promote })
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_usi())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usi_round_trip() {
        let moves = [
            Move::Board {
                from: Square::from_usi("7g").unwrap(),
                to: Square::from_usi("7f").unwrap(),
                promote: false,
            },
            Move::Board {
                from: Square::from_usi("8h").unwrap(),
                to: Square::from_usi("2b").unwrap(),
                promote: true,
            },
            Move::Drop {
                to: Square::from_usi("5e").unwrap(),
                kind: PieceKind::Pawn,
            },
        ];
        for mv in moves {
            assert_eq!(Move::from_usi(&mv.to_usi()), Some(mv));
        }
        assert_eq!(moves[0].to_usi(), "7g7f");
        assert_eq!(moves[1].to_usi(), "8h2b+");
        assert_eq!(moves[2].to_usi(), "P*5e");
    }

    #[test]
    fn rejects_malformed_text() {
        assert_eq!(Move::from_usi(""), None);
        assert_eq!(Move::from_usi("7g7g"), None);
        assert_eq!(Move::from_usi("K*5e"), None);
        assert_eq!(Move::from_usi("P*5e+"), None);
        assert_eq!(Move::from_usi("7g7f++"), None);
    }

    #[test]
    fn drop_cannot_promote_by_construction() {
        let mv = Move::Drop {
            to: Square::new(4, 4),
            kind: PieceKind::Silver,
        };
        assert!(mv.is_drop());
        assert!(!mv.is_board());
    }
}
