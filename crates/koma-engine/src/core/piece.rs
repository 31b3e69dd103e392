use serde::{Deserialize, Serialize};

/// Side to move. Black moves first and plays "up" the board (toward rank `a`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Color {
    Black = 0,
    White = 1,
}

impl Color {
    /// Both colors, Black first.
    pub const ALL: [Color; 2] = [Color::Black, Color::White];

    #[must_use]
    pub const fn opponent(self) -> Self {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }

    /// Index into per-color tables (`Black = 0`, `White = 1`).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Enum representing the type of a Shogi piece.
///
/// The 14 kinds cover the 8 base pieces plus the 6 promoted forms (Gold and
/// King do not promote). Promotion status is a property of the kind itself,
/// so a piece's "is promoted" flag can never disagree with its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[repr(u8)]
pub enum PieceKind {
    Pawn = 0,
    Lance = 1,
    Knight = 2,
    Silver = 3,
    Gold = 4,
    Bishop = 5,
    Rook = 6,
    King = 7,
    PromotedPawn = 8,
    PromotedLance = 9,
    PromotedKnight = 10,
    PromotedSilver = 11,
    Horse = 12,
    Dragon = 13,
}

impl PieceKind {
    /// Number of piece kinds (14).
    pub const LEN: usize = 14;

    /// Every kind, in discriminant order.
    pub const ALL: [PieceKind; PieceKind::LEN] = [
        PieceKind::Pawn,
        PieceKind::Lance,
        PieceKind::Knight,
        PieceKind::Silver,
        PieceKind::Gold,
        PieceKind::Bishop,
        PieceKind::Rook,
        PieceKind::King,
        PieceKind::PromotedPawn,
        PieceKind::PromotedLance,
        PieceKind::PromotedKnight,
        PieceKind::PromotedSilver,
        PieceKind::Horse,
        PieceKind::Dragon,
    ];

    /// Index into per-kind tables (the enum discriminant).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn is_promoted(self) -> bool {
        (self as u8) >= (PieceKind::PromotedPawn as u8)
    }

    /// The promoted form, or `None` for Gold, King, and already-promoted
    /// kinds.
    #[must_use]
    pub const fn promote(self) -> Option<Self> {
        match self {
            PieceKind::Pawn => Some(PieceKind::PromotedPawn),
            PieceKind::Lance => Some(PieceKind::PromotedLance),
            PieceKind::Knight => Some(PieceKind::PromotedKnight),
            PieceKind::Silver => Some(PieceKind::PromotedSilver),
            PieceKind::Bishop => Some(PieceKind::Horse),
            PieceKind::Rook => Some(PieceKind::Dragon),
            _ => None,
        }
    }

    /// The unpromoted base kind. Identity for kinds that are already base.
    ///
    /// Captured pieces return to the capturing hand in this form.
    #[must_use]
    pub const fn demote(self) -> Self {
        match self {
            PieceKind::PromotedPawn => PieceKind::Pawn,
            PieceKind::PromotedLance => PieceKind::Lance,
            PieceKind::PromotedKnight => PieceKind::Knight,
            PieceKind::PromotedSilver => PieceKind::Silver,
            PieceKind::Horse => PieceKind::Bishop,
            PieceKind::Dragon => PieceKind::Rook,
            other => other,
        }
    }

    #[must_use]
    pub const fn can_promote(self) -> bool {
        self.promote().is_some()
    }

    /// Fixed number of pieces of this kind's base form in the full game set
    /// (both sides combined): 18 pawns, 4 each of lance/knight/silver/gold,
    /// 2 each of bishop/rook/king.
    #[must_use]
    pub const fn supply(self) -> u8 {
        match self.demote() {
            PieceKind::Pawn => 18,
            PieceKind::Lance | PieceKind::Knight | PieceKind::Silver | PieceKind::Gold => 4,
            _ => 2,
        }
    }

    /// SFEN letter for the base form of this kind, uppercase.
    ///
    /// Promoted kinds share their base letter; the `+` prefix is handled at
    /// the notation layer.
    #[must_use]
    pub const fn sfen_char(self) -> char {
        match self.demote() {
            PieceKind::Pawn => 'P',
            PieceKind::Lance => 'L',
            PieceKind::Knight => 'N',
            PieceKind::Silver => 'S',
            PieceKind::Gold => 'G',
            PieceKind::Bishop => 'B',
            PieceKind::Rook => 'R',
            _ => 'K',
        }
    }

    /// Parses an uppercase SFEN letter into a base kind.
    #[must_use]
    pub const fn from_sfen_char(c: char) -> Option<Self> {
        match c {
            'P' => Some(PieceKind::Pawn),
            'L' => Some(PieceKind::Lance),
            'N' => Some(PieceKind::Knight),
            'S' => Some(PieceKind::Silver),
            'G' => Some(PieceKind::Gold),
            'B' => Some(PieceKind::Bishop),
            'R' => Some(PieceKind::Rook),
            'K' => Some(PieceKind::King),
            _ => None,
        }
    }
}

/// A colored piece. Immutable value object; promotion produces a new piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Piece {
    pub kind: PieceKind,
    pub color: Color,
}

impl Piece {
    #[must_use]
    pub const fn new(kind: PieceKind, color: Color) -> Self {
        Self { kind, color }
    }

    #[must_use]
    pub const fn is_promoted(self) -> bool {
        self.kind.is_promoted()
    }

    #[must_use]
    pub const fn promote(self) -> Option<Self> {
        match self.kind.promote() {
            Some(kind) => Some(Self::new(kind, self.color)),
            None => None,
        }
    }

    #[must_use]
    pub const fn demote(self) -> Self {
        Self::new(self.kind.demote(), self.color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_round_trip() {
        for kind in PieceKind::ALL {
            if let Some(promoted) = kind.promote() {
                assert!(promoted.is_promoted());
                assert_eq!(promoted.demote(), kind);
            }
        }
    }

    #[test]
    fn gold_and_king_never_promote() {
        assert_eq!(PieceKind::Gold.promote(), None);
        assert_eq!(PieceKind::King.promote(), None);
        assert_eq!(PieceKind::PromotedPawn.promote(), None);
    }

    #[test]
    fn promotion_flag_matches_kind() {
        for kind in PieceKind::ALL {
            let derived = kind.index() >= PieceKind::PromotedPawn.index();
            assert_eq!(kind.is_promoted(), derived);
        }
    }

    #[test]
    fn supply_totals() {
        let total: u32 = [
            PieceKind::Pawn,
            PieceKind::Lance,
            PieceKind::Knight,
            PieceKind::Silver,
            PieceKind::Gold,
            PieceKind::Bishop,
            PieceKind::Rook,
            PieceKind::King,
        ]
        .iter()
        .map(|k| u32::from(k.supply()))
        .sum();
        assert_eq!(total, 40);
        assert_eq!(PieceKind::Dragon.supply(), PieceKind::Rook.supply());
    }

    #[test]
    fn sfen_char_round_trip() {
        for kind in [
            PieceKind::Pawn,
            PieceKind::Lance,
            PieceKind::Knight,
            PieceKind::Silver,
            PieceKind::Gold,
            PieceKind::Bishop,
            PieceKind::Rook,
            PieceKind::King,
        ] {
            assert_eq!(PieceKind::from_sfen_char(kind.sfen_char()), Some(kind));
        }
        assert_eq!(PieceKind::from_sfen_char('X'), None);
    }
}
