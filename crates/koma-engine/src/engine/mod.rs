pub use self::{position::*, rules::*, sfen::*};

pub mod position;
pub mod rules;
pub mod sfen;
