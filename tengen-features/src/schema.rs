//! Input-plane schema.
//!
//! The encoder lays out `input_planes` planes of `NUM_INTERSECTIONS` floats:
//!
//! - **stones**: `input_moves` planes of current-player stones (offset 0 is
//!   the present position, then back in time), followed by the same count of
//!   opponent-stone planes.
//! - **advanced** (optional): `input_moves` planes marking intersections that
//!   are illegal for the current player, then `input_moves` planes marking
//!   legal moves that capture a chain in atari.
//! - **chain liberties** (optional): per past state, 4 planes; plane `k` is
//!   set on a stone whose chain has at most `k + 1` liberties.
//! - **chain size** (optional): per past state, 4 planes; plane `k` is set on
//!   a stone whose chain has at least `2k + 2` stones.
//! - **to-move / border**: one plane filled with ones. Without the color
//!   planes it doubles as the border marker; with them, its position (first
//!   of the last two planes for black, second for white) encodes the side to
//!   move.

use tengen_core::NUM_INTERSECTIONS;

/// Number of chain-liberty threshold planes per past state.
pub const CHAIN_LIBERTIES_PLANES: usize = 4;

/// Number of chain-size threshold planes per past state.
pub const CHAIN_SIZE_PLANES: usize = 4;

/// History depth of standard networks.
pub const DEFAULT_INPUT_MOVES: usize = 8;

/// Which feature planes a loaded network expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingSpec {
    pub input_moves: usize,
    pub adv_features: bool,
    pub chainlibs_features: bool,
    pub chainsize_features: bool,
    pub include_color: bool,
}

impl Default for EncodingSpec {
    fn default() -> Self {
        EncodingSpec {
            input_moves: DEFAULT_INPUT_MOVES,
            adv_features: false,
            chainlibs_features: false,
            chainsize_features: false,
            include_color: true,
        }
    }
}

impl EncodingSpec {
    /// Feature planes contributed by each past state.
    pub fn planes_per_move(&self) -> usize {
        2 + if self.adv_features { 2 } else { 0 }
            + if self.chainlibs_features {
                CHAIN_LIBERTIES_PLANES
            } else {
                0
            }
            + if self.chainsize_features {
                CHAIN_SIZE_PLANES
            } else {
                0
            }
    }

    /// Total input planes, history features plus the to-move/border planes.
    pub fn input_planes(&self) -> usize {
        self.input_moves * self.planes_per_move() + if self.include_color { 2 } else { 1 }
    }

    /// Length of the encoded input vector.
    pub fn input_len(&self) -> usize {
        self.input_planes() * NUM_INTERSECTIONS
    }
}
