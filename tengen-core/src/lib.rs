//! tengen-core: Board geometry, dihedral symmetries, the game-state contract,
//! and engine configuration.

pub mod board;
pub mod config;
pub mod state;
pub mod symmetry;
pub mod testing;

pub use board::{Color, Move, BOARD_SIZE, NUM_INTERSECTIONS, POTENTIAL_MOVES};
pub use config::{Config, ConfigError, EvalConfig, PlayConfig, Precision, SearchConfig};
pub use state::{BoardView, GameView};
pub use symmetry::{
    sym_move, symmetry_tables, SymmetryTables, IDENTITY_SYMMETRY, NUM_SYMMETRIES,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_nonempty() {
        assert!(!VERSION.is_empty());
    }
}
