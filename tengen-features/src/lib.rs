//! tengen-features: Input-plane schema and the board feature encoder.

pub mod encode;
pub mod schema;

pub use encode::gather_features;
pub use schema::{EncodingSpec, CHAIN_LIBERTIES_PLANES, CHAIN_SIZE_PLANES, DEFAULT_INPUT_MOVES};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
