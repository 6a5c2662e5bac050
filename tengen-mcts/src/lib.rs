//! tengen-mcts: The concurrently updated search-tree node.
//!
//! A node holds relaxed-atomic visit and evaluation statistics, a CAS-locked
//! expansion state machine, and the SAI quantile trackers; selection follows
//! PUCT with first-play urgency and virtual-loss avoidance.

mod edge;
mod expand;
mod node;
mod select;
mod sync;

pub use edge::Edge;
pub use node::{
    ExpandState, LeafEval, NodeStatus, SearchNode, StateEval, UctStats, VIRTUAL_LOSS_COUNT,
};
pub use select::cached_t_quantile;
pub use sync::{AtomicF32, AtomicF64};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
