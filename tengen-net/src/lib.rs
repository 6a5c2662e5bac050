//! tengen-net: Weights loading, forward orchestration, and the eval cache.

pub mod cache;
pub mod forward;
pub mod loader;
pub mod math;
pub mod net;
pub mod testkit;
pub mod weights;
pub mod winograd;

pub use cache::{EvalCache, Netresult};
pub use forward::{EvalError, ForwardBackend, ZeroBackend};
pub use loader::{load_network, load_network_file, LoadedNetwork, WeightsError};
pub use math::{sigmoid, sigmoid_interval_avg};
pub use net::{
    render_heatmap, AgentEval, BackendFactory, BenchmarkReport, Ensemble, Evaluator, InitError,
};
pub use weights::{NetParams, NetWeights, ValueHeadKind, WeightsSummary};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
