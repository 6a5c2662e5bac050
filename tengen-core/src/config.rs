//! Engine configuration schema.
//!
//! One YAML file configures evaluation, search, and play behavior. Every
//! field has a default so partial files load.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Numeric precision requested for the forward backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    #[default]
    Auto,
    Single,
    Half,
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    /// Network evaluation settings.
    pub eval: EvalConfig,
    /// Tree search settings.
    pub search: SearchConfig,
    /// Move generation / play-style settings.
    pub play: PlayConfig,
}

/// Network evaluation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Worker threads for tree descents and benchmarks.
    pub num_threads: usize,
    /// Whether evaluations are cached by position hash.
    pub use_nncache: bool,
    /// Softmax temperature applied to the policy logits.
    pub softmax_temp: f32,
    /// Exponent `1/policy_temp` applied to child priors at expansion.
    pub policy_temp: f32,
    /// Additive tuning of the β head, in log2 units.
    pub betatune: f32,
    /// Forward backend precision.
    pub precision: Precision,
    /// Force the CPU backend even when a device backend is available.
    pub cpu_only: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            num_threads: 2,
            use_nncache: true,
            softmax_temp: 1.0,
            policy_temp: 1.0,
            betatune: 0.0,
            precision: Precision::Auto,
            cpu_only: false,
        }
    }
}

/// Tree search configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchConfig {
    /// PUCT exploration constant.
    pub puct: f32,
    /// Coefficient inside the PUCT numerator logarithm.
    pub logpuct: f32,
    /// Constant inside the PUCT numerator logarithm.
    pub logconst: f32,
    /// First-play-urgency reduction for non-root nodes.
    pub fpu_reduction: f32,
    /// First-play-urgency reduction at the root.
    pub fpu_root_reduction: f32,
    /// FPU uses the mean sibling eval (excluding the best) instead of the
    /// reduced maximum.
    pub fpu_avg: bool,
    /// FPU is forced to zero.
    pub fpu_zero: bool,
    /// Scale child priors by twice the running eval stdev.
    pub stdev_uct: bool,
    /// Use the lower confidence bound for best-move selection.
    pub uselcb: bool,
    /// Fraction of the max child visits required before LCB applies.
    pub lcb_min_visit_ratio: f32,
    /// λ mixing weights indexed by (engine-color, winning/losing).
    pub lambda: [f32; 4],
    /// μ mixing weights indexed by (engine-color, winning/losing).
    pub mu: [f32; 4],
    /// Exclude forced visits from the PUCT denominator.
    pub laddercode: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            puct: 0.5,
            logpuct: 0.015,
            logconst: 1.7,
            fpu_reduction: 0.25,
            fpu_root_reduction: 0.25,
            fpu_avg: false,
            fpu_zero: false,
            stdev_uct: false,
            uselcb: true,
            lcb_min_visit_ratio: 0.1,
            lambda: [0.5; 4],
            mu: [0.0; 4],
            laddercode: false,
        }
    }
}

/// Play-style configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlayConfig {
    /// Always offer pass as a candidate move.
    pub dumbpass: bool,
    /// Fold symmetry-equivalent moves together when the position is
    /// symmetric.
    pub exploit_symmetries: bool,
    /// Deterministic representative choice when folding symmetric moves.
    pub symm_nonrandom: bool,
    /// Randomize among the best moves for the first `random_cnt` moves.
    pub random_cnt: u32,
    /// Add Dirichlet noise at the root (self-play).
    pub noise: bool,
}

impl Default for PlayConfig {
    fn default() -> Self {
        PlayConfig {
            dumbpass: false,
            exploit_symmetries: false,
            symm_nonrandom: false,
            random_cnt: 0,
            noise: false,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// λ weight for a node: `engine` is whether the side to move is the
    /// engine's color, `losing` whether its eval is below one half.
    pub fn lambda_for(&self, engine: bool, losing: bool) -> f32 {
        self.search.lambda[Self::mix_index(engine, losing)]
    }

    /// μ weight for a node, same indexing as [`Config::lambda_for`].
    pub fn mu_for(&self, engine: bool, losing: bool) -> f32 {
        self.search.mu[Self::mix_index(engine, losing)]
    }

    fn mix_index(engine: bool, losing: bool) -> usize {
        let mut i = if engine { 0 } else { 2 };
        if losing {
            i += 1;
        }
        i
    }
}
