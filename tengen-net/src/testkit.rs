//! Synthetic weights files for tests and benchmarks.
//!
//! Shapes are chosen small but structurally faithful: a real section order,
//! real block boundaries, and head biases picked so a zero-plane backend
//! produces exactly predictable outputs.

use tengen_core::{BOARD_SIZE, NUM_INTERSECTIONS, POTENTIAL_MOVES};

pub fn zeros(n: usize) -> String {
    vec!["0"; n].join(" ")
}

pub fn ones(n: usize) -> String {
    vec!["1"; n].join(" ")
}

pub fn vals(values: &[f32]) -> String {
    values
        .iter()
        .map(|v| format!("{v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Knobs for the LZ-style (single value head) test network.
pub struct SingleNetSpec {
    pub version: i32,
    /// Bias of the pass entry of the policy dense layer.
    pub pass_bias: f32,
    /// Bias of the final value dense layer (α = 2 · bias with zero planes).
    pub alpha_bias: f32,
    /// Give every vertex a distinct policy bias so orientation is visible.
    pub patterned_policy: bool,
    /// Symmetry-invariant policy bias rings (distance to the board edge),
    /// so the policy is identical under every forward symmetry.
    pub ring_policy: bool,
    /// Conv bias / BN mean used by the fusion test.
    pub conv_bias: f32,
    pub bn_mean: f32,
}

impl Default for SingleNetSpec {
    fn default() -> Self {
        SingleNetSpec {
            version: 1,
            pass_bias: -10.0,
            alpha_bias: 0.0,
            patterned_policy: false,
            ring_policy: false,
            conv_bias: 0.0,
            bn_mean: 0.0,
        }
    }
}

/// A single-head network: 2 channels, 1 residual block, legacy policy conv
/// with 1 filter, value conv with 1 filter, no pooling, no dense tower.
/// Input planes: 18 (8 input moves, color planes).
pub fn single_net(spec: &SingleNetSpec) -> String {
    let channels = 2;
    let input_planes = 18;
    let mut lines = vec![spec.version.to_string()];

    let quartet = |lines: &mut Vec<String>, w: usize, ch: usize, spec: &SingleNetSpec| {
        lines.push(zeros(w));
        lines.push(vals(&vec![spec.conv_bias; ch]));
        lines.push(vals(&vec![spec.bn_mean; ch]));
        lines.push(ones(ch));
    };

    // input conv + one residual block (two convs)
    quartet(&mut lines, input_planes * 9 * channels, channels, spec);
    quartet(&mut lines, channels * 9 * channels, channels, spec);
    quartet(&mut lines, channels * 9 * channels, channels, spec);

    // policy conv (legacy 1×1, one filter)
    lines.push(zeros(channels));
    lines.push(zeros(1));
    lines.push(zeros(1));
    lines.push(ones(1));

    // policy dense
    lines.push(zeros(NUM_INTERSECTIONS * POTENTIAL_MOVES));
    let mut pol_bias = vec![0.0f32; POTENTIAL_MOVES];
    if spec.patterned_policy {
        for (i, b) in pol_bias.iter_mut().enumerate().take(NUM_INTERSECTIONS) {
            *b = (i % 7) as f32 * 0.1;
        }
    }
    if spec.ring_policy {
        for (i, b) in pol_bias.iter_mut().enumerate().take(NUM_INTERSECTIONS) {
            *b = (ring_distance(i) % 3) as f32 * 0.3;
        }
    }
    pol_bias[NUM_INTERSECTIONS] = spec.pass_bias;
    lines.push(vals(&pol_bias));

    // value conv (one filter)
    lines.push(zeros(channels));
    lines.push(zeros(1));
    lines.push(zeros(1));
    lines.push(ones(1));

    // alpha hidden (2 channels) and output
    lines.push(zeros(NUM_INTERSECTIONS * 2));
    lines.push(zeros(2));
    lines.push(zeros(2));
    lines.push(vals(&[spec.alpha_bias]));

    lines.join("\n")
}

/// A SAI network with value pooling and a type-Y double head.
///
/// 2 channels, 1 residual block, advanced features with 1 input move
/// (6 input planes), value conv with 2 filters (padded to 8 at load),
/// 3 pooling channels, α head of 2 channels, β head of 3 channels with
/// `vbe_rets` outputs.
pub fn double_y_net(version: i32, vbe_rets: usize) -> String {
    let channels = 2;
    let input_planes = 6;
    let mut lines = vec![version.to_string()];

    let quartet = |lines: &mut Vec<String>, w: usize, ch: usize| {
        lines.push(zeros(w));
        lines.push(zeros(ch));
        lines.push(zeros(ch));
        lines.push(ones(ch));
    };

    quartet(&mut lines, input_planes * 9 * channels, channels);
    quartet(&mut lines, channels * 9 * channels, channels);
    quartet(&mut lines, channels * 9 * channels, channels);

    // policy conv + dense
    quartet(&mut lines, channels, 1);
    lines.push(zeros(NUM_INTERSECTIONS * POTENTIAL_MOVES));
    lines.push(zeros(POTENTIAL_MOVES));

    // value conv: 2 filters
    quartet(&mut lines, channels * 2, 2);

    // pooling conv: 3 outputs × 2 inputs, distinct weights so the padding
    // reshuffle is observable
    lines.push(vals(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
    lines.push(zeros(3));
    lines.push(zeros(3));
    lines.push(ones(3));

    // alpha hidden (3 pooled inputs → 2 channels) and output
    lines.push(zeros(3 * 2));
    lines.push(vals(&[0.3, 0.0]));
    lines.push(vals(&[1.0, 0.0]));
    lines.push(vals(&[0.5]));

    // beta hidden (3 pooled inputs → 3 channels)
    lines.push(zeros(3 * 3));
    lines.push(vals(&[0.2, 0.0, 0.0]));

    // beta output
    match vbe_rets {
        1 => {
            lines.push(vals(&[1.0, 0.0, 0.0]));
            lines.push(vals(&[0.1]));
        }
        2 => {
            lines.push(vals(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0]));
            lines.push(vals(&[0.1, -0.2]));
        }
        _ => panic!("unsupported vbe_rets"),
    }

    lines.join("\n")
}

/// Distance of intersection `i` to the nearest board edge.
pub fn ring_distance(i: usize) -> usize {
    let (x, y) = (i % BOARD_SIZE, i / BOARD_SIZE);
    x.min(BOARD_SIZE - 1 - x).min(y.min(BOARD_SIZE - 1 - y))
}

/// A network whose policy dense bias says the file is for a 5×5 board.
pub fn wrong_board_net() -> String {
    let channels = 2;
    let input_planes = 18;
    let mut lines = vec!["1".to_string()];

    let quartet = |lines: &mut Vec<String>, w: usize, ch: usize| {
        lines.push(zeros(w));
        lines.push(zeros(ch));
        lines.push(zeros(ch));
        lines.push(ones(ch));
    };

    quartet(&mut lines, input_planes * 9 * channels, channels);
    quartet(&mut lines, channels * 9 * channels, channels);
    quartet(&mut lines, channels * 9 * channels, channels);
    quartet(&mut lines, channels, 1);

    // 5×5 policy dense: 26 outputs
    lines.push(zeros(25 * 26));
    lines.push(zeros(26));
    lines.push(zeros(channels));
    lines.push(zeros(1));

    lines.join("\n")
}
