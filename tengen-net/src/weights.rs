//! Weight bundles and the transforms applied to them at load time.

use std::fmt;

use tengen_core::NUM_INTERSECTIONS;
use tengen_features::EncodingSpec;

use crate::winograd::winograd_transform_f;

/// Shape of the value head, as classified from the weights file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueHeadKind {
    /// One winrate output (LZ-style network).
    Single,
    /// α and β share the final dense layer's output vector.
    DoubleI,
    /// β has its own output layer on top of α's hidden activation.
    DoubleT,
    /// β has its own hidden and output layers.
    DoubleY,
}

/// Network hyper-parameters discovered while loading the weights file.
#[derive(Debug, Clone)]
pub struct NetParams {
    pub format_version: u32,
    pub channels: usize,
    pub residual_blocks: usize,
    pub input_planes: usize,
    pub input_moves: usize,
    pub adv_features: bool,
    pub chainlibs_features: bool,
    pub chainsize_features: bool,
    pub quartile_encoding: bool,
    pub include_color: bool,
    pub policy_conv_layers: usize,
    pub policy_channels: usize,
    pub policy_outputs: usize,
    pub value_channels: usize,
    pub val_dense_inputs: usize,
    pub val_outputs: usize,
    pub val_pool_outputs: usize,
    pub val_chans: usize,
    pub vbe_chans: usize,
    pub value_head_rets: usize,
    pub val_head_rets: usize,
    pub vbe_head_rets: usize,
    pub value_head_kind: ValueHeadKind,
    /// ELF-style networks report value in black's frame, not side-to-move.
    pub value_black_frame: bool,
}

impl NetParams {
    pub fn is_sai(&self) -> bool {
        self.value_head_kind != ValueHeadKind::Single
    }

    /// Channel count of the planes handed back by the forward backend for
    /// the value head.
    pub fn value_plane_outputs(&self) -> usize {
        if self.val_pool_outputs > 0 {
            self.val_pool_outputs
        } else {
            self.val_outputs
        }
    }

    pub fn encoding_spec(&self) -> EncodingSpec {
        EncodingSpec {
            input_moves: self.input_moves,
            adv_features: self.adv_features,
            chainlibs_features: self.chainlibs_features,
            chainsize_features: self.chainsize_features,
            include_color: self.include_color,
        }
    }
}

/// Residual-tower and convolutional-head weights, pushed to the forward
/// backend after the load transforms. Immutable once shared.
#[derive(Debug, Clone, Default)]
pub struct NetWeights {
    /// Input conv followed by two convs per residual block.
    pub conv_weights: Vec<Vec<f32>>,
    pub conv_biases: Vec<Vec<f32>>,
    pub batchnorm_means: Vec<Vec<f32>>,
    pub batchnorm_stddevs: Vec<Vec<f32>>,

    /// Policy conv tower (one 1×1 conv for legacy nets).
    pub conv_pol_w: Vec<Vec<f32>>,
    pub conv_pol_b: Vec<Vec<f32>>,
    pub bn_pol_w1: Vec<Vec<f32>>,
    pub bn_pol_w2: Vec<Vec<f32>>,

    /// Value 1×1 conv.
    pub conv_val_w: Vec<f32>,
    pub conv_val_b: Vec<f32>,
    pub bn_val_w1: Vec<f32>,
    pub bn_val_w2: Vec<f32>,

    /// Optional value pooling 1×1 conv.
    pub conv_val_pool_w: Vec<f32>,
    pub conv_val_pool_b: Vec<f32>,
    pub bn_val_pool_w1: Vec<f32>,
    pub bn_val_pool_w2: Vec<f32>,
}

/// Dense-head weights, evaluated on the CPU by the evaluator itself.
#[derive(Debug, Clone, Default)]
pub struct HeadWeights {
    pub ip_pol_w: Vec<f32>,
    pub ip_pol_b: Vec<f32>,

    /// Optional value dense residual tower.
    pub vh_dense_weights: Vec<Vec<f32>>,
    pub vh_dense_biases: Vec<Vec<f32>>,
    pub vh_dense_bn_means: Vec<Vec<f32>>,
    pub vh_dense_bn_vars: Vec<Vec<f32>>,

    pub ip1_val_w: Vec<f32>,
    pub ip1_val_b: Vec<f32>,
    pub ip2_val_w: Vec<f32>,
    pub ip2_val_b: Vec<f32>,

    pub ip1_vbe_w: Vec<f32>,
    pub ip1_vbe_b: Vec<f32>,
    pub ip2_vbe_w: Vec<f32>,
    pub ip2_vbe_b: Vec<f32>,
}

/// Replace each BN variance with `1/√(σ² + ε)` so the forward pass
/// multiplies instead of dividing.
pub fn process_bn_var(vars: &mut [f32]) {
    const EPSILON: f32 = 1e-5;
    for v in vars.iter_mut() {
        *v = 1.0 / (*v + EPSILON).sqrt();
    }
}

fn fuse_bias_pair(means: &mut [f32], biases: &mut [f32]) {
    for (mean, bias) in means.iter_mut().zip(biases.iter_mut()) {
        *mean -= *bias;
        *bias = 0.0;
    }
}

/// Zero-pad the value conv to 8 output channels (weights, biases, BN
/// quartet), reshuffling the pool-conv weight rows so existing columns keep
/// their meaning. Called when `val_outputs < 8` after the pooling block.
pub fn add_zero_channels(params: &mut NetParams, weights: &mut NetWeights) {
    debug_assert!(params.val_outputs < 8);
    let old_channels = params.val_outputs;
    params.val_outputs = 8;

    weights
        .conv_val_w
        .resize(params.channels * params.val_outputs, 0.0);
    weights.conv_val_b.resize(params.val_outputs, 0.0);
    weights.bn_val_w1.resize(params.val_outputs, 0.0);
    weights.bn_val_w2.resize(params.val_outputs, 0.0);

    let mut pool_w = vec![0.0f32; params.val_outputs * params.val_pool_outputs];
    for i in 0..params.val_pool_outputs {
        for j in 0..old_channels {
            pool_w[i * params.val_outputs + j] = weights.conv_val_pool_w[i * old_channels + j];
        }
    }
    weights.conv_val_pool_w = pool_w;
}

/// Load-time transforms: Winograd the 3×3 convolutions, fold conv biases
/// into the BN means, and invert the BN variances. Exact algebraic identity
/// for the subsequent forward passes.
pub fn apply_load_transforms(params: &NetParams, weights: &mut NetWeights, heads: &mut HeadWeights) {
    // Input convolution, then both convolutions of every residual block.
    let mut filters = weights.conv_weights.iter_mut();
    if let Some(input_conv) = filters.next() {
        *input_conv = winograd_transform_f(input_conv, params.channels, params.input_planes);
    }
    for filter in filters.take(params.residual_blocks * 2) {
        *filter = winograd_transform_f(filter, params.channels, params.channels);
    }

    for i in 0..weights.conv_biases.len() {
        fuse_bias_pair(&mut weights.batchnorm_means[i], &mut weights.conv_biases[i]);
        process_bn_var(&mut weights.batchnorm_stddevs[i]);
    }

    fuse_bias_pair(&mut weights.bn_val_w1, &mut weights.conv_val_b);
    process_bn_var(&mut weights.bn_val_w2);

    fuse_bias_pair(&mut weights.bn_val_pool_w1, &mut weights.conv_val_pool_b);
    process_bn_var(&mut weights.bn_val_pool_w2);

    for i in 0..weights.conv_pol_b.len() {
        fuse_bias_pair(&mut weights.bn_pol_w1[i], &mut weights.conv_pol_b[i]);
        process_bn_var(&mut weights.bn_pol_w2[i]);
    }

    for i in 0..heads.vh_dense_biases.len() {
        fuse_bias_pair(&mut heads.vh_dense_bn_means[i], &mut heads.vh_dense_biases[i]);
        process_bn_var(&mut heads.vh_dense_bn_vars[i]);
    }
}

/// Approximate resident bytes of the loaded tensors.
pub fn estimated_size(params: &NetParams, weights: &NetWeights) -> usize {
    let nested =
        |v: &Vec<Vec<f32>>| -> usize { v.iter().map(|w| w.len()).sum::<usize>() * size_of_f32() };
    let flat = |v: &Vec<f32>| v.len() * size_of_f32();

    nested(&weights.conv_weights)
        + nested(&weights.conv_biases)
        + nested(&weights.batchnorm_means)
        + nested(&weights.batchnorm_stddevs)
        + nested(&weights.conv_pol_w)
        + nested(&weights.conv_pol_b)
        + nested(&weights.bn_pol_w1)
        + nested(&weights.bn_pol_w2)
        + flat(&weights.conv_val_w)
        + flat(&weights.conv_val_b)
        + flat(&weights.conv_val_pool_w)
        + flat(&weights.conv_val_pool_b)
        + (2 * params.val_outputs
            + params.policy_outputs * NUM_INTERSECTIONS * (NUM_INTERSECTIONS + 1)
            + (NUM_INTERSECTIONS + 1)
            + params.val_dense_inputs * params.val_chans
            + 2 * params.val_chans
            + 1)
            * size_of_f32()
}

fn size_of_f32() -> usize {
    std::mem::size_of::<f32>()
}

/// Human-readable architecture summary, printed after a successful load.
#[derive(Debug, Clone)]
pub struct WeightsSummary {
    pub params: NetParams,
}

impl fmt::Display for WeightsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.params;
        writeln!(
            f,
            "{} input planes, {} input moves, {} channels, {} blocks",
            p.input_planes, p.input_moves, p.channels, p.residual_blocks
        )?;
        if p.policy_conv_layers == 1 {
            writeln!(f, "legacy policy convolution with {} filters", p.policy_outputs)?;
        } else {
            writeln!(
                f,
                "policy tower with {} channels, {} layers, {} filters",
                p.policy_channels, p.policy_conv_layers, p.policy_outputs
            )?;
        }
        if p.val_pool_outputs > 0 {
            writeln!(f, "value head pooling with {} channels", p.val_pool_outputs)?;
        }
        match p.value_head_kind {
            ValueHeadKind::Single => {
                writeln!(f, "single value head (LZ)")?;
                writeln!(
                    f,
                    "convolution with {} filters, dense with {} channels",
                    p.val_outputs, p.val_chans
                )?;
            }
            ValueHeadKind::DoubleI => {
                writeln!(f, "double value head, type I")?;
                writeln!(
                    f,
                    "convolution with {} filters, dense with {} channels",
                    p.val_outputs, p.val_chans
                )?;
            }
            ValueHeadKind::DoubleT => {
                writeln!(f, "double value head, type T")?;
                writeln!(
                    f,
                    "convolution with {} filters, dense with {} channels",
                    p.val_outputs, p.val_chans
                )?;
            }
            ValueHeadKind::DoubleY => {
                writeln!(f, "double value head, type Y")?;
                writeln!(f, "common convolution: {} filters", p.val_outputs)?;
                writeln!(
                    f,
                    "alpha head: {} channels, beta head: {} channels",
                    p.val_chans, p.vbe_chans
                )?;
            }
        }
        if p.vbe_head_rets == 2 {
            writeln!(f, "beta head with double output")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bn_var_inversion() {
        let mut vars = vec![1.0, 0.0, 3.0];
        process_bn_var(&mut vars);
        assert!((vars[0] - 1.0 / (1.00001f32).sqrt()).abs() < 1e-6);
        assert!((vars[1] - 1.0 / (1e-5f32).sqrt()).abs() < 1e-2);
        assert!(vars[2] < 1.0);
    }

    #[test]
    fn bias_fusion_zeroes_biases_and_shifts_means() {
        let mut means = vec![1.0, 2.0];
        let mut biases = vec![0.5, -0.5];
        fuse_bias_pair(&mut means, &mut biases);
        assert_eq!(means, vec![0.5, 2.5]);
        assert_eq!(biases, vec![0.0, 0.0]);
    }

    #[test]
    fn zero_padding_preserves_pool_columns() {
        let mut params = NetParams {
            format_version: 1,
            channels: 4,
            residual_blocks: 1,
            input_planes: 18,
            input_moves: 8,
            adv_features: false,
            chainlibs_features: false,
            chainsize_features: false,
            quartile_encoding: false,
            include_color: true,
            policy_conv_layers: 1,
            policy_channels: 2,
            policy_outputs: 2,
            value_channels: 0,
            val_dense_inputs: 3,
            val_outputs: 3,
            val_pool_outputs: 2,
            val_chans: 8,
            vbe_chans: 0,
            value_head_rets: 2,
            val_head_rets: 1,
            vbe_head_rets: 1,
            value_head_kind: ValueHeadKind::DoubleI,
            value_black_frame: false,
        };
        let mut weights = NetWeights {
            conv_val_w: vec![0.1; 4 * 3],
            conv_val_b: vec![0.2; 3],
            bn_val_w1: vec![0.3; 3],
            bn_val_w2: vec![0.4; 3],
            // 2 pool outputs × 3 inputs, distinct entries
            conv_val_pool_w: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            conv_val_pool_b: vec![0.0; 2],
            ..NetWeights::default()
        };

        add_zero_channels(&mut params, &mut weights);

        assert_eq!(params.val_outputs, 8);
        assert_eq!(weights.conv_val_w.len(), 4 * 8);
        assert_eq!(weights.bn_val_w2.len(), 8);
        assert_eq!(weights.conv_val_pool_w.len(), 2 * 8);
        // Existing columns keep their meaning, new ones are zero.
        assert_eq!(&weights.conv_val_pool_w[0..3], &[1.0, 2.0, 3.0]);
        assert!(weights.conv_val_pool_w[3..8].iter().all(|&v| v == 0.0));
        assert_eq!(&weights.conv_val_pool_w[8..11], &[4.0, 5.0, 6.0]);
        assert!(weights.conv_val_pool_w[11..16].iter().all(|&v| v == 0.0));
    }
}
