//! Dense-head math: inner products, fused batch norm, softmax, pooling, and
//! the score sigmoid family.

/// Dense layer: `output[o] = biases[o] + Σ_i weights[o·inputs + i]·input[i]`,
/// optionally rectified.
pub fn innerproduct<const RELU: bool>(input: &[f32], weights: &[f32], biases: &[f32]) -> Vec<f32> {
    let inputs = input.len();
    let outputs = biases.len();
    debug_assert_eq!(inputs * outputs, weights.len());

    let mut output = Vec::with_capacity(outputs);
    for o in 0..outputs {
        let row = &weights[o * inputs..(o + 1) * inputs];
        let mut acc = biases[o];
        for (w, x) in row.iter().zip(input) {
            acc += w * x;
        }
        if RELU && acc < 0.0 {
            acc = 0.0;
        }
        output.push(acc);
    }
    output
}

/// Fused batch norm over `channels × spatial` data followed by ReLU.
///
/// `stddevs` holds the load-time precomputed `1/√(σ² + ε)` scales, and conv
/// biases have been folded into `means`, so this is multiply-subtract only.
/// `eltwise` adds a residual shortcut before the rectifier.
pub fn batchnorm(
    channels: usize,
    spatial: usize,
    data: &mut [f32],
    means: &[f32],
    stddevs: &[f32],
    eltwise: Option<&[f32]>,
) {
    debug_assert_eq!(data.len(), channels * spatial);
    for c in 0..channels {
        let mean = means[c];
        let scale = stddevs[c];
        let arr = &mut data[c * spatial..(c + 1) * spatial];
        match eltwise {
            None => {
                for v in arr.iter_mut() {
                    *v = (scale * (*v - mean)).max(0.0);
                }
            }
            Some(res) => {
                let res = &res[c * spatial..(c + 1) * spatial];
                for (v, r) in arr.iter_mut().zip(res) {
                    *v = (scale * (*v - mean) + r).max(0.0);
                }
            }
        }
    }
}

/// Numerically stable softmax at `temperature`.
pub fn softmax(input: &[f32], temperature: f32) -> Vec<f32> {
    let max = input.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut output: Vec<f32> = input
        .iter()
        .map(|&v| ((v - max) / temperature).exp())
        .collect();
    let denom: f32 = output.iter().sum();
    for v in &mut output {
        *v /= denom;
    }
    output
}

/// Mean over the spatial area, collapsing `channels × area` to `channels`.
pub fn reduce_mean(layer: &[f32], area: usize) -> Vec<f32> {
    let channels = layer.len() / area;
    debug_assert_eq!(channels * area, layer.len());
    (0..channels)
        .map(|c| layer[c * area..(c + 1) * area].iter().sum::<f32>() / area as f32)
        .collect()
}

/// The SAI win-probability sigmoid.
///
/// Evaluates the logistic of `b·(α + bonus)` where `b` is `β₂` on the
/// positive side of the score axis (when a distinct β₂ ≥ 0 is given) and `β`
/// on the negative side. Returns `(p, 1 − p)` with `p` the probability for
/// the side the caller's α refers to. Large arguments switch to the
/// `exp(−|arg|)` form so the tail never overflows.
pub fn sigmoid(alpha: f32, beta: f32, bonus: f32, beta2: f32) -> (f32, f32) {
    let beta2 = if beta2 < 0.0 { beta } else { beta2 };
    let arg = f64::from(if alpha + bonus > 0.0 { beta2 } else { beta }) * f64::from(alpha + bonus);
    let absarg = arg.abs();
    let ret = if absarg > 30.0 {
        (-absarg).exp()
    } else {
        1.0 / (1.0 + absarg.exp())
    };

    if arg < 0.0 {
        (ret as f32, (1.0 - ret) as f32)
    } else {
        ((1.0 - ret) as f32, ret as f32)
    }
}

fn softplus(z: f64) -> f64 {
    if z > 30.0 {
        z
    } else if z < -30.0 {
        z.exp()
    } else {
        z.exp().ln_1p()
    }
}

/// Average of the win-probability sigmoid over bonuses in `[s, t]`.
///
/// This is the SAI eval-mixing integral: the λ/μ quantiles of the father
/// node bound the interval, and the backed-up value is the mean winrate over
/// it. The antiderivative of `σ(b(α+x))` is `softplus(b(α+x))/b`; the
/// integral is split at `x = −α` where the slope switches between β and β₂.
pub fn sigmoid_interval_avg(alpkt: f32, beta: f32, beta2: f32, s: f32, t: f32) -> f32 {
    let (lo, hi) = if s <= t { (s, t) } else { (t, s) };
    if hi - lo < 1e-6 {
        return sigmoid(alpkt, beta, 0.5 * (lo + hi), beta2).0;
    }

    let alpkt = f64::from(alpkt);
    let beta_lo = f64::from(beta);
    let beta_hi = if beta2 >= 0.0 {
        f64::from(beta2)
    } else {
        beta_lo
    };
    let (lo, hi) = (f64::from(lo), f64::from(hi));

    let piece = |b: f64, from: f64, to: f64| {
        (softplus(b * (alpkt + to)) - softplus(b * (alpkt + from))) / b
    };

    let breakpoint = -alpkt;
    let integral = if hi <= breakpoint {
        piece(beta_lo, lo, hi)
    } else if lo >= breakpoint {
        piece(beta_hi, lo, hi)
    } else {
        piece(beta_lo, lo, breakpoint) + piece(beta_hi, breakpoint, hi)
    };

    (integral / (hi - lo)) as f32
}

/// L2 norm of the difference between two evaluations, used by the backend
/// self-check.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
