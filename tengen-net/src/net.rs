//! Evaluator orchestration: feature gathering, the forward pass, dense
//! heads, symmetry ensembles, caching, and benchmarks.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use thiserror::Error;

use tengen_core::symmetry::{symmetry_tables, IDENTITY_SYMMETRY, NUM_SYMMETRIES};
use tengen_core::{Color, Config, GameView, Move, Precision, BOARD_SIZE, NUM_INTERSECTIONS};
use tengen_features::gather_features;

use crate::cache::{EvalCache, Netresult, MIN_CACHE_COUNT};
use crate::forward::{EvalError, ForwardBackend};
use crate::loader::{load_network_file, WeightsError};
use crate::math::{batchnorm, innerproduct, l2_distance, reduce_mean, sigmoid, softmax};
use crate::weights::{
    apply_load_transforms, estimated_size, HeadWeights, NetParams, ValueHeadKind, WeightsSummary,
};
use crate::winograd::WINOGRAD_ALPHA;

/// Alternate dense layers in the value tower act as residual shortcuts.
const RESDENSE_IN_VALUE_HEAD: bool = true;

/// One in this many RANDOM_SYMMETRY evaluations is recomputed on the
/// reference backend when one is present.
const SELFCHECK_PROBABILITY: u32 = 2000;

/// L2 tolerance between primary and reference outputs.
const SELFCHECK_MAX_ERROR: f32 = 0.2;

/// Symmetric cache probing only pays off while transpositions are likely;
/// past this move number the extra seven lookups are wasted work.
const SYM_CACHE_OPENING_MOVES: u32 = 30;

/// How the forward pass samples the eight board symmetries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensemble {
    /// One forward at the given symmetry.
    Direct(usize),
    /// One forward at a uniformly random symmetry (the search default).
    RandomSymmetry,
    /// Average the outputs of all eight symmetries. Skips the read cache.
    Average,
}

/// Evaluator construction errors.
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Weights(#[from] WeightsError),
    #[error(transparent)]
    Backend(#[from] EvalError),
}

/// Per-agent SAI quantities displayed alongside a heatmap.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentEval {
    pub lambda: f32,
    pub mu: f32,
    pub quantile_lambda: f32,
    pub quantile_mu: f32,
    pub alpkt_tree: f32,
}

/// Throughput report of a benchmark run.
#[derive(Debug, Clone, Copy)]
pub struct BenchmarkReport {
    pub evaluations: usize,
    pub seconds: f64,
    pub evals_per_second: f64,
}

/// Builds a forward backend for the requested precision.
pub type BackendFactory<'a> =
    dyn Fn(Precision) -> Result<Box<dyn ForwardBackend>, EvalError> + 'a;

/// The network evaluator: owns the dense heads, the cache, and the forward
/// backend; translates game states into [`Netresult`]s.
pub struct Evaluator {
    config: Arc<Config>,
    params: NetParams,
    heads: HeadWeights,
    cache: EvalCache,
    backend: Box<dyn ForwardBackend>,
    reference: Option<Box<dyn ForwardBackend>>,
    weight_bytes: usize,
}

impl Evaluator {
    /// Load weights, transform them, size the cache from the playout budget,
    /// and stand up the forward backend (with half→single fallback under
    /// `Precision::Auto`). `reference` optionally installs a second backend
    /// used for randomized self-checks.
    pub fn initialize<P: AsRef<Path>>(
        config: Arc<Config>,
        playouts: usize,
        weights_path: P,
        factory: &BackendFactory<'_>,
        reference: Option<Box<dyn ForwardBackend>>,
    ) -> Result<Evaluator, InitError> {
        let loaded = load_network_file(weights_path)?;
        let params = loaded.params;
        let mut weights = loaded.weights;
        let mut heads = loaded.heads;

        apply_load_transforms(&params, &mut weights, &mut heads);
        let weight_bytes = estimated_size(&params, &weights);

        let cache = EvalCache::new(MIN_CACHE_COUNT);
        if config.eval.use_nncache {
            cache.resize_from_playouts(playouts);
        }

        let shared = Arc::new(weights);
        let install = |mut backend: Box<dyn ForwardBackend>| -> Result<Box<dyn ForwardBackend>, EvalError> {
            backend.initialize(params.channels)?;
            backend.push_weights(
                WINOGRAD_ALPHA,
                params.input_planes,
                params.channels,
                Arc::clone(&shared),
            )?;
            Ok(backend)
        };

        let backend = match config.eval.precision {
            Precision::Single => install(factory(Precision::Single)?)?,
            Precision::Half => install(factory(Precision::Half)?)?,
            Precision::Auto => {
                match factory(Precision::Half).and_then(&install) {
                    Ok(backend) => backend,
                    // Half precision unavailable or broken; retry at single.
                    Err(_) => install(factory(Precision::Single)?)?,
                }
            }
        };

        let reference = match reference {
            Some(backend) => Some(install(backend)?),
            None => None,
        };

        // `shared` drops here; the backends hold the only weight handles.
        Ok(Evaluator {
            config,
            params,
            heads,
            cache,
            backend,
            reference,
            weight_bytes,
        })
    }

    pub fn params(&self) -> &NetParams {
        &self.params
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn summary(&self) -> WeightsSummary {
        WeightsSummary {
            params: self.params.clone(),
        }
    }

    pub fn is_sai(&self) -> bool {
        self.params.is_sai()
    }

    /// Approximate resident bytes of the weight tensors.
    pub fn estimated_size(&self) -> usize {
        self.weight_bytes
    }

    pub fn estimated_cache_size(&self) -> usize {
        self.cache.estimated_size()
    }

    pub fn cache_resize(&self, max_count: usize) {
        self.cache.resize(max_count);
    }

    pub fn cache_clear(&self) {
        self.cache.clear();
    }

    /// Reject new evaluations; in-flight `forward` calls raise
    /// [`EvalError::Halted`] as soon as the backend notices.
    pub fn drain_evals(&self) {
        self.backend.drain();
    }

    /// Reopen for business after [`Evaluator::drain_evals`].
    pub fn resume_evals(&self) {
        self.backend.resume();
    }

    /// Evaluate `state`. See [`Ensemble`] for the symmetry modes; cache
    /// probing also tries the seven symmetric hashes in the opening.
    pub fn get_output<G: GameView>(
        &self,
        state: &G,
        ensemble: Ensemble,
        read_cache: bool,
        write_cache: bool,
        force_selfcheck: bool,
    ) -> Result<Netresult, EvalError> {
        if read_cache && ensemble != Ensemble::Average {
            if let Some(result) = self.probe_cache(state) {
                return Ok(result);
            }
        }

        let mut result = match ensemble {
            Ensemble::Direct(symmetry) => {
                assert!(symmetry < NUM_SYMMETRIES);
                self.get_output_internal(state, symmetry, false)?
            }
            Ensemble::Average => {
                let mut average = Netresult {
                    beta: 0.0,
                    beta2: 0.0,
                    ..Netresult::default()
                };
                let weight = 1.0 / NUM_SYMMETRIES as f32;
                for symmetry in 0..NUM_SYMMETRIES {
                    let partial = self.get_output_internal(state, symmetry, false)?;
                    average.policy_pass += partial.policy_pass * weight;
                    average.value += partial.value * weight;
                    average.alpha += partial.alpha * weight;
                    average.beta += partial.beta * weight;
                    average.beta2 += partial.beta2 * weight;
                    average.is_sai = partial.is_sai;
                    for (acc, p) in average.policy.iter_mut().zip(&partial.policy) {
                        *acc += p * weight;
                    }
                }
                average
            }
            Ensemble::RandomSymmetry => {
                let symmetry = rand::thread_rng().gen_range(0..NUM_SYMMETRIES);
                let result = self.get_output_internal(state, symmetry, false)?;
                if self.reference.is_some()
                    && (force_selfcheck
                        || rand::thread_rng().gen_range(0..SELFCHECK_PROBABILITY) == 0)
                {
                    let reference = self.get_output_internal(state, symmetry, true)?;
                    compare_net_outputs(&result, &reference)?;
                }
                result
            }
        };

        // ELF-style networks report value in black's frame.
        if self.params.value_black_frame && state.to_move() == Color::White {
            result.value = 1.0 - result.value;
        }

        if write_cache {
            self.cache.insert(state.hash(), result.clone());
        }

        Ok(result)
    }

    fn probe_cache<G: GameView>(&self, state: &G) -> Option<Netresult> {
        let mut hit = self.cache.lookup(state.hash());

        // Outside self-play, early-opening positions are probed under all
        // symmetries so one evaluation serves the whole orbit.
        if hit.is_none()
            && !self.config.play.noise
            && self.config.play.random_cnt == 0
            && state.movenum() < SYM_CACHE_OPENING_MOVES
        {
            let tables = symmetry_tables();
            for symmetry in 0..NUM_SYMMETRIES {
                if symmetry == IDENTITY_SYMMETRY {
                    continue;
                }
                if let Some(stored) = self.cache.lookup(state.symmetry_hash(symmetry)) {
                    let mut corrected = stored.clone();
                    for (idx, slot) in corrected.policy.iter_mut().enumerate() {
                        *slot = stored.policy[tables.map(symmetry, idx)];
                    }
                    hit = Some(corrected);
                    break;
                }
            }
        }

        let mut result = hit?;
        if result.is_sai {
            self.apply_sai_winrate(&mut result, state);
        }
        Some(result)
    }

    fn apply_sai_winrate<G: GameView>(&self, result: &mut Netresult, state: &G) {
        let komi = state.komi_adj();
        let bonus = if state.to_move() == Color::White {
            komi
        } else {
            -komi
        };
        result.value = sigmoid(result.alpha, result.beta, bonus, result.beta2).0;
    }

    fn get_output_internal<G: GameView>(
        &self,
        state: &G,
        symmetry: usize,
        use_reference: bool,
    ) -> Result<Netresult, EvalError> {
        debug_assert!(symmetry < NUM_SYMMETRIES);

        let input = gather_features(state, symmetry, &self.params.encoding_spec());
        let mut policy_data = vec![0.0f32; self.params.policy_outputs * NUM_INTERSECTIONS];
        let mut val_data =
            vec![0.0f32; self.params.value_plane_outputs() * NUM_INTERSECTIONS];

        let backend = if use_reference {
            self.reference.as_deref().ok_or(EvalError::Backend(
                "no reference backend installed".to_string(),
            ))?
        } else {
            self.backend.as_ref()
        };
        backend.forward(&input, &mut policy_data, &mut val_data)?;

        // Policy head.
        let policy_logits =
            innerproduct::<false>(&policy_data, &self.heads.ip_pol_w, &self.heads.ip_pol_b);
        let outputs = softmax(&policy_logits, self.config.eval.softmax_temp);

        // Value head.
        if self.params.val_pool_outputs > 0 {
            val_data = reduce_mean(&val_data, NUM_INTERSECTIONS);
        }
        val_data = self.run_value_dense_tower(val_data);

        let val_channels =
            innerproduct::<true>(&val_data, &self.heads.ip1_val_w, &self.heads.ip1_val_b);
        let val_output =
            innerproduct::<false>(&val_channels, &self.heads.ip2_val_w, &self.heads.ip2_val_b);

        let mut result = Netresult::default();

        if self.params.value_head_kind == ValueHeadKind::Single {
            // Logit of the winrate for LZ networks.
            result.alpha = 2.0 * val_output[0];
            result.beta = 1.0;
            result.value = sigmoid(result.alpha, 1.0, 0.0, -1.0).0;
            result.is_sai = false;
        } else {
            match self.params.value_head_kind {
                ValueHeadKind::DoubleY => {
                    let vbe_channels = innerproduct::<true>(
                        &val_data,
                        &self.heads.ip1_vbe_w,
                        &self.heads.ip1_vbe_b,
                    );
                    let vbe_output = innerproduct::<false>(
                        &vbe_channels,
                        &self.heads.ip2_vbe_w,
                        &self.heads.ip2_vbe_b,
                    );
                    result.beta = vbe_output[0];
                    if self.params.vbe_head_rets == 2 {
                        result.beta2 = vbe_output[1];
                    }
                }
                ValueHeadKind::DoubleT => {
                    let vbe_output = innerproduct::<false>(
                        &val_channels,
                        &self.heads.ip2_vbe_w,
                        &self.heads.ip2_vbe_b,
                    );
                    result.beta = vbe_output[0];
                    if self.params.vbe_head_rets == 2 {
                        result.beta2 = vbe_output[1];
                    }
                }
                ValueHeadKind::DoubleI => {
                    result.beta = val_output[1];
                    if self.params.vbe_head_rets == 2 {
                        result.beta2 = val_output[2];
                    }
                }
                ValueHeadKind::Single => unreachable!(),
            }

            if !self.params.quartile_encoding {
                result.alpha = val_output[0];

                // betatune is expressed in log2 units.
                let beta_nat_tune = self.config.eval.betatune * std::f32::consts::LN_2;
                result.beta =
                    (result.beta + beta_nat_tune).exp() * 10.0 / NUM_INTERSECTIONS as f32;
                if self.params.vbe_head_rets == 2 {
                    result.beta2 =
                        (result.beta2 + beta_nat_tune).exp() * 10.0 / NUM_INTERSECTIONS as f32;
                }
            } else {
                // The α head reported two score quartiles; β comes from
                // their spread.
                let q1 = val_output[0];
                let q2 = result.beta;
                const EPS: f32 = 0.05;
                let log3 = 3.0f32.ln();
                result.alpha = 0.5 * (q1 + q2);
                result.beta = 2.0 * log3 / (EPS + (q2 - q1).max(0.0));
            }

            result.is_sai = true;
            self.apply_sai_winrate(&mut result, state);
        }

        // Rotate the policy back to the identity orientation.
        let tables = symmetry_tables();
        for (idx, &p) in outputs[..NUM_INTERSECTIONS].iter().enumerate() {
            result.policy[tables.map(symmetry, idx)] = p;
        }
        result.policy_pass = outputs[NUM_INTERSECTIONS];

        Ok(result)
    }

    fn run_value_dense_tower(&self, mut val_data: Vec<f32>) -> Vec<f32> {
        let heads = &self.heads;
        let mut res: Vec<f32> = Vec::new();
        let mut parity = 0usize;
        for i in 0..heads.vh_dense_weights.len() {
            let width = heads.vh_dense_biases[i].len();
            if i == 0 && val_data.len() != width {
                // Entry layer changes dimensionality; no shortcut possible.
                val_data = innerproduct::<false>(
                    &val_data,
                    &heads.vh_dense_weights[i],
                    &heads.vh_dense_biases[i],
                );
                batchnorm(
                    width,
                    1,
                    &mut val_data,
                    &heads.vh_dense_bn_means[i],
                    &heads.vh_dense_bn_vars[i],
                    None,
                );
                parity = 1;
            } else if !RESDENSE_IN_VALUE_HEAD || i % 2 == parity {
                std::mem::swap(&mut val_data, &mut res);
                val_data = innerproduct::<false>(
                    &res,
                    &heads.vh_dense_weights[i],
                    &heads.vh_dense_biases[i],
                );
                batchnorm(
                    width,
                    1,
                    &mut val_data,
                    &heads.vh_dense_bn_means[i],
                    &heads.vh_dense_bn_vars[i],
                    None,
                );
            } else {
                val_data = innerproduct::<false>(
                    &val_data,
                    &heads.vh_dense_weights[i],
                    &heads.vh_dense_biases[i],
                );
                batchnorm(
                    width,
                    1,
                    &mut val_data,
                    &heads.vh_dense_bn_means[i],
                    &heads.vh_dense_bn_vars[i],
                    Some(&res),
                );
            }
        }
        val_data
    }

    /// Run `num_threads` workers hammering RANDOM_SYMMETRY evaluations for
    /// `duration`, cache reads off.
    pub fn benchmark_time<G: GameView + Sync>(
        &self,
        state: &G,
        duration: Duration,
    ) -> Result<BenchmarkReport, EvalError> {
        self.benchmark_inner(state, move |_, start| start.elapsed() >= duration)
    }

    /// Same as [`Evaluator::benchmark_time`], stopping after `iterations`
    /// evaluations.
    pub fn benchmark_iters<G: GameView + Sync>(
        &self,
        state: &G,
        iterations: usize,
    ) -> Result<BenchmarkReport, EvalError> {
        self.benchmark_inner(state, move |count, _| {
            count.load(Ordering::Relaxed) >= iterations
        })
    }

    fn benchmark_inner<G, F>(&self, state: &G, done: F) -> Result<BenchmarkReport, EvalError>
    where
        G: GameView + Sync,
        F: Fn(&AtomicUsize, Instant) -> bool + Sync,
    {
        let threads = self.config.eval.num_threads.max(1);
        let count = AtomicUsize::new(0);
        let first_error: Mutex<Option<EvalError>> = Mutex::new(None);
        let start = Instant::now();

        std::thread::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|| loop {
                    if done(&count, start) || first_error.lock().is_some() {
                        break;
                    }
                    match self.get_output(state, Ensemble::RandomSymmetry, false, true, false) {
                        Ok(_) => {
                            count.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            let mut slot = first_error.lock();
                            if slot.is_none() {
                                *slot = Some(err);
                            }
                            break;
                        }
                    }
                });
            }
        });

        if let Some(err) = first_error.into_inner() {
            return Err(err);
        }

        let seconds = start.elapsed().as_secs_f64();
        let evaluations = count.into_inner();
        Ok(BenchmarkReport {
            evaluations,
            seconds,
            evals_per_second: evaluations as f64 / seconds.max(1e-9),
        })
    }
}

fn compare_net_outputs(data: &Netresult, reference: &Netresult) -> Result<(), EvalError> {
    let mut error = l2_distance(&data.policy, &reference.policy).powi(2);
    error += (data.policy_pass - reference.policy_pass).powi(2);
    error += (data.value - reference.value).powi(2);
    let error = error.sqrt();

    if error > SELFCHECK_MAX_ERROR || error.is_nan() {
        return Err(EvalError::SelfCheck { distance: error });
    }
    Ok(())
}

/// Render the per-mill policy grid plus the value block, the way operators
/// read it in the console.
pub fn render_heatmap<G: GameView>(
    state: &G,
    result: &Netresult,
    top_moves: bool,
    agent: &AgentEval,
) -> String {
    use tengen_core::BoardView;

    let color = state.to_move();
    let mut legal_policy = result.policy_pass;
    let mut illegal_policy = 0.0f32;
    let mut policies = [0.0f32; NUM_INTERSECTIONS];

    for y in 0..BOARD_SIZE {
        for x in 0..BOARD_SIZE {
            let idx = y * BOARD_SIZE + x;
            let policy = result.policy[idx];
            if state.board().is_legal(color, Move::from_xy(x, y)) {
                legal_policy += policy;
                policies[idx] = policy;
            } else {
                illegal_policy += policy;
            }
        }
    }

    let mut out = String::new();
    for y in (0..BOARD_SIZE).rev() {
        for x in 0..BOARD_SIZE {
            let permill = (policies[y * BOARD_SIZE + x] * 1000.0 / legal_policy) as i32;
            let _ = write!(out, "{permill:3} ");
        }
        out.push('\n');
    }
    let _ = writeln!(
        out,
        "pass: {}, illegal: {}",
        (result.policy_pass * 1000.0 / legal_policy) as i32,
        (illegal_policy * 1000.0) as i32
    );

    if result.is_sai {
        let (lo, hi) = if agent.quantile_mu < agent.quantile_lambda {
            (agent.quantile_mu, agent.quantile_lambda)
        } else {
            (agent.quantile_lambda, agent.quantile_mu)
        };
        let _ = write!(out, "alpha: {:5.2}    ", result.alpha);
        if result.beta2 > 0.0 {
            let _ = write!(out, "betas: {:.2} {:.2} ", result.beta, result.beta2);
        } else {
            let _ = write!(out, "beta: {:.2}     ", result.beta);
        }
        let _ = writeln!(out, "winrate: {:2.1}%", result.value * 100.0);
        let _ = writeln!(
            out,
            "komi: {:2.1}       alpkt tree: {:3.2}",
            state.komi_adj(),
            agent.alpkt_tree
        );
        let _ = writeln!(
            out,
            "lambda: {:.2}    mu: {:.2}       interval: [{:.1}, {:.1}]",
            agent.lambda, agent.mu, lo, hi
        );
    } else {
        let _ = writeln!(out, "value: {:.1}%", result.value * 100.0);
    }

    if top_moves {
        let mut moves: Vec<(f32, Move)> = (0..NUM_INTERSECTIONS)
            .filter(|&i| {
                let (x, y) = (i % BOARD_SIZE, i / BOARD_SIZE);
                state.board().stone_at(x, y).is_none()
            })
            .map(|i| (result.policy[i], Move::Vertex(i as u16)))
            .collect();
        moves.push((result.policy_pass, Move::Pass));
        moves.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut cumulative = 0.0f32;
        for (policy, mv) in moves {
            if cumulative > 0.85 || policy < 0.01 {
                break;
            }
            match mv.xy() {
                Some((x, y)) => {
                    let _ = writeln!(out, "{policy:1.3} ({x}, {y})");
                }
                None => {
                    let _ = writeln!(out, "{policy:1.3} (pass)");
                }
            }
            cumulative += policy;
        }
    }

    out
}
