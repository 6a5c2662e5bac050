//! The search-tree node: concurrently updated statistics, the expansion
//! state machine, and the SAI quantile trackers.

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use tengen_core::{Color, Move};
use tengen_net::{sigmoid, sigmoid_interval_avg};

use crate::edge::Edge;
use crate::sync::{AtomicF32, AtomicF64};

/// Transient visit penalty applied per parallel descent.
pub const VIRTUAL_LOSS_COUNT: i32 = 3;

/// Node liveness for pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeStatus {
    Active = 0,
    Pruned = 1,
    Invalid = 2,
}

/// The expansion lock: INITIAL → EXPANDING (CAS) → EXPANDED, with
/// EXPANDING → INITIAL on cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExpandState {
    Initial = 0,
    Expanding = 1,
    Expanded = 2,
}

fn expand_state_from(raw: u8) -> ExpandState {
    match raw {
        0 => ExpandState::Initial,
        1 => ExpandState::Expanding,
        _ => ExpandState::Expanded,
    }
}

/// A leaf evaluation as backed up through the tree, black's frame.
#[derive(Debug, Clone, Copy)]
pub struct LeafEval {
    /// Raw network win probability π.
    pub black_pi: f32,
    /// Score logit with komi folded in.
    pub alpkt: f32,
    pub beta: f32,
    pub beta2: f32,
    pub is_sai: bool,
}

impl LeafEval {
    pub fn from_eval(black_pi: f32, alpkt: f32, beta: f32, beta2: f32, is_sai: bool) -> LeafEval {
        LeafEval {
            black_pi,
            alpkt,
            beta,
            beta2,
            is_sai,
        }
    }

    /// The raw winrate, used directly by LZ-style networks.
    pub fn eval(&self) -> f32 {
        self.black_pi
    }

    /// SAI mixing: mean winrate over the quantile interval `[xbar, xbase]`.
    pub fn eval_with_bonus(&self, xbar: f32, xbase: f32) -> f32 {
        sigmoid_interval_avg(self.alpkt, self.beta, self.beta2, xbar, xbase)
    }
}

/// One quantile tracker: the running quantile plus the gradient sums its
/// stochastic-approximation update needs.
#[derive(Default)]
struct QuantileTracker {
    quantile: AtomicF64,
    g_sum: AtomicF64,
    gxgp_sum: AtomicF64,
}

impl QuantileTracker {
    /// Accumulate the sigmoid value/derivative terms for the current
    /// quantile position.
    fn accumulate(&self, new_alpkt: f32, new_beta: f32, new_beta2: f32) {
        let old_quantile = self.quantile.load() as f32;
        let g = sigmoid(new_alpkt, new_beta, old_quantile, new_beta2);
        let right_beta = if new_beta2 > 0.0 && new_alpkt + old_quantile > 0.0 {
            new_beta2
        } else {
            new_beta
        };
        let gp_term = right_beta * g.0 * g.1;
        let gxgp_term = g.0 - old_quantile * gp_term;
        self.gxgp_sum.add(f64::from(gxgp_term));
        self.g_sum.add(f64::from(gp_term));
    }

    /// One stochastic-approximation step toward the `parameter`-quantile of
    /// the subtree's score distribution.
    fn step(
        &self,
        parameter: f32,
        new_visits: i32,
        avg_pi: f32,
        new_alpkt: f32,
        new_beta: f32,
        new_beta2: f32,
    ) {
        if parameter.abs() < 1e-5 {
            self.quantile.store(0.0);
            return;
        }
        if new_visits <= 0 {
            return;
        }
        let avg_p = 0.5 * parameter + (1.0 - parameter) * avg_pi;
        let old_quantile = self.quantile.load() as f32;

        if new_visits <= 8 && old_quantile == 0.0 {
            // Closed-form bootstrap; avg_p is away from 0 and 1 here.
            let right_beta = if new_beta2 > 0.0 && avg_p > 0.5 {
                new_beta2
            } else {
                new_beta
            };
            let quantile =
                (avg_p.ln() - (-avg_p).ln_1p()) / right_beta.max(0.01) - new_alpkt;
            self.quantile.store(f64::from(quantile));
        } else {
            let avg_f_prime = (self.g_sum.load() / f64::from(new_visits)) as f32;
            let avg_f =
                (self.gxgp_sum.load() / f64::from(new_visits)) as f32 + old_quantile * avg_f_prime;
            let delta = (avg_p - avg_f) / avg_f_prime.max(0.1);
            self.quantile.add(f64::from(delta));
        }
    }
}

/// A vertex of the search tree.
///
/// All statistics are relaxed atomics; the child list only mutates under the
/// expansion lock.
pub struct SearchNode {
    mv: Move,

    pub(crate) children: RwLock<Vec<Arc<Edge>>>,
    /// Children with priors below `max_prior · this` were not materialized;
    /// 2.0 means "never expanded", 0.0 "fully expanded".
    pub(crate) min_psa_ratio_children: AtomicF32,

    visits: AtomicI32,
    virtual_loss: AtomicI32,
    forced: AtomicI32,
    black_eval_sum: AtomicF64,
    squared_eval_diff: AtomicF64,
    pi_sum: AtomicF64,

    net_pi: AtomicF32,
    net_alpkt: AtomicF32,
    net_beta: AtomicF32,
    net_beta2: AtomicF32,

    quantile_lambda: QuantileTracker,
    quantile_mu: QuantileTracker,
    quantile_one: QuantileTracker,
    quantile_updates: AtomicI32,
    lambda: AtomicF32,
    mu: AtomicF32,

    status: AtomicU8,
    expand_state: AtomicU8,
}

/// Aggregate SAI statistics of a subtree.
#[derive(Debug, Clone, Copy)]
pub struct UctStats {
    pub alpkt_tree: f32,
    pub beta_median: f32,
    pub azwinrate_avg: f32,
}

/// Snapshot of one node's evaluation state.
#[derive(Debug, Clone, Copy)]
pub struct StateEval {
    pub visits: i32,
    pub net_alpkt: f32,
    pub net_beta: f32,
    pub net_pi: f32,
    pub quantile_lambda: f32,
    pub quantile_mu: f32,
    pub eval: f32,
    pub alpkt_tree: f32,
}

impl SearchNode {
    pub fn new(mv: Move) -> SearchNode {
        SearchNode {
            mv,
            children: RwLock::new(Vec::new()),
            min_psa_ratio_children: AtomicF32::new(2.0),
            visits: AtomicI32::new(0),
            virtual_loss: AtomicI32::new(0),
            forced: AtomicI32::new(0),
            black_eval_sum: AtomicF64::new(0.0),
            squared_eval_diff: AtomicF64::new(0.0),
            pi_sum: AtomicF64::new(0.0),
            net_pi: AtomicF32::new(0.5),
            net_alpkt: AtomicF32::new(0.0),
            net_beta: AtomicF32::new(1.0),
            net_beta2: AtomicF32::new(1.0),
            quantile_lambda: QuantileTracker::default(),
            quantile_mu: QuantileTracker::default(),
            quantile_one: QuantileTracker::default(),
            quantile_updates: AtomicI32::new(0),
            lambda: AtomicF32::new(0.0),
            mu: AtomicF32::new(0.0),
            status: AtomicU8::new(NodeStatus::Active as u8),
            expand_state: AtomicU8::new(ExpandState::Initial as u8),
        }
    }

    /// A root node (no incoming move).
    pub fn new_root() -> SearchNode {
        SearchNode::new(Move::Pass)
    }

    pub fn get_move(&self) -> Move {
        self.mv
    }

    pub fn first_visit(&self) -> bool {
        self.visits() == 0
    }

    pub fn visits(&self) -> i32 {
        self.visits.load(Ordering::Relaxed)
    }

    pub fn forced_count(&self) -> i32 {
        self.forced.load(Ordering::Relaxed)
    }

    pub fn virtual_loss(&self) {
        self.virtual_loss
            .fetch_add(VIRTUAL_LOSS_COUNT, Ordering::Relaxed);
    }

    pub fn virtual_loss_undo(&self) {
        self.virtual_loss
            .fetch_sub(VIRTUAL_LOSS_COUNT, Ordering::Relaxed);
    }

    pub fn virtual_loss_count(&self) -> i32 {
        self.virtual_loss.load(Ordering::Relaxed)
    }

    // ---- backup ------------------------------------------------------

    /// Back up one evaluation, mixing SAI results over this node's own
    /// quantile interval.
    pub fn update(&self, outcome: &LeafEval, forced: bool) -> f32 {
        self.update_with_interval(
            outcome,
            self.quantile_lambda.quantile.load() as f32,
            self.quantile_mu.quantile.load() as f32,
            forced,
        )
    }

    /// Back up one evaluation with an explicit mixing interval (the driver
    /// passes the father's quantiles along the descent path).
    pub fn update_with_interval(
        &self,
        outcome: &LeafEval,
        xbar: f32,
        xbase: f32,
        forced: bool,
    ) -> f32 {
        let eval = if outcome.is_sai {
            outcome.eval_with_bonus(xbar, xbase)
        } else {
            outcome.eval()
        };

        // Cache values: concurrent updates make the exact pairing of sums
        // and counts approximate, which Welford tolerates.
        let old_eval = self.black_eval_sum.load() as f32;
        let old_visits = self.visits();
        let old_delta = if old_visits > 0 {
            eval - old_eval / old_visits as f32
        } else {
            0.0
        };
        self.visits.fetch_add(1, Ordering::Relaxed);
        self.black_eval_sum.add(f64::from(eval));
        let new_delta = eval - (old_eval + eval) / (old_visits + 1) as f32;
        self.squared_eval_diff
            .add(f64::from(old_delta * new_delta));
        if forced {
            self.forced.fetch_add(1, Ordering::Relaxed);
        }
        self.pi_sum.add(f64::from(outcome.eval()));
        eval
    }

    /// Update all three quantile trackers with a fresh network output.
    pub fn update_all_quantiles(&self, new_alpkt: f32, new_beta: f32, new_beta2: f32) {
        let avg_pi = self.get_avg_pi(Color::Black);
        let new_visits = self.quantile_updates.fetch_add(1, Ordering::Relaxed) + 1;

        self.quantile_lambda.accumulate(new_alpkt, new_beta, new_beta2);
        self.quantile_mu.accumulate(new_alpkt, new_beta, new_beta2);
        self.quantile_one.accumulate(new_alpkt, new_beta, new_beta2);

        self.quantile_lambda.step(
            self.lambda.load(),
            new_visits,
            avg_pi,
            new_alpkt,
            new_beta,
            new_beta2,
        );
        self.quantile_mu.step(
            self.mu.load(),
            new_visits,
            avg_pi,
            new_alpkt,
            new_beta,
            new_beta2,
        );
        self.quantile_one
            .step(1.0, new_visits, avg_pi, new_alpkt, new_beta, new_beta2);
    }

    pub fn quantile_update_count(&self) -> i32 {
        self.quantile_updates.load(Ordering::Relaxed)
    }

    // ---- evals -------------------------------------------------------

    /// Eval in `tomove`'s frame with an explicit virtual-loss adjustment.
    pub fn get_raw_eval(&self, tomove: Color, virtual_loss: i32) -> f32 {
        let visits = self.visits() + virtual_loss;
        if visits <= 0 {
            return 0.0;
        }
        let mut black_eval = self.black_eval_sum.load();
        if tomove == Color::White {
            // A virtual loss is a black win from white's perspective.
            black_eval += f64::from(virtual_loss);
        }
        let eval = (black_eval / f64::from(visits)) as f32;
        if tomove == Color::White {
            1.0 - eval
        } else {
            eval
        }
    }

    /// Eval including the current virtual losses.
    pub fn get_eval(&self, tomove: Color) -> f32 {
        self.get_raw_eval(tomove, self.virtual_loss.load(Ordering::Relaxed))
    }

    pub fn get_net_pi(&self, tomove: Color) -> f32 {
        let pi = self.net_pi.load();
        if tomove == Color::White {
            1.0 - pi
        } else {
            pi
        }
    }

    pub fn get_avg_pi(&self, tomove: Color) -> f32 {
        let visits = self.visits() as f32;
        let avg = if visits > 0.5 {
            (self.pi_sum.load() / f64::from(visits)) as f32
        } else {
            0.5
        };
        if tomove == Color::White {
            1.0 - avg
        } else {
            avg
        }
    }

    /// Sample variance of the backed-up evals (Welford).
    pub fn get_eval_variance(&self, default_var: f32) -> f32 {
        let visits = self.visits();
        if visits > 1 {
            (self.squared_eval_diff.load() / f64::from(visits - 1)) as f32
        } else {
            default_var
        }
    }

    pub fn set_net_values(&self, pi: f32, alpkt: f32, beta: f32, beta2: f32) {
        self.net_pi.store(pi);
        self.net_alpkt.store(alpkt);
        self.net_beta.store(beta);
        self.net_beta2.store(beta2);
    }

    pub fn net_alpkt(&self) -> f32 {
        self.net_alpkt.load()
    }

    pub fn net_beta(&self) -> f32 {
        self.net_beta.load()
    }

    pub fn net_beta2(&self) -> f32 {
        self.net_beta2.load()
    }

    pub fn get_quantile_lambda(&self, tomove: Color) -> f32 {
        let q = self.quantile_lambda.quantile.load() as f32;
        if tomove == Color::White {
            -q
        } else {
            q
        }
    }

    pub fn get_quantile_mu(&self, tomove: Color) -> f32 {
        let q = self.quantile_mu.quantile.load() as f32;
        if tomove == Color::White {
            -q
        } else {
            q
        }
    }

    pub fn get_quantile_one(&self) -> f32 {
        self.quantile_one.quantile.load() as f32
    }

    pub fn lambda(&self) -> f32 {
        self.lambda.load()
    }

    pub fn mu(&self) -> f32 {
        self.mu.load()
    }

    /// Set the λ/μ mixing weights from configuration, indexed by whether the
    /// side to move is the engine and whether it is losing.
    pub fn set_lambda_mu<G: tengen_core::GameView>(
        &self,
        state: &G,
        config: &tengen_core::Config,
    ) {
        let engine = state.is_engine_color();
        let losing = self.get_raw_eval(state.to_move(), 0) < 0.5;
        self.lambda.store(config.lambda_for(engine, losing));
        self.mu.store(config.mu_for(engine, losing));
    }

    // ---- expansion state machine ------------------------------------

    pub fn acquire_expanding(&self) -> bool {
        self.expand_state
            .compare_exchange(
                ExpandState::Initial as u8,
                ExpandState::Expanding as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn expand_done(&self) {
        let previous = self
            .expand_state
            .swap(ExpandState::Expanded as u8, Ordering::AcqRel);
        debug_assert_eq!(previous, ExpandState::Expanding as u8);
    }

    pub fn expand_cancel(&self) {
        let previous = self
            .expand_state
            .swap(ExpandState::Initial as u8, Ordering::AcqRel);
        debug_assert_eq!(previous, ExpandState::Expanding as u8);
    }

    /// Bounded spin until the node is not mid-expansion.
    pub fn wait_expanded(&self) {
        while self.expand_state.load(Ordering::Acquire) == ExpandState::Expanding as u8 {
            std::hint::spin_loop();
        }
        debug_assert_eq!(
            self.expand_state.load(Ordering::Acquire),
            ExpandState::Expanded as u8
        );
    }

    pub fn expand_state(&self) -> ExpandState {
        expand_state_from(self.expand_state.load(Ordering::Acquire))
    }

    pub fn has_children(&self) -> bool {
        self.min_psa_ratio_children.load() <= 1.0
    }

    /// Whether an expansion at `min_psa_ratio` would add children.
    pub fn expandable(&self, min_psa_ratio: f32) -> bool {
        min_psa_ratio < self.min_psa_ratio_children.load()
    }

    // ---- status ------------------------------------------------------

    pub fn invalidate(&self) {
        self.status.store(NodeStatus::Invalid as u8, Ordering::Relaxed);
    }

    pub fn set_active(&self, active: bool) {
        if self.is_valid() {
            let status = if active {
                NodeStatus::Active
            } else {
                NodeStatus::Pruned
            };
            self.status.store(status as u8, Ordering::Relaxed);
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status.load(Ordering::Relaxed) != NodeStatus::Invalid as u8
    }

    pub fn is_active(&self) -> bool {
        self.status.load(Ordering::Relaxed) == NodeStatus::Active as u8
    }

    // ---- children ----------------------------------------------------

    /// Snapshot of the child list. The list only grows, and only under the
    /// expansion lock.
    pub fn children(&self) -> Vec<Arc<Edge>> {
        self.children.read().clone()
    }

    pub fn child_count(&self) -> usize {
        self.children.read().len()
    }

    /// Find a child edge by move and inflate it.
    pub fn select_child(&self, mv: Move) -> Option<Arc<Edge>> {
        let children = self.children.read();
        let edge = children.iter().find(|edge| edge.mv() == mv)?;
        edge.inflate();
        Some(Arc::clone(edge))
    }

    /// Subtree size; also rewinds still-expandable nodes to INITIAL so the
    /// next search may expand them further.
    pub fn count_nodes_and_clear_expand_state(&self) -> usize {
        let mut count = self.child_count();
        if self.expandable(0.0) {
            self.expand_state
                .store(ExpandState::Initial as u8, Ordering::Release);
        }
        for edge in self.children.read().iter() {
            if let Some(node) = edge.node() {
                count += node.count_nodes_and_clear_expand_state();
            }
        }
        count
    }

    /// Reliability heuristic: a child with this few visits relative to its
    /// father may still be dropped from the search.
    pub fn low_visits_child(&self, child: &SearchNode) -> bool {
        let father_visits = self.visits();
        let child_visits = child.visits();
        child_visits * (child_visits - 3) < father_visits - 2
    }

    // ---- subtree statistics -----------------------------------------

    fn get_subtree_alpkts(
        &self,
        out: &mut Vec<f32>,
        passes: i32,
        is_tromptaylor_scoring: bool,
    ) {
        let mut children_visits = 0;

        out.push(self.net_alpkt());
        for edge in self.children.read().iter() {
            let child_visits = edge.visits();
            if child_visits > 0 {
                if let Some(node) = edge.node() {
                    let pass = if edge.mv().is_pass() { 1 } else { 0 };
                    node.get_subtree_alpkts(out, (passes + 1) * pass, is_tromptaylor_scoring);
                    children_visits += child_visits;
                }
            }
        }

        // Visits without a matching child evaluation (second-pass nodes)
        // replicate this node's own value.
        let missing_nodes = self.visits() - children_visits - 1;
        if missing_nodes > 0 && is_tromptaylor_scoring {
            out.extend(std::iter::repeat(self.net_alpkt()).take(missing_nodes as usize));
        }
    }

    /// Median α+komi over the visited subtree.
    pub fn estimate_alpkt(&self, passes: i32, is_tromptaylor_scoring: bool) -> f32 {
        let mut subtree = Vec::new();
        self.get_subtree_alpkts(&mut subtree, passes, is_tromptaylor_scoring);
        median(&mut subtree)
    }

    fn get_subtree_betas(&self, out: &mut Vec<f32>) {
        out.push(self.net_beta());
        for edge in self.children.read().iter() {
            if edge.visits() > 0 {
                if let Some(node) = edge.node() {
                    node.get_subtree_betas(out);
                }
            }
        }
    }

    pub fn get_beta_median(&self) -> f32 {
        let mut subtree = Vec::new();
        self.get_subtree_betas(&mut subtree);
        median(&mut subtree)
    }

    fn az_sum_recursion(&self, sum: &mut f64, count: &mut usize) {
        *sum += f64::from(self.net_pi.load());
        *count += 1;
        for edge in self.children.read().iter() {
            if edge.visits() > 0 {
                if let Some(node) = edge.node() {
                    node.az_sum_recursion(sum, count);
                }
            }
        }
    }

    pub fn get_azwinrate_avg(&self) -> f32 {
        let mut sum = 0.0f64;
        let mut count = 0usize;
        self.az_sum_recursion(&mut sum, &mut count);
        (sum / count.max(1) as f64) as f32
    }

    pub fn get_uct_stats(&self) -> UctStats {
        UctStats {
            alpkt_tree: -self.get_quantile_one(),
            beta_median: self.get_beta_median(),
            azwinrate_avg: self.get_azwinrate_avg(),
        }
    }

    pub fn score_stats(&self) -> (f32, f32, f32) {
        (
            -self.get_quantile_one(),
            self.net_beta(),
            self.get_eval(Color::Black),
        )
    }

    pub fn state_eval(&self) -> StateEval {
        StateEval {
            visits: self.visits(),
            net_alpkt: self.net_alpkt(),
            net_beta: self.net_beta(),
            net_pi: self.net_pi.load(),
            quantile_lambda: self.get_quantile_lambda(Color::Black),
            quantile_mu: self.get_quantile_mu(Color::Black),
            eval: self.get_eval(Color::Black),
            alpkt_tree: -self.get_quantile_one(),
        }
    }
}

fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        0.5 * (values[mid - 1] + values[mid])
    }
}
