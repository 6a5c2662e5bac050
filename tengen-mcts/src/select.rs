//! Child selection: the PUCT rule, first-play urgency, and LCB-based
//! best-move ordering.

use std::cmp::Ordering;
use std::sync::Arc;

use tengen_core::{Color, Config, GameView, Move};

use crate::edge::Edge;
use crate::node::{ExpandState, SearchNode};

/// One-sided 95% Student-t quantiles by degrees of freedom, for the LCB.
const T_QUANTILES: [f32; 30] = [
    6.3138, 2.9200, 2.3534, 2.1318, 2.0150, 1.9432, 1.8946, 1.8595, 1.8331, 1.8125, 1.7959,
    1.7823, 1.7709, 1.7613, 1.7531, 1.7459, 1.7396, 1.7341, 1.7291, 1.7247, 1.7207, 1.7171,
    1.7139, 1.7109, 1.7081, 1.7056, 1.7033, 1.7011, 1.6991, 1.6973,
];

/// t-quantile for `df` degrees of freedom, asymptotic beyond the table.
pub fn cached_t_quantile(df: i32) -> f32 {
    if df < 1 {
        return T_QUANTILES[0];
    }
    T_QUANTILES
        .get(df as usize - 1)
        .copied()
        .unwrap_or(1.6449)
}

fn compute_numerator(config: &Config, visits: usize) -> f64 {
    let visits = visits as f64;
    (visits * (f64::from(config.search.logpuct) * visits + f64::from(config.search.logconst)).ln())
        .sqrt()
}

impl SearchNode {
    /// Lower confidence bound of the winrate in `color`'s frame.
    pub fn get_eval_lcb(&self, color: Color) -> f32 {
        let visits = self.visits();
        if visits < 2 {
            // Large negative, but ordered by visits so 1 beats 0.
            return -1e6 + visits as f32;
        }
        let mean = self.get_raw_eval(color, 0);
        let stddev = (self.get_eval_variance(1.0) / visits as f32).sqrt();
        mean - cached_t_quantile(visits - 1) * stddev
    }

    /// First-play-urgency eval for unvisited children, plus the visited-child
    /// visit total the PUCT numerator wants.
    fn get_fpu_eval(&self, config: &Config, color: Color, is_root: bool) -> (f32, usize) {
        let mut total_visited_policy = 0.0f32;
        let mut max_eval = 0.0f32;
        let mut parent_visits = 0usize;
        let mut visited = 0;
        let mut avg_eval = 0.0f32;

        for edge in self.children.read().iter() {
            if !edge.valid() {
                continue;
            }
            let visits = edge.visits();
            if visits > 0 {
                let child_eval = edge.raw_eval(color);
                max_eval = max_eval.max(child_eval);
                parent_visits += visits as usize;
                total_visited_policy += edge.policy();
                visited += 1;
                avg_eval += (child_eval - avg_eval) / visited as f32;
            }
        }

        if config.search.fpu_avg {
            // Mean of the visited children excluding the best one.
            if visited > 1 {
                avg_eval -= (max_eval - avg_eval) / (visited - 1) as f32;
            }
            return (avg_eval, parent_visits);
        }

        let reduction = if is_root {
            config.search.fpu_root_reduction
        } else {
            config.search.fpu_reduction
        } * total_visited_policy.sqrt();

        let fpu = if config.search.fpu_zero {
            0.0
        } else {
            max_eval - reduction
        };
        (fpu, parent_visits)
    }

    /// PUCT child selection.
    ///
    /// Blocks until any in-flight expansion of this node finishes, then
    /// scores every active child and returns the best, inflating it (and
    /// seeding it with this node's network values) if it has no visits yet.
    pub fn uct_select_child<G: GameView>(
        &self,
        config: &Config,
        state: &G,
        is_root: bool,
        max_visits: i32,
        move_filter: &[Move],
        nopass: bool,
    ) -> Option<Arc<Edge>> {
        self.wait_expanded();

        let color = state.to_move();
        // Visited-children total, not self visits: transpositions and PV
        // virtual losses would skew the latter.
        let (fpu_eval, parent_visits) = self.get_fpu_eval(config, color, is_root);
        let numerator = compute_numerator(config, parent_visits);

        let children = self.children.read();
        let mut best: Option<&Arc<Edge>> = None;
        let mut best_value = f64::MIN;

        for edge in children.iter() {
            if !edge.active() {
                continue;
            }
            if !move_filter.is_empty() && !move_filter.contains(&edge.mv()) {
                continue;
            }

            let visits = edge.visits();
            // Bounded-visit rollouts keep the exploration wide, not deep.
            if max_visits > 0 && visits >= max_visits {
                continue;
            }

            let mut winrate = fpu_eval;
            if let Some(node) = edge.node() {
                if node.expand_state() == ExpandState::Expanding {
                    // Another worker is expanding this child; descending
                    // into it would block on the spin-wait.
                    winrate = -1.0;
                } else if visits > 0 {
                    winrate = node.get_eval(color);
                }
            }

            let mut psa = edge.policy();
            if nopass && edge.mv().is_pass() {
                psa = 0.0;
                winrate -= 0.05;
            }
            if state.passes() >= 1 && edge.mv().is_pass() {
                // After one pass, favor closing the game out.
                psa += 0.2;
            }
            if config.search.stdev_uct {
                let stdev = edge.eval_variance(0.25).sqrt();
                psa *= 2.0 * stdev;
            }

            let denom = if config.search.laddercode {
                let forced = edge.node().map_or(0, SearchNode::forced_count);
                1 + visits - forced
            } else {
                1 + visits
            };
            let value = f64::from(winrate)
                + f64::from(config.search.puct) * f64::from(psa) * numerator / f64::from(denom);

            if value > best_value {
                best_value = value;
                best = Some(edge);
            }
        }

        let best = best?;
        if best.visits() == 0 {
            let child = best.inflate();
            child.set_net_values(
                self.get_net_pi(Color::Black),
                self.net_alpkt(),
                self.net_beta(),
                self.net_beta2(),
            );
        }
        Some(Arc::clone(best))
    }

    /// The move to actually play: LCB when reliable, else visits, then
    /// policy, then eval.
    pub fn get_best_root_child(&self, config: &Config, color: Color) -> Option<Arc<Edge>> {
        self.wait_expanded();

        let children = self.children.read();
        let max_visits = children.iter().map(|e| e.visits()).max().unwrap_or(0);
        let lcb_min_visits = config.search.lcb_min_visit_ratio * max_visits as f32;

        let best = children
            .iter()
            .max_by(|a, b| node_cmp(a, b, color, lcb_min_visits, config.search.uselcb))?;
        best.inflate();
        Some(Arc::clone(best))
    }

    /// Order children best-first for PV extraction.
    pub fn sort_children(&self, config: &Config, color: Color) {
        let mut children = self.children.write();
        let max_visits = children.iter().map(|e| e.visits()).max().unwrap_or(0);
        let lcb_min_visits = config.search.lcb_min_visit_ratio * max_visits as f32;
        let uselcb = config.search.uselcb;
        children.sort_by(|a, b| node_cmp(b, a, color, lcb_min_visits, uselcb));
    }

    pub fn sort_children_by_policy(&self) {
        let mut children = self.children.write();
        children.sort_by(|a, b| {
            b.policy()
                .partial_cmp(&a.policy())
                .unwrap_or(Ordering::Equal)
        });
    }
}

/// `Ordering::Greater` means `a` is the better root move.
fn node_cmp(a: &Edge, b: &Edge, color: Color, lcb_min_visits: f32, uselcb: bool) -> Ordering {
    let a_visits = a.visits();
    let b_visits = b.visits();
    // LCB needs at least two visits to have a variance.
    let lcb_min_visits = lcb_min_visits.max(2.0);

    if uselcb && a_visits as f32 > lcb_min_visits && b_visits as f32 > lcb_min_visits {
        let a_lcb = a.eval_lcb(color);
        let b_lcb = b.eval_lcb(color);
        if a_lcb != b_lcb {
            return a_lcb
                .partial_cmp(&b_lcb)
                .unwrap_or(Ordering::Equal);
        }
    }

    if a_visits != b_visits {
        return a_visits.cmp(&b_visits);
    }

    if a_visits == 0 {
        return a
            .policy()
            .partial_cmp(&b.policy())
            .unwrap_or(Ordering::Equal);
    }

    a.eval(color)
        .partial_cmp(&b.eval(color))
        .unwrap_or(Ordering::Equal)
}
