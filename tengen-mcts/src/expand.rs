//! Node expansion: evaluate the position, fold symmetric moves, gate the
//! pass candidate, and install the child list.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use rand::Rng;

use tengen_core::symmetry::{sym_move, NUM_SYMMETRIES};
use tengen_core::{BoardView, Color, GameView, Move, BOARD_SIZE, NUM_INTERSECTIONS};
use tengen_net::{Ensemble, EvalError, Evaluator};

use crate::edge::Edge;
use crate::node::{LeafEval, SearchNode};

impl SearchNode {
    /// Expand this node: run the network, generate children, back up the
    /// fresh evaluation.
    ///
    /// Returns `Ok(None)` when the node is terminal, when another worker
    /// holds (or already finished) the expansion, or when nothing is left to
    /// expand at `min_psa_ratio`. A halted evaluator rewinds the expansion
    /// state and propagates [`EvalError::Halted`].
    pub fn create_children<G: GameView>(
        &self,
        node_count: &AtomicUsize,
        evaluator: &Evaluator,
        state: &G,
        min_psa_ratio: f32,
    ) -> Result<Option<LeafEval>, EvalError> {
        // No successors in a final position.
        if state.passes() >= 2 {
            return Ok(None);
        }

        if !self.acquire_expanding() {
            return Ok(None);
        }

        if !self.expandable(min_psa_ratio) {
            self.expand_done();
            return Ok(None);
        }

        let config = evaluator.config();
        let use_cache = config.eval.use_nncache;
        let raw = match evaluator.get_output(
            state,
            Ensemble::RandomSymmetry,
            use_cache,
            use_cache,
            false,
        ) {
            Ok(raw) => raw,
            Err(err) => {
                self.expand_cancel();
                return Err(err);
            }
        };

        // The network reports value for the side to move; the tree keeps
        // black's frame.
        let stm_eval = raw.value;
        let to_move = state.to_move();
        let value = if to_move == Color::Black {
            stm_eval
        } else {
            1.0 - stm_eval
        };

        let outcome = if raw.is_sai {
            LeafEval::from_eval(value, state.alpkt(raw.alpha), raw.beta, raw.beta2, true)
        } else {
            // For LZ networks α is the winrate logit, flipped to black.
            let alpkt = if to_move == Color::Black {
                raw.alpha
            } else {
                -raw.alpha
            };
            LeafEval::from_eval(value, alpkt, 1.0, 1.0, false)
        };
        self.set_net_values(value, outcome.alpkt, outcome.beta, outcome.beta2);

        // Symmetries under which the position maps to itself; equivalent
        // moves are folded onto one representative.
        let mut stabilizer = vec![0usize];
        if config.play.exploit_symmetries {
            for symmetry in 1..NUM_SYMMETRIES {
                if state.is_symmetry_invariant(symmetry) {
                    stabilizer.push(symmetry);
                }
            }
        }

        let mut nodelist: Vec<(f32, Move)> = Vec::new();
        let mut taken_already = [false; NUM_INTERSECTIONS];
        let mut rng = rand::thread_rng();
        let mut legal_sum = 0.0f32;

        for i in 0..NUM_INTERSECTIONS {
            let vertex = Move::Vertex(i as u16);
            if !state.board().is_legal(to_move, vertex) || taken_already[i] {
                continue;
            }

            let mut taken_policy = 0.0f32;
            let mut max_u = 0.0f32;
            let mut chosen_vertex = vertex;
            for &symmetry in &stabilizer {
                let j_vertex = sym_move(vertex, symmetry);
                let j = j_vertex.index();
                if taken_already[j] {
                    continue;
                }
                taken_already[j] = true;
                taken_policy += raw.policy[j];

                let u = if config.play.symm_nonrandom {
                    // Deterministic lexicographic representative for
                    // reproducible self-play.
                    let (x, y) = j_vertex.xy().unwrap_or((0, 0));
                    x as f32 + 2.001 * y as f32
                } else {
                    rng.gen::<f32>()
                };
                if u > max_u {
                    max_u = u;
                    chosen_vertex = j_vertex;
                }
            }

            let warm_policy = taken_policy.powf(1.0 / config.eval.policy_temp);
            nodelist.push((warm_policy, chosen_vertex));
            legal_sum += warm_policy;
        }

        // Pass gating: always with the dumb-pass flag or in a nearly full
        // board, otherwise only when clearly winning on the board count too.
        let mut allow_pass = config.play.dumbpass;
        if nodelist.len() <= 5.max(BOARD_SIZE) {
            allow_pass = true;
        }
        if !allow_pass && stm_eval > 0.8 {
            let relative_score = match to_move {
                Color::Black => state.final_score(),
                Color::White => -state.final_score(),
            };
            if relative_score >= 0.0 {
                allow_pass = true;
            }
        }
        if allow_pass {
            let warm_pass = raw.policy_pass.powf(1.0 / config.eval.policy_temp);
            nodelist.push((warm_pass, Move::Pass));
            legal_sum += warm_pass;
        }

        if legal_sum > f32::MIN_POSITIVE {
            for (policy, _) in &mut nodelist {
                *policy /= legal_sum;
            }
        } else {
            // Freshly randomized networks can emit degenerate policies.
            let uniform = 1.0 / nodelist.len() as f32;
            for (policy, _) in &mut nodelist {
                *policy = uniform;
            }
        }

        self.link_children(node_count, nodelist, min_psa_ratio);

        self.update(&outcome, false);
        if raw.is_sai {
            self.set_lambda_mu(state, config);
            self.update_all_quantiles(outcome.alpkt, outcome.beta, outcome.beta2);
        }

        self.expand_done();
        Ok(Some(outcome))
    }

    /// Install a prior list directly, bypassing the evaluator. The driver
    /// uses this to rebuild a root from externally supplied priors; tests
    /// use it to fabricate positions.
    pub fn install_children(
        &self,
        node_count: &AtomicUsize,
        nodelist: Vec<(f32, Move)>,
        min_psa_ratio: f32,
    ) -> bool {
        if !self.acquire_expanding() {
            return false;
        }
        self.link_children(node_count, nodelist, min_psa_ratio);
        self.expand_done();
        true
    }

    fn link_children(
        &self,
        node_count: &AtomicUsize,
        mut nodelist: Vec<(f32, Move)>,
        min_psa_ratio: f32,
    ) {
        debug_assert!(min_psa_ratio < self.min_psa_ratio_children.load());
        if nodelist.is_empty() {
            return;
        }

        // Best-prior first.
        nodelist.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let max_psa = nodelist[0].0;
        let old_min_psa = max_psa * self.min_psa_ratio_children.load();
        let new_min_psa = max_psa * min_psa_ratio;

        let mut children = self.children.write();
        if new_min_psa > 0.0 {
            let keep = nodelist.iter().filter(|(p, _)| *p >= new_min_psa).count();
            children.reserve(keep);
        } else {
            children.reserve(nodelist.len());
        }

        let mut skipped_children = false;
        for (policy, mv) in nodelist {
            if policy < new_min_psa {
                skipped_children = true;
            } else if policy < old_min_psa {
                children.push(Arc::new(Edge::new(mv, policy)));
                node_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
        drop(children);

        self.min_psa_ratio_children
            .store(if skipped_children { min_psa_ratio } else { 0.0 });
    }
}
