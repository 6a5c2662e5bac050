//! Child edges: an uninflated prior plus an at-most-once inflated node.

use std::sync::OnceLock;

use tengen_core::{Color, Move};

use crate::node::SearchNode;
use crate::sync::AtomicF32;

/// A parent's handle on one candidate move.
///
/// Before any visit an edge is just `(move, prior)`; the node is created at
/// most once, on first selection or descent, via [`Edge::inflate`]. Queries
/// on an uninflated edge answer as an unvisited node would.
pub struct Edge {
    mv: Move,
    policy: AtomicF32,
    node: OnceLock<SearchNode>,
}

impl Edge {
    pub fn new(mv: Move, policy: f32) -> Edge {
        Edge {
            mv,
            policy: AtomicF32::new(policy),
            node: OnceLock::new(),
        }
    }

    pub fn mv(&self) -> Move {
        self.mv
    }

    pub fn policy(&self) -> f32 {
        self.policy.load()
    }

    /// Overwrite the prior (root noise, endgame bonuses).
    pub fn set_policy(&self, policy: f32) {
        self.policy.store(policy);
    }

    pub fn is_inflated(&self) -> bool {
        self.node.get().is_some()
    }

    /// Create the node on first use; concurrent callers observe the same
    /// instance.
    pub fn inflate(&self) -> &SearchNode {
        self.node.get_or_init(|| SearchNode::new(self.mv))
    }

    pub fn node(&self) -> Option<&SearchNode> {
        self.node.get()
    }

    pub fn visits(&self) -> i32 {
        self.node.get().map_or(0, SearchNode::visits)
    }

    pub fn active(&self) -> bool {
        self.node.get().map_or(true, SearchNode::is_active)
    }

    pub fn valid(&self) -> bool {
        self.node.get().map_or(true, SearchNode::is_valid)
    }

    /// Black-frame eval flipped to `color`, virtual losses included.
    pub fn eval(&self, color: Color) -> f32 {
        self.node.get().map_or(0.0, |n| n.get_eval(color))
    }

    /// Eval without the virtual-loss adjustment.
    pub fn raw_eval(&self, color: Color) -> f32 {
        self.node.get().map_or(0.0, |n| n.get_raw_eval(color, 0))
    }

    pub fn eval_variance(&self, default_var: f32) -> f32 {
        self.node
            .get()
            .map_or(default_var, |n| n.get_eval_variance(default_var))
    }

    pub fn eval_lcb(&self, color: Color) -> f32 {
        self.node.get().map_or(-1e6, |n| n.get_eval_lcb(color))
    }

    pub fn virtual_loss(&self) {
        if let Some(node) = self.node.get() {
            node.virtual_loss();
        }
    }

    pub fn virtual_loss_undo(&self) {
        if let Some(node) = self.node.get() {
            node.virtual_loss_undo();
        }
    }
}
