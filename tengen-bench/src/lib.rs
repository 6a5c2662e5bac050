//! tengen-bench: shared fixtures for the criterion micro-benchmarks.

use std::sync::atomic::AtomicUsize;

use tengen_core::{Color, Move, BOARD_SIZE, NUM_INTERSECTIONS};
use tengen_mcts::{LeafEval, SearchNode};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A root with a full board of children and representative visit stats.
pub fn populated_root() -> SearchNode {
    let root = SearchNode::new_root();
    let count = AtomicUsize::new(0);

    let mut priors: Vec<(f32, Move)> = (0..NUM_INTERSECTIONS)
        .map(|i| (1.0 + (i % 17) as f32, Move::Vertex(i as u16)))
        .collect();
    let sum: f32 = priors.iter().map(|(p, _)| p).sum();
    for (p, _) in &mut priors {
        *p /= sum;
    }
    assert!(root.install_children(&count, priors, 0.0));

    // Visit a spread of children with varying evals.
    for i in (0..NUM_INTERSECTIONS).step_by(3) {
        let edge = root.select_child(Move::Vertex(i as u16)).unwrap();
        let node = edge.inflate();
        let eval = 0.3 + (i % 5) as f32 * 0.1;
        for _ in 0..(i % 11) {
            node.update(&LeafEval::from_eval(eval, 0.0, 1.0, 1.0, false), false);
            root.update(&LeafEval::from_eval(eval, 0.0, 1.0, 1.0, false), false);
        }
    }
    root
}

/// A mid-game position with a few dozen stones.
pub fn midgame_state() -> tengen_core::testing::TestGame {
    use tengen_core::testing::{TestBoard, TestGame};

    let mut board = TestBoard::empty();
    for i in 0..48usize {
        let x = (i * 7 + 3) % BOARD_SIZE;
        let y = (i * 11 + 5) % 17;
        let color = if i % 2 == 0 { Color::Black } else { Color::White };
        board.place(x, y, color);
    }
    let mut game = TestGame::from_board(board, Color::Black);
    game.movenum = 48;
    game
}
