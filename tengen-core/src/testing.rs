//! Deterministic in-memory game states for tests.
//!
//! The real rule engine lives outside this workspace; unit and integration
//! tests across the crates share these small scripted implementations of the
//! [`BoardView`] / [`GameView`] contract instead.

use crate::board::{Color, Move, BOARD_SIZE, NUM_INTERSECTIONS};
use crate::state::{BoardView, GameView};
use crate::symmetry::{apply_symmetry, NUM_SYMMETRIES};

/// A plain stone grid with real chain/liberty queries (flood fill).
#[derive(Clone)]
pub struct TestBoard {
    stones: [Option<Color>; NUM_INTERSECTIONS],
}

impl Default for TestBoard {
    fn default() -> Self {
        TestBoard::empty()
    }
}

impl TestBoard {
    pub fn empty() -> TestBoard {
        TestBoard {
            stones: [None; NUM_INTERSECTIONS],
        }
    }

    pub fn with_stones(stones: &[(usize, usize, Color)]) -> TestBoard {
        let mut board = TestBoard::empty();
        for &(x, y, color) in stones {
            board.place(x, y, color);
        }
        board
    }

    pub fn place(&mut self, x: usize, y: usize, color: Color) {
        self.stones[y * BOARD_SIZE + x] = Some(color);
    }

    /// Apply `symmetry` to the whole grid.
    pub fn transformed(&self, symmetry: usize) -> TestBoard {
        let mut out = TestBoard::empty();
        for v in 0..NUM_INTERSECTIONS {
            if let Some(color) = self.stones[v] {
                let (x, y) = apply_symmetry(v % BOARD_SIZE, v / BOARD_SIZE, symmetry);
                out.stones[y * BOARD_SIZE + x] = Some(color);
            }
        }
        out
    }

    fn neighbors(v: usize) -> impl Iterator<Item = usize> {
        let (x, y) = (v % BOARD_SIZE, v / BOARD_SIZE);
        [
            (x > 0).then(|| v - 1),
            (x + 1 < BOARD_SIZE).then(|| v + 1),
            (y > 0).then(|| v - BOARD_SIZE),
            (y + 1 < BOARD_SIZE).then(|| v + BOARD_SIZE),
        ]
        .into_iter()
        .flatten()
    }

    fn chain(&self, v: usize) -> Vec<usize> {
        let Some(color) = self.stones[v] else {
            return Vec::new();
        };
        let mut seen = vec![false; NUM_INTERSECTIONS];
        let mut stack = vec![v];
        let mut chain = Vec::new();
        seen[v] = true;
        while let Some(w) = stack.pop() {
            chain.push(w);
            for n in Self::neighbors(w) {
                if !seen[n] && self.stones[n] == Some(color) {
                    seen[n] = true;
                    stack.push(n);
                }
            }
        }
        chain
    }

    fn liberties_of_chain(&self, chain: &[usize]) -> u32 {
        let mut liberty = vec![false; NUM_INTERSECTIONS];
        for &w in chain {
            for n in Self::neighbors(w) {
                if self.stones[n].is_none() {
                    liberty[n] = true;
                }
            }
        }
        liberty.iter().filter(|&&l| l).count() as u32
    }

    fn stone_diff(&self) -> f32 {
        let mut diff = 0.0;
        for stone in &self.stones {
            match stone {
                Some(Color::Black) => diff += 1.0,
                Some(Color::White) => diff -= 1.0,
                None => {}
            }
        }
        diff
    }
}

impl BoardView for TestBoard {
    fn stone_at(&self, x: usize, y: usize) -> Option<Color> {
        self.stones[y * BOARD_SIZE + x]
    }

    fn is_legal(&self, _color: Color, mv: Move) -> bool {
        match mv {
            Move::Pass => true,
            Move::Vertex(v) => self.stones[v as usize].is_none(),
        }
    }

    fn liberties_to_capture(&self, mv: Move) -> u32 {
        // Minimum liberty count among adjacent opponent-colored chains,
        // which is what an atari probe wants; 0 when nothing is adjacent.
        let Move::Vertex(v) = mv else { return 0 };
        let mut min_libs = 0u32;
        for n in Self::neighbors(v as usize) {
            if self.stones[n].is_some() {
                let libs = self.liberties_of_chain(&self.chain(n));
                if min_libs == 0 || libs < min_libs {
                    min_libs = libs;
                }
            }
        }
        min_libs
    }

    fn chain_liberties(&self, x: usize, y: usize) -> u32 {
        let chain = self.chain(y * BOARD_SIZE + x);
        self.liberties_of_chain(&chain)
    }

    fn chain_stones(&self, x: usize, y: usize) -> u32 {
        self.chain(y * BOARD_SIZE + x).len() as u32
    }
}

/// A scripted game: a history of boards plus fixed metadata.
#[derive(Clone)]
pub struct TestGame {
    /// `history[0]` is the current position, `history[h]` is `h` half-moves
    /// back.
    pub history: Vec<TestBoard>,
    pub to_move: Color,
    pub movenum: u32,
    pub passes: u32,
    pub komi: f32,
    pub engine_color_to_move: bool,
    /// Overrides the stone-difference score when set.
    pub score: Option<f32>,
}

impl TestGame {
    pub fn empty(to_move: Color) -> TestGame {
        TestGame::from_board(TestBoard::empty(), to_move)
    }

    pub fn from_board(board: TestBoard, to_move: Color) -> TestGame {
        TestGame {
            history: vec![board],
            to_move,
            movenum: 0,
            passes: 0,
            komi: 0.0,
            engine_color_to_move: true,
            score: None,
        }
    }

    /// The same game with every board in the history transformed.
    pub fn transformed(&self, symmetry: usize) -> TestGame {
        let mut out = self.clone();
        out.history = self
            .history
            .iter()
            .map(|board| board.transformed(symmetry))
            .collect();
        out
    }

    fn board_hash(board: &TestBoard, to_move: Color) -> u64 {
        // FNV-1a over the stone grid; cheap and deterministic.
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        let mut mix = |byte: u64| {
            h ^= byte;
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
        };
        for y in 0..BOARD_SIZE {
            for x in 0..BOARD_SIZE {
                mix(match board.stone_at(x, y) {
                    None => 0,
                    Some(Color::Black) => 1,
                    Some(Color::White) => 2,
                });
            }
        }
        mix(if to_move.is_black() { 3 } else { 4 });
        h
    }
}

impl GameView for TestGame {
    type Board = TestBoard;

    fn to_move(&self) -> Color {
        self.to_move
    }

    fn movenum(&self) -> u32 {
        self.movenum
    }

    fn passes(&self) -> u32 {
        self.passes
    }

    fn komi_adj(&self) -> f32 {
        self.komi
    }

    fn board(&self) -> &TestBoard {
        &self.history[0]
    }

    fn past_board(&self, half_moves_back: usize) -> Option<&TestBoard> {
        self.history.get(half_moves_back)
    }

    fn final_score(&self) -> f32 {
        self.score.unwrap_or_else(|| self.board().stone_diff())
    }

    fn is_symmetry_invariant(&self, symmetry: usize) -> bool {
        debug_assert!(symmetry < NUM_SYMMETRIES);
        let mapped = self.board().transformed(symmetry);
        (0..BOARD_SIZE).all(|y| {
            (0..BOARD_SIZE).all(|x| mapped.stone_at(x, y) == self.board().stone_at(x, y))
        })
    }

    fn hash(&self) -> u64 {
        Self::board_hash(self.board(), self.to_move)
    }

    fn symmetry_hash(&self, symmetry: usize) -> u64 {
        Self::board_hash(&self.board().transformed(symmetry), self.to_move)
    }

    fn is_engine_color(&self) -> bool {
        self.engine_color_to_move
    }
}
