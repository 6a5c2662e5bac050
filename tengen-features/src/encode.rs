//! Feature encoding: game state → network input planes, under a symmetry.

use tengen_core::symmetry::{symmetry_tables, NUM_SYMMETRIES};
use tengen_core::{BoardView, Color, GameView, Move, BOARD_SIZE, NUM_INTERSECTIONS};

use crate::schema::{EncodingSpec, CHAIN_LIBERTIES_PLANES, CHAIN_SIZE_PLANES};

/// Encode `state` into the input-plane vector described by `spec`, with
/// every plane written under `symmetry`.
pub fn gather_features<G: GameView>(state: &G, symmetry: usize, spec: &EncodingSpec) -> Vec<f32> {
    assert!(symmetry < NUM_SYMMETRIES);

    let plane_block = spec.input_moves * NUM_INTERSECTIONS;
    let moves_planes = spec.input_moves * spec.planes_per_move();
    let mut data = vec![0.0f32; spec.input_len()];

    // Region offsets; each history feature occupies `input_moves` planes
    // (chain features occupy four per past state).
    let current_off = 0;
    let opponent_off = plane_block;
    let mut off = 2 * plane_block;
    let legal_off = off;
    if spec.adv_features {
        off += 2 * plane_block;
    }
    let atari_off = legal_off + plane_block;
    let chainlibs_off = off;
    if spec.chainlibs_features {
        off += CHAIN_LIBERTIES_PLANES * plane_block;
    }
    let chainsize_off = off;
    debug_assert_eq!(
        off + if spec.chainsize_features {
            CHAIN_SIZE_PLANES * plane_block
        } else {
            0
        },
        moves_planes * NUM_INTERSECTIONS
    );

    let to_move = state.to_move();
    let blacks_move = to_move.is_black();
    let (black_off, white_off) = if blacks_move {
        (current_off, opponent_off)
    } else {
        (opponent_off, current_off)
    };

    // The single ones plane: border marker, and side-to-move flag when the
    // color planes are present.
    let ones_off = if blacks_move || !spec.include_color {
        moves_planes * NUM_INTERSECTIONS
    } else {
        (moves_planes + 1) * NUM_INTERSECTIONS
    };
    data[ones_off..ones_off + NUM_INTERSECTIONS].fill(1.0);

    let moves = (state.movenum() as usize + 1).min(spec.input_moves);
    for h in 0..moves {
        let Some(board) = state.past_board(h) else {
            break;
        };
        fill_plane_pair(
            board,
            &mut data,
            black_off + h * NUM_INTERSECTIONS,
            white_off + h * NUM_INTERSECTIONS,
            symmetry,
        );
        if spec.adv_features {
            fill_plane_advfeat(
                board,
                to_move,
                &mut data,
                legal_off + h * NUM_INTERSECTIONS,
                atari_off + h * NUM_INTERSECTIONS,
                symmetry,
            );
        }
        if spec.chainlibs_features {
            fill_plane_chainlibs(
                board,
                &mut data,
                chainlibs_off + h * CHAIN_LIBERTIES_PLANES * NUM_INTERSECTIONS,
                symmetry,
            );
        }
        if spec.chainsize_features {
            fill_plane_chainsize(
                board,
                &mut data,
                chainsize_off + h * CHAIN_SIZE_PLANES * NUM_INTERSECTIONS,
                symmetry,
            );
        }
    }

    data
}

fn fill_plane_pair<B: BoardView>(
    board: &B,
    data: &mut [f32],
    black_off: usize,
    white_off: usize,
    symmetry: usize,
) {
    let tables = symmetry_tables();
    for idx in 0..NUM_INTERSECTIONS {
        let sym_idx = tables.map(symmetry, idx);
        let (x, y) = (sym_idx % BOARD_SIZE, sym_idx / BOARD_SIZE);
        match board.stone_at(x, y) {
            Some(Color::Black) => data[black_off + idx] = 1.0,
            Some(Color::White) => data[white_off + idx] = 1.0,
            None => {}
        }
    }
}

fn fill_plane_advfeat<B: BoardView>(
    board: &B,
    to_move: Color,
    data: &mut [f32],
    legal_off: usize,
    atari_off: usize,
    symmetry: usize,
) {
    let tables = symmetry_tables();
    for idx in 0..NUM_INTERSECTIONS {
        let sym_idx = tables.map(symmetry, idx);
        let mv = Move::Vertex(sym_idx as u16);
        let is_legal = board.is_legal(to_move, mv);
        data[legal_off + idx] = if is_legal { 0.0 } else { 1.0 };
        data[atari_off + idx] = if is_legal && board.liberties_to_capture(mv) == 1 {
            1.0
        } else {
            0.0
        };
    }
}

fn fill_plane_chainlibs<B: BoardView>(
    board: &B,
    data: &mut [f32],
    base_off: usize,
    symmetry: usize,
) {
    let tables = symmetry_tables();
    for idx in 0..NUM_INTERSECTIONS {
        let sym_idx = tables.map(symmetry, idx);
        let (x, y) = (sym_idx % BOARD_SIZE, sym_idx / BOARD_SIZE);
        if board.stone_at(x, y).is_none() {
            continue;
        }
        let libs = board.chain_liberties(x, y);
        for plane in 0..CHAIN_LIBERTIES_PLANES {
            if libs <= plane as u32 + 1 {
                data[base_off + plane * NUM_INTERSECTIONS + idx] = 1.0;
            }
        }
    }
}

fn fill_plane_chainsize<B: BoardView>(
    board: &B,
    data: &mut [f32],
    base_off: usize,
    symmetry: usize,
) {
    let tables = symmetry_tables();
    for idx in 0..NUM_INTERSECTIONS {
        let sym_idx = tables.map(symmetry, idx);
        let (x, y) = (sym_idx % BOARD_SIZE, sym_idx / BOARD_SIZE);
        if board.stone_at(x, y).is_none() {
            continue;
        }
        let stones = board.chain_stones(x, y);
        for plane in 0..CHAIN_SIZE_PLANES {
            if stones >= 2 * plane as u32 + 2 {
                data[base_off + plane * NUM_INTERSECTIONS + idx] = 1.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tengen_core::symmetry::IDENTITY_SYMMETRY;
    use tengen_core::testing::{TestBoard, TestGame};

    fn spec_all() -> EncodingSpec {
        EncodingSpec {
            input_moves: 2,
            adv_features: true,
            chainlibs_features: true,
            chainsize_features: true,
            include_color: true,
        }
    }

    #[test]
    fn stone_planes_follow_side_to_move() {
        let board = TestBoard::with_stones(&[(3, 3, Color::Black), (15, 15, Color::White)]);
        let spec = EncodingSpec {
            input_moves: 1,
            ..EncodingSpec::default()
        };

        let black_to_move = TestGame::from_board(board.clone(), Color::Black);
        let data = gather_features(&black_to_move, IDENTITY_SYMMETRY, &spec);
        let black_idx = 3 * BOARD_SIZE + 3;
        let white_idx = 15 * BOARD_SIZE + 15;
        assert_eq!(data[black_idx], 1.0); // current-player plane
        assert_eq!(data[NUM_INTERSECTIONS + white_idx], 1.0); // opponent plane

        let white_to_move = TestGame::from_board(board, Color::White);
        let data = gather_features(&white_to_move, IDENTITY_SYMMETRY, &spec);
        assert_eq!(data[white_idx], 1.0);
        assert_eq!(data[NUM_INTERSECTIONS + black_idx], 1.0);
    }

    #[test]
    fn ones_plane_position_encodes_color() {
        let spec = EncodingSpec {
            input_moves: 1,
            ..EncodingSpec::default()
        };
        let moves_planes = spec.input_moves * spec.planes_per_move();

        let black = TestGame::empty(Color::Black);
        let data = gather_features(&black, IDENTITY_SYMMETRY, &spec);
        let first = moves_planes * NUM_INTERSECTIONS;
        let second = (moves_planes + 1) * NUM_INTERSECTIONS;
        assert!(data[first..first + NUM_INTERSECTIONS].iter().all(|&v| v == 1.0));
        assert!(data[second..second + NUM_INTERSECTIONS].iter().all(|&v| v == 0.0));

        let white = TestGame::empty(Color::White);
        let data = gather_features(&white, IDENTITY_SYMMETRY, &spec);
        assert!(data[first..first + NUM_INTERSECTIONS].iter().all(|&v| v == 0.0));
        assert!(data[second..second + NUM_INTERSECTIONS].iter().all(|&v| v == 1.0));
    }

    #[test]
    fn border_plane_without_color_planes() {
        let spec = EncodingSpec {
            input_moves: 1,
            include_color: false,
            ..EncodingSpec::default()
        };
        let game = TestGame::empty(Color::White);
        let data = gather_features(&game, IDENTITY_SYMMETRY, &spec);
        let ones = spec.input_moves * spec.planes_per_move() * NUM_INTERSECTIONS;
        assert_eq!(data.len(), (spec.input_moves * 2 + 1) * NUM_INTERSECTIONS);
        assert!(data[ones..ones + NUM_INTERSECTIONS].iter().all(|&v| v == 1.0));
    }

    #[test]
    fn chain_planes_are_thresholded() {
        // A two-stone black chain: >= 2 stones sets plane 0 only; its
        // 6 liberties set no liberty plane. A lone white stone in the corner
        // has 2 liberties: liberty planes 1..=3 are set.
        let board = TestBoard::with_stones(&[
            (5, 5, Color::Black),
            (5, 6, Color::Black),
            (0, 0, Color::White),
        ]);
        let game = TestGame::from_board(board, Color::Black);
        let spec = EncodingSpec {
            input_moves: 1,
            adv_features: false,
            chainlibs_features: true,
            chainsize_features: true,
            include_color: true,
        };
        let data = gather_features(&game, IDENTITY_SYMMETRY, &spec);

        let chainlibs_off = 2 * NUM_INTERSECTIONS;
        let chainsize_off = chainlibs_off + CHAIN_LIBERTIES_PLANES * NUM_INTERSECTIONS;
        let black_idx = 5 * BOARD_SIZE + 5;
        let corner_idx = 0;

        for plane in 0..CHAIN_LIBERTIES_PLANES {
            let v = data[chainlibs_off + plane * NUM_INTERSECTIONS + black_idx];
            assert_eq!(v, 0.0, "six liberties exceed every threshold");
            let c = data[chainlibs_off + plane * NUM_INTERSECTIONS + corner_idx];
            assert_eq!(c, if plane >= 1 { 1.0 } else { 0.0 });
        }
        for plane in 0..CHAIN_SIZE_PLANES {
            let v = data[chainsize_off + plane * NUM_INTERSECTIONS + black_idx];
            assert_eq!(v, if plane == 0 { 1.0 } else { 0.0 });
            assert_eq!(data[chainsize_off + plane * NUM_INTERSECTIONS + corner_idx], 0.0);
        }
    }

    #[test]
    fn adv_planes_mark_occupied_as_illegal() {
        let board = TestBoard::with_stones(&[(9, 9, Color::Black)]);
        let game = TestGame::from_board(board, Color::White);
        let spec = EncodingSpec {
            input_moves: 1,
            adv_features: true,
            ..EncodingSpec::default()
        };
        let data = gather_features(&game, IDENTITY_SYMMETRY, &spec);
        let legal_off = 2 * NUM_INTERSECTIONS;
        let occupied = 9 * BOARD_SIZE + 9;
        assert_eq!(data[legal_off + occupied], 1.0);
        assert_eq!(data[legal_off + occupied + 1], 0.0);
    }

    #[test]
    fn encoding_under_symmetry_reads_back_through_inverse() {
        let board = TestBoard::with_stones(&[
            (1, 2, Color::Black),
            (16, 3, Color::White),
            (4, 4, Color::Black),
        ]);
        let game = TestGame::from_board(board, Color::Black);
        let spec = spec_all();
        let identity = gather_features(&game, IDENTITY_SYMMETRY, &spec);

        let tables = symmetry_tables();
        for s in 0..NUM_SYMMETRIES {
            let rotated = gather_features(&game, s, &spec);
            for plane in 0..spec.input_planes() {
                let off = plane * NUM_INTERSECTIONS;
                for v in 0..NUM_INTERSECTIONS {
                    assert_eq!(
                        identity[off + tables.map(s, v)],
                        rotated[off + v],
                        "plane {plane} symmetry {s} vertex {v}"
                    );
                }
            }
        }
    }

    #[test]
    fn history_planes_blank_before_game_start() {
        // Movenum 0: only the current position is encoded even though the
        // schema reserves eight history slots.
        let game = TestGame::from_board(
            TestBoard::with_stones(&[(9, 9, Color::Black)]),
            Color::White,
        );
        let data = gather_features(&game, IDENTITY_SYMMETRY, &EncodingSpec::default());
        // current-player (white) planes: all blank
        for h in 0..crate::schema::DEFAULT_INPUT_MOVES {
            let off = h * NUM_INTERSECTIONS;
            assert!(data[off..off + NUM_INTERSECTIONS].iter().all(|&v| v == 0.0));
        }
        // opponent plane 0 has the stone, planes 1.. are blank
        let opp = crate::schema::DEFAULT_INPUT_MOVES * NUM_INTERSECTIONS;
        assert_eq!(data[opp + 9 * BOARD_SIZE + 9], 1.0);
        for h in 1..crate::schema::DEFAULT_INPUT_MOVES {
            let off = opp + h * NUM_INTERSECTIONS;
            assert!(data[off..off + NUM_INTERSECTIONS].iter().all(|&v| v == 0.0));
        }
    }
}
