//! End-to-end evaluator tests over a zero-plane backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tengen_net::testkit::{double_y_net, single_net, SingleNetSpec};
use tengen_core::symmetry::symmetry_tables;
use tengen_core::testing::{TestBoard, TestGame};
use tengen_core::{Color, Config, GameView, Precision, NUM_INTERSECTIONS};
use tengen_net::{
    BackendFactory, Ensemble, EvalError, Evaluator, ForwardBackend, ZeroBackend,
};

fn write_net(text: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weights.txt");
    std::fs::write(&path, text).unwrap();
    (dir, path)
}

fn zero_factory() -> impl Fn(Precision) -> Result<Box<dyn ForwardBackend>, EvalError> {
    |_| Ok(Box::new(ZeroBackend::new()))
}

fn make_evaluator(text: &str, config: Config) -> (tempfile::TempDir, Evaluator) {
    let (dir, path) = write_net(text);
    let factory = zero_factory();
    let evaluator = Evaluator::initialize(Arc::new(config), 100, &path, &factory, None)
        .expect("evaluator init");
    (dir, evaluator)
}

#[test]
fn single_net_empty_board_black_no_komi() {
    let (_dir, evaluator) = make_evaluator(&single_net(&SingleNetSpec::default()), Config::default());
    let game = TestGame::empty(Color::Black);

    let result = evaluator
        .get_output(&game, Ensemble::Direct(0), false, false, false)
        .expect("eval");

    assert!(result.policy_pass < 0.01);
    assert_eq!(result.value, 0.5);
    assert!(!result.is_sai);

    let total: f32 = result.policy.iter().sum::<f32>() + result.policy_pass;
    assert!((total - 1.0).abs() < 1e-5);
    assert!(result.policy.iter().all(|&p| p >= 0.0));
}

#[test]
fn random_symmetry_matches_distribution_invariants() {
    let (_dir, evaluator) = make_evaluator(&single_net(&SingleNetSpec::default()), Config::default());
    let game = TestGame::empty(Color::White);

    for _ in 0..16 {
        let result = evaluator
            .get_output(&game, Ensemble::RandomSymmetry, false, false, false)
            .expect("eval");
        let total: f32 = result.policy.iter().sum::<f32>() + result.policy_pass;
        assert!((total - 1.0).abs() < 1e-5);
    }
}

#[test]
fn average_ensemble_stays_normalized() {
    let spec = SingleNetSpec {
        patterned_policy: true,
        ..SingleNetSpec::default()
    };
    let (_dir, evaluator) = make_evaluator(&single_net(&spec), Config::default());
    let game = TestGame::empty(Color::Black);

    let result = evaluator
        .get_output(&game, Ensemble::Average, true, false, false)
        .expect("eval");
    let total: f32 = result.policy.iter().sum::<f32>() + result.policy_pass;
    assert!((total - 1.0).abs() < 1e-4);
    assert_eq!(result.value, 0.5);
}

#[test]
fn elf_network_flips_value_for_white() {
    let spec = SingleNetSpec {
        version: 2,
        alpha_bias: 0.3,
        ..SingleNetSpec::default()
    };
    let (_dir, evaluator) = make_evaluator(&single_net(&spec), Config::default());

    // α = 2 · 0.3; value in black's frame is σ(0.6).
    let expected_black = 1.0 / (1.0 + (-0.6f64).exp());

    let black = evaluator
        .get_output(&TestGame::empty(Color::Black), Ensemble::Direct(0), false, false, false)
        .unwrap();
    assert!((f64::from(black.value) - expected_black).abs() < 1e-6);

    let white = evaluator
        .get_output(&TestGame::empty(Color::White), Ensemble::Direct(0), false, false, false)
        .unwrap();
    assert!((f64::from(white.value) - (1.0 - expected_black)).abs() < 1e-6);
}

#[test]
fn sai_heads_produce_alpha_beta() {
    let (_dir, evaluator) = make_evaluator(&double_y_net(17, 2), Config::default());
    let game = TestGame::empty(Color::Black);

    let result = evaluator
        .get_output(&game, Ensemble::Direct(0), false, false, false)
        .expect("eval");

    assert!(result.is_sai);
    // α head: relu([0.3, 0]) · [1, 0] + 0.5
    assert!((result.alpha - 0.8).abs() < 1e-6);
    // β head: exp(0.2 + 0.1) · 10 / 361, β₂: exp(0 − 0.2) · 10 / 361
    let beta = (0.3f32).exp() * 10.0 / NUM_INTERSECTIONS as f32;
    let beta2 = (-0.2f32).exp() * 10.0 / NUM_INTERSECTIONS as f32;
    assert!((result.beta - beta).abs() < 1e-6);
    assert!((result.beta2 - beta2).abs() < 1e-6);
    // winning side of the axis uses β₂
    assert!(result.value > 0.5 && result.value < 0.52);
}

#[test]
fn quartile_encoding_decodes_spread() {
    let (_dir, evaluator) = make_evaluator(&double_y_net(273, 1), Config::default());
    let game = TestGame::empty(Color::Black);

    let result = evaluator
        .get_output(&game, Ensemble::Direct(0), false, false, false)
        .expect("eval");

    // q1 = 0.8, q2 = 0.3: α is their midpoint, β blows up on the inverted
    // spread (max(0, q2 − q1) = 0).
    assert!((result.alpha - 0.55).abs() < 1e-6);
    let expect_beta = 2.0 * 3.0f32.ln() / 0.05;
    assert!((result.beta - expect_beta).abs() < 1e-3);
    assert!(result.value > 0.99);
}

#[test]
fn cache_hit_returns_same_result() {
    let spec = SingleNetSpec {
        patterned_policy: true,
        ..SingleNetSpec::default()
    };
    let (_dir, evaluator) = make_evaluator(&single_net(&spec), Config::default());
    let game = TestGame::from_board(
        TestBoard::with_stones(&[(1, 2, Color::Black)]),
        Color::Black,
    );

    let fresh = evaluator
        .get_output(&game, Ensemble::Direct(0), true, true, false)
        .expect("eval");
    let cached = evaluator
        .get_output(&game, Ensemble::Direct(0), true, true, false)
        .expect("cached");

    assert_eq!(fresh.policy, cached.policy);
    assert_eq!(fresh.value, cached.value);
}

#[test]
fn cache_promotes_symmetric_positions_in_the_opening() {
    let spec = SingleNetSpec {
        patterned_policy: true,
        ..SingleNetSpec::default()
    };
    let (_dir, evaluator) = make_evaluator(&single_net(&spec), Config::default());

    let original = TestGame::from_board(
        TestBoard::with_stones(&[(1, 2, Color::Black)]),
        Color::Black,
    );
    let seeded = evaluator
        .get_output(&original, Ensemble::Direct(0), true, true, false)
        .expect("seed");

    // Same position mirrored in x; movenum 0 is inside the opening window.
    let rotated = original.transformed(2);
    assert_ne!(original.hash(), rotated.hash());

    let promoted = evaluator
        .get_output(&rotated, Ensemble::Direct(0), true, false, false)
        .expect("promoted");

    let tables = symmetry_tables();
    for idx in 0..NUM_INTERSECTIONS {
        assert_eq!(promoted.policy[idx], seeded.policy[tables.map(2, idx)]);
    }
    assert_eq!(promoted.policy_pass, seeded.policy_pass);
}

#[test]
fn cache_symmetry_probe_is_disabled_for_noisy_play() {
    let spec = SingleNetSpec {
        patterned_policy: true,
        ..SingleNetSpec::default()
    };
    let mut config = Config::default();
    config.play.noise = true;
    let (_dir, evaluator) = make_evaluator(&single_net(&spec), config);

    let original = TestGame::from_board(
        TestBoard::with_stones(&[(1, 2, Color::Black)]),
        Color::Black,
    );
    let seeded = evaluator
        .get_output(&original, Ensemble::Direct(0), true, true, false)
        .expect("seed");

    let rotated = original.transformed(2);
    let fresh = evaluator
        .get_output(&rotated, Ensemble::Direct(0), true, false, false)
        .expect("fresh");

    // No promotion: the rotated position is evaluated from scratch, and the
    // zero-backend policy is identical in the network frame.
    let tables = symmetry_tables();
    let rotated_matches_promotion = (0..NUM_INTERSECTIONS)
        .all(|idx| fresh.policy[idx] == seeded.policy[tables.map(2, idx)]);
    assert!(!rotated_matches_promotion);
}

#[test]
fn drain_halts_and_resume_recovers() {
    let (_dir, evaluator) = make_evaluator(&single_net(&SingleNetSpec::default()), Config::default());
    let game = TestGame::empty(Color::Black);

    evaluator.drain_evals();
    let err = evaluator
        .get_output(&game, Ensemble::RandomSymmetry, false, false, false)
        .expect_err("halted");
    assert!(matches!(err, EvalError::Halted));

    evaluator.resume_evals();
    assert!(evaluator
        .get_output(&game, Ensemble::RandomSymmetry, false, false, false)
        .is_ok());
}

#[test]
fn auto_precision_falls_back_to_single() {
    let half_attempts = AtomicUsize::new(0);
    let factory = |precision: Precision| -> Result<Box<dyn ForwardBackend>, EvalError> {
        match precision {
            Precision::Half => {
                half_attempts.fetch_add(1, Ordering::Relaxed);
                Err(EvalError::Backend("half unsupported".to_string()))
            }
            _ => Ok(Box::new(ZeroBackend::new())),
        }
    };

    let (_dir, path) = write_net(&single_net(&SingleNetSpec::default()));
    let evaluator = Evaluator::initialize(
        Arc::new(Config::default()),
        100,
        &path,
        &factory as &BackendFactory<'_>,
        None,
    )
    .expect("fallback to single");

    assert_eq!(half_attempts.load(Ordering::Relaxed), 1);
    let game = TestGame::empty(Color::Black);
    assert!(evaluator
        .get_output(&game, Ensemble::Direct(0), false, false, false)
        .is_ok());
}

#[test]
fn both_precisions_failing_is_fatal() {
    let factory = |_: Precision| -> Result<Box<dyn ForwardBackend>, EvalError> {
        Err(EvalError::Backend("no device".to_string()))
    };
    let (_dir, path) = write_net(&single_net(&SingleNetSpec::default()));
    let result = Evaluator::initialize(
        Arc::new(Config::default()),
        100,
        &path,
        &factory as &BackendFactory<'_>,
        None,
    );
    assert!(result.is_err());
}

#[test]
fn self_check_passes_with_identical_backends() {
    let (_dir, path) = write_net(&single_net(&SingleNetSpec::default()));
    let factory = zero_factory();
    let evaluator = Evaluator::initialize(
        Arc::new(Config::default()),
        100,
        &path,
        &factory,
        Some(Box::new(ZeroBackend::new())),
    )
    .expect("init");

    let game = TestGame::empty(Color::Black);
    // Forced self-check: both backends produce the same planes.
    assert!(evaluator
        .get_output(&game, Ensemble::RandomSymmetry, false, false, true)
        .is_ok());
}

#[test]
fn benchmark_iters_reports_throughput() {
    let mut config = Config::default();
    config.eval.num_threads = 2;
    let (_dir, evaluator) = make_evaluator(&single_net(&SingleNetSpec::default()), config);
    let game = TestGame::empty(Color::Black);

    let report = evaluator.benchmark_iters(&game, 64).expect("benchmark");
    assert!(report.evaluations >= 64);
    assert!(report.evals_per_second > 0.0);
}

#[test]
fn heatmap_renders_value_block() {
    let (_dir, evaluator) = make_evaluator(&double_y_net(17, 2), Config::default());
    let game = TestGame::empty(Color::Black);
    let result = evaluator
        .get_output(&game, Ensemble::Direct(0), false, false, false)
        .unwrap();

    let agent = tengen_net::AgentEval {
        lambda: 0.5,
        mu: 0.0,
        quantile_lambda: 1.0,
        quantile_mu: -1.0,
        alpkt_tree: 0.4,
    };
    let text = tengen_net::render_heatmap(&game, &result, true, &agent);
    assert!(text.contains("alpha:"));
    assert!(text.contains("interval: [-1.0, 1.0]"));
    assert!(text.contains("pass:"));
}
