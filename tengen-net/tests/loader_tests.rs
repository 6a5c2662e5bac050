//! Loader state-machine and transform tests against synthetic weight files.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;

use tengen_net::testkit::{double_y_net, single_net, wrong_board_net, SingleNetSpec};
use tengen_core::{NUM_INTERSECTIONS, POTENTIAL_MOVES};
use tengen_net::loader::{load_network, load_network_file, WeightsError};
use tengen_net::weights::{apply_load_transforms, ValueHeadKind};
use tengen_net::winograd::WINOGRAD_TILE;

fn load_str(text: &str) -> Result<tengen_net::LoadedNetwork, WeightsError> {
    load_network(std::io::Cursor::new(text.as_bytes()))
}

#[test]
fn single_network_classifies() {
    let net = load_str(&single_net(&SingleNetSpec::default())).expect("load");
    let p = &net.params;

    assert_eq!(p.channels, 2);
    assert_eq!(p.residual_blocks, 1);
    assert_eq!(p.input_planes, 18);
    assert_eq!(p.input_moves, 8);
    assert!(p.include_color);
    assert_eq!(p.policy_conv_layers, 1);
    assert_eq!(p.policy_outputs, 1);
    assert_eq!(p.val_outputs, 1);
    assert_eq!(p.val_pool_outputs, 0);
    assert_eq!(p.val_chans, 2);
    assert_eq!(p.value_head_kind, ValueHeadKind::Single);
    assert!(!p.is_sai());
    assert!(!p.value_black_frame);

    // The derived identity between planes, moves, and flags holds exactly.
    let per_move = 2;
    assert_eq!(
        p.input_planes,
        p.input_moves * per_move + if p.include_color { 2 } else { 1 }
    );

    assert_eq!(net.heads.ip_pol_b.len(), POTENTIAL_MOVES);
    assert_eq!(net.weights.conv_weights.len(), 3);
}

#[test]
fn double_y_network_classifies_and_pads() {
    let net = load_str(&double_y_net(17, 2)).expect("load");
    let p = &net.params;

    assert_eq!(p.channels, 2);
    assert!(p.adv_features);
    assert_eq!(p.input_planes, 6);
    assert_eq!(p.input_moves, 1);
    assert!(p.include_color);
    assert_eq!(p.value_head_kind, ValueHeadKind::DoubleY);
    assert!(p.is_sai());
    assert_eq!(p.val_pool_outputs, 3);
    assert_eq!(p.val_chans, 2);
    assert_eq!(p.vbe_chans, 3);
    assert_eq!(p.val_head_rets, 1);
    assert_eq!(p.vbe_head_rets, 2);
    assert_eq!(p.value_head_rets, 3);

    // Zero padding grew the value conv to 8 filters and reshuffled the
    // pooling matrix so surviving columns kept their meaning.
    assert_eq!(p.val_outputs, 8);
    assert_eq!(net.weights.conv_val_w.len(), 2 * 8);
    assert_eq!(net.weights.conv_val_pool_w.len(), 3 * 8);
    assert_eq!(&net.weights.conv_val_pool_w[0..2], &[1.0, 2.0]);
    assert!(net.weights.conv_val_pool_w[2..8].iter().all(|&v| v == 0.0));
    assert_eq!(&net.weights.conv_val_pool_w[8..10], &[3.0, 4.0]);
    assert_eq!(&net.weights.conv_val_pool_w[16..18], &[5.0, 6.0]);
}

#[test]
fn elf_version_flags_black_frame() {
    let spec = SingleNetSpec {
        version: 2,
        ..SingleNetSpec::default()
    };
    let net = load_str(&single_net(&spec)).expect("load");
    assert!(net.params.value_black_frame);
}

#[test]
fn unknown_version_bits_are_fatal() {
    for version in [0, 3, 4, 513, 1025] {
        let spec = SingleNetSpec {
            version,
            ..SingleNetSpec::default()
        };
        let err = load_str(&single_net(&spec)).expect_err("must fail");
        assert!(matches!(err, WeightsError::WrongVersion { .. }), "{version}");
    }
}

#[test]
fn wrong_board_size_is_fatal() {
    let err = load_str(&wrong_board_net()).expect_err("must fail");
    match err {
        WeightsError::BoardSizeMismatch { detected } => assert_eq!(detected, 5),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn truncated_file_is_fatal() {
    let full = single_net(&SingleNetSpec::default());
    // Drop everything after the value conv quartet (last 4 lines).
    let lines: Vec<&str> = full.lines().collect();
    let cut = lines[..lines.len() - 4].join("\n");
    let err = load_str(&cut).expect_err("must fail");
    assert!(matches!(err, WeightsError::Truncated { .. }));
}

#[test]
fn garbage_line_is_fatal() {
    let full = single_net(&SingleNetSpec::default());
    let broken = full.replacen("0 0 0", "0 zebra 0", 1);
    let err = load_str(&broken).expect_err("must fail");
    assert!(matches!(err, WeightsError::MalformedLine { .. }));
}

#[test]
fn quartile_with_double_beta_is_fatal() {
    // 273 = LZ | adv_features | quartile_encoding
    let err = load_str(&double_y_net(273, 2)).expect_err("must fail");
    assert!(matches!(err, WeightsError::QuartileMultiBeta));
}

#[test]
fn quartile_with_single_beta_loads() {
    let net = load_str(&double_y_net(273, 1)).expect("load");
    assert!(net.params.quartile_encoding);
    assert_eq!(net.params.vbe_head_rets, 1);
}

#[test]
fn load_transforms_fuse_batchnorm_and_winograd() {
    let spec = SingleNetSpec {
        conv_bias: 0.25,
        bn_mean: 1.0,
        ..SingleNetSpec::default()
    };
    let mut net = load_str(&single_net(&spec)).expect("load");
    apply_load_transforms(&net.params, &mut net.weights, &mut net.heads);

    for biases in &net.weights.conv_biases {
        assert!(biases.iter().all(|&b| b == 0.0));
    }
    for means in &net.weights.batchnorm_means {
        // mean − bias = 1.0 − 0.25
        assert!(means.iter().all(|&m| (m - 0.75).abs() < 1e-6));
    }
    for stddevs in &net.weights.batchnorm_stddevs {
        let expect = 1.0 / (1.0f32 + 1e-5).sqrt();
        assert!(stddevs.iter().all(|&s| (s - expect).abs() < 1e-6));
    }

    // Winograd expanded each 3×3 filter into a 36-element tile.
    assert_eq!(
        net.weights.conv_weights[0].len(),
        WINOGRAD_TILE * 2 * net.params.input_planes
    );
    assert_eq!(net.weights.conv_weights[1].len(), WINOGRAD_TILE * 2 * 2);
}

#[test]
fn gzip_compressed_file_loads() {
    let text = single_net(&SingleNetSpec::default());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weights.txt.gz");
    let file = std::fs::File::create(&path).unwrap();
    let mut encoder = GzEncoder::new(file, Compression::fast());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap();

    let net = load_network_file(&path).expect("gz load");
    assert_eq!(net.params.channels, 2);
    assert_eq!(net.params.value_head_kind, ValueHeadKind::Single);
}

#[test]
fn plain_file_loads_from_disk() {
    let text = single_net(&SingleNetSpec::default());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weights.txt");
    std::fs::write(&path, &text).unwrap();
    let net = load_network_file(&path).expect("load");
    assert_eq!(net.params.input_moves, 8);
}

#[test]
fn summary_mentions_architecture() {
    let net = load_str(&double_y_net(17, 2)).expect("load");
    let text = net.summary().to_string();
    assert!(text.contains("2 channels"));
    assert!(text.contains("type Y"));
    assert!(text.contains("pooling with 3 channels"));
    assert!(text.contains("double output"));
}

#[test]
fn policy_bias_lands_in_heads() {
    let spec = SingleNetSpec {
        pass_bias: -3.5,
        ..SingleNetSpec::default()
    };
    let net = load_str(&single_net(&spec)).expect("load");
    assert_eq!(net.heads.ip_pol_b[NUM_INTERSECTIONS], -3.5);
}
