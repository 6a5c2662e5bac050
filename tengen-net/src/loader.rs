//! Text weights-file loading.
//!
//! The file starts with an integer format version whose bits encode feature
//! flags; every following line is one whitespace-separated flattened tensor.
//! Lines are grouped into blocks of four and classified by a state machine
//! keyed on the current section and the lengths of the vectors just read.
//! Sections that consume only two lines leave the other two as `excess`,
//! re-used as the head of the next block.

use std::io::{BufRead, BufReader, Cursor, Read};
use std::mem;
use std::path::Path;

use flate2::read::GzDecoder;
use thiserror::Error;

use tengen_core::{NUM_INTERSECTIONS, POTENTIAL_MOVES};
use tengen_features::{CHAIN_LIBERTIES_PLANES, CHAIN_SIZE_PLANES};

use crate::weights::{
    add_zero_channels, HeadWeights, NetParams, NetWeights, ValueHeadKind, WeightsSummary,
};

/// Weights-file loading errors. All of them are fatal to the caller.
#[derive(Debug, Error)]
pub enum WeightsError {
    #[error("could not read weights file: {0}")]
    Io(#[from] std::io::Error),
    #[error("weights file is the wrong version ({version})")]
    WrongVersion { version: i64 },
    #[error("malformed weights line {line}")]
    MalformedLine { line: usize },
    #[error("network is for a {detected}x{detected} board")]
    BoardSizeMismatch { detected: usize },
    #[error("unexpected {what} length at line {line}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
        line: usize,
    },
    #[error("unsupported value head with {returns} outputs")]
    InvalidValueHead { returns: usize },
    #[error("more than one beta output with quartile encoding is not supported")]
    QuartileMultiBeta,
    #[error(
        "input planes {input_planes} inconsistent with {input_moves} moves of {per_move} planes"
    )]
    InconsistentInputPlanes {
        input_planes: usize,
        input_moves: usize,
        per_move: usize,
    },
    #[error("weights file truncated near line {line}")]
    Truncated { line: usize },
}

/// A fully parsed network, before the load transforms.
#[derive(Debug, Clone)]
pub struct LoadedNetwork {
    pub params: NetParams,
    pub weights: NetWeights,
    pub heads: HeadWeights,
}

impl LoadedNetwork {
    pub fn summary(&self) -> WeightsSummary {
        WeightsSummary {
            params: self.params.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    InputConv,
    ResconvTower,
    PolConvTower,
    PolDense,
    ValueConv,
    ValueAvgpool,
    ValueDenseTower,
    ValDenseHidden,
    ValDenseOut,
    VbeDenseHidden,
    VbeDenseOut,
}

struct FileIndex {
    section: Section,
    previous: Section,
    line: usize,
    /// Lines read beyond the previous section's needs, carried into the
    /// next block.
    excess: usize,
    complete: bool,
}

/// Load a weights file from disk; transparently decompresses gzip.
pub fn load_network_file<P: AsRef<Path>>(path: P) -> Result<LoadedNetwork, WeightsError> {
    let raw = std::fs::read(path)?;
    let text = if raw.starts_with(&[0x1f, 0x8b]) {
        let mut out = Vec::new();
        GzDecoder::new(raw.as_slice()).read_to_end(&mut out)?;
        out
    } else {
        raw
    };
    load_network(BufReader::new(Cursor::new(text)))
}

/// Load a weights stream (uncompressed text).
pub fn load_network<R: BufRead>(reader: R) -> Result<LoadedNetwork, WeightsError> {
    let mut lines = reader.lines();

    let first = lines.next().ok_or(WeightsError::Truncated { line: 0 })??;
    let version: i64 = first
        .trim()
        .parse()
        .map_err(|_| WeightsError::WrongVersion { version: -1 })?;

    let lz_or_elf = version & 3;
    let extra_bits = version & !511;
    if !(lz_or_elf == 1 || lz_or_elf == 2) || extra_bits != 0 || version < 0 {
        return Err(WeightsError::WrongVersion { version });
    }

    let mut loader = Loader::new(NetParams {
        format_version: version as u32,
        channels: 0,
        residual_blocks: 0,
        input_planes: 0,
        input_moves: 0,
        adv_features: version & 16 != 0,
        chainlibs_features: version & 64 != 0,
        chainsize_features: version & 128 != 0,
        quartile_encoding: version & 256 != 0,
        include_color: false,
        policy_conv_layers: 0,
        policy_channels: 0,
        policy_outputs: 0,
        value_channels: 0,
        val_dense_inputs: 0,
        val_outputs: 1,
        val_pool_outputs: 0,
        val_chans: 0,
        vbe_chans: 0,
        value_head_rets: 0,
        val_head_rets: 0,
        vbe_head_rets: 0,
        value_head_kind: ValueHeadKind::Single,
        value_black_frame: lz_or_elf == 2,
    });

    let mut layer: [Vec<f32>; 4] = Default::default();
    while loader.read_weights_block(&mut lines, &mut layer)? {}

    if !loader.id.complete {
        return Err(WeightsError::Truncated {
            line: loader.id.line,
        });
    }

    Ok(LoadedNetwork {
        params: loader.params,
        weights: loader.weights,
        heads: loader.heads,
    })
}

struct Loader {
    params: NetParams,
    weights: NetWeights,
    heads: HeadWeights,
    id: FileIndex,
}

impl Loader {
    fn new(params: NetParams) -> Loader {
        Loader {
            params,
            weights: NetWeights::default(),
            heads: HeadWeights::default(),
            id: FileIndex {
                section: Section::None,
                previous: Section::None,
                line: 1,
                excess: 0,
                complete: false,
            },
        }
    }

    /// Reads up to four lines (re-using carried excess), classifies and
    /// stores one layer if anything was read. Returns false once the end of
    /// the stream was reached.
    fn read_weights_block<I>(
        &mut self,
        lines: &mut I,
        layer: &mut [Vec<f32>; 4],
    ) -> Result<bool, WeightsError>
    where
        I: Iterator<Item = std::io::Result<String>>,
    {
        debug_assert!(self.id.excess < 4);
        let excess = self.id.excess;
        let mut missing = 0usize;
        for i in 0..4 {
            if i < excess {
                layer[i] = mem::take(&mut layer[4 - excess + i]);
            } else {
                match self.read_weights_line(lines)? {
                    Some(values) => layer[i] = values,
                    None => {
                        layer[i] = Vec::new();
                        missing += 1;
                    }
                }
            }
        }

        if missing < 4 {
            self.identify_layer(layer);
            self.set_network_parameters(layer)?;
            self.store_layer(layer)?;
        }

        Ok(missing == 0)
    }

    fn read_weights_line<I>(&mut self, lines: &mut I) -> Result<Option<Vec<f32>>, WeightsError>
    where
        I: Iterator<Item = std::io::Result<String>>,
    {
        let Some(line) = lines.next() else {
            return Ok(None);
        };
        let line = line?;
        self.id.line += 1;
        let mut values = Vec::new();
        for token in line.split_ascii_whitespace() {
            let value: f32 = token.parse().map_err(|_| WeightsError::MalformedLine {
                line: self.id.line,
            })?;
            values.push(value);
        }
        Ok(Some(values))
    }

    fn identify_layer(&mut self, layer: &[Vec<f32>; 4]) {
        use Section::*;

        self.id.previous = self.id.section;
        self.id.section = match self.id.section {
            Section::None => InputConv,
            InputConv => ResconvTower,
            ResconvTower => {
                if layer[0].len() == self.params.channels * 9 * self.params.channels {
                    ResconvTower
                } else {
                    PolConvTower
                }
            }
            PolConvTower => {
                if layer[1].len() == layer[3].len() {
                    PolConvTower
                } else {
                    PolDense
                }
            }
            PolDense => ValueConv,
            ValueConv if layer[0].len() % NUM_INTERSECTIONS != 0 => ValueAvgpool,
            ValueConv | ValueAvgpool | ValueDenseTower => {
                if layer[1].len() == layer[3].len() {
                    ValueDenseTower
                } else {
                    ValDenseHidden
                }
            }
            ValDenseHidden => ValDenseOut,
            ValDenseOut => {
                if !layer[2].is_empty() {
                    VbeDenseHidden
                } else {
                    VbeDenseOut
                }
            }
            VbeDenseHidden => VbeDenseOut,
            VbeDenseOut => VbeDenseOut,
        };
    }

    fn set_network_parameters(&mut self, layer: &[Vec<f32>; 4]) -> Result<(), WeightsError> {
        use Section::*;
        let entered = self.id.section != self.id.previous;

        match self.id.section {
            InputConv => {
                // The bias line of the input convolution fixes the tower
                // width; the weight line then yields the input plane count.
                let channels = layer[1].len();
                if channels == 0 || layer[0].is_empty() || layer[0].len() % (9 * channels) != 0 {
                    return Err(WeightsError::ShapeMismatch {
                        what: "input convolution",
                        expected: 9 * channels.max(1),
                        got: layer[0].len(),
                        line: self.id.line,
                    });
                }
                self.params.channels = channels;
                self.params.input_planes = layer[0].len() / 9 / channels;
                self.params.include_color = self.params.input_planes % 2 == 0;

                let per_move = 2
                    + if self.params.adv_features { 2 } else { 0 }
                    + if self.params.chainlibs_features {
                        CHAIN_LIBERTIES_PLANES
                    } else {
                        0
                    }
                    + if self.params.chainsize_features {
                        CHAIN_SIZE_PLANES
                    } else {
                        0
                    };
                let color_planes = if self.params.include_color { 2 } else { 1 };
                self.params.input_moves = (self.params.input_planes - color_planes) / per_move;
                if self.params.input_moves * per_move + color_planes != self.params.input_planes {
                    return Err(WeightsError::InconsistentInputPlanes {
                        input_planes: self.params.input_planes,
                        input_moves: self.params.input_moves,
                        per_move,
                    });
                }
            }

            ResconvTower => {}

            PolConvTower => {
                self.params.policy_outputs = layer[1].len();
                if entered {
                    self.params.policy_channels = layer[1].len();
                    let conv_count = self.weights.conv_biases.len();
                    if conv_count % 2 != 1 {
                        return Err(WeightsError::ShapeMismatch {
                            what: "residual tower",
                            expected: conv_count + 1,
                            got: conv_count,
                            line: self.id.line,
                        });
                    }
                    self.params.residual_blocks = (conv_count - 1) / 2;
                }
            }

            PolDense => {
                self.params.policy_conv_layers = self.weights.conv_pol_b.len();
            }

            ValueConv => {
                self.params.val_outputs = layer[1].len();
                self.params.val_dense_inputs = NUM_INTERSECTIONS * self.params.val_outputs;
            }

            ValueAvgpool => {
                self.params.val_pool_outputs = layer[1].len();
                self.params.val_dense_inputs = layer[1].len();
            }

            ValueDenseTower => {
                if entered {
                    self.params.value_channels = layer[1].len();
                }
            }

            ValDenseHidden => {
                self.params.val_chans = layer[1].len();
            }

            ValDenseOut => {
                let rets = layer[1].len();
                self.params.value_head_rets = rets;
                self.params.val_head_rets = rets;
                match rets {
                    1 => self.params.value_head_kind = ValueHeadKind::Single,
                    2 | 3 => {
                        self.params.value_head_kind = ValueHeadKind::DoubleI;
                        self.params.val_head_rets = 1;
                        self.params.vbe_head_rets = rets - 1;
                    }
                    _ => return Err(WeightsError::InvalidValueHead { returns: rets }),
                }
                self.id.complete = true;
            }

            VbeDenseHidden => {
                if self.params.val_head_rets != 1 {
                    return Err(WeightsError::InvalidValueHead {
                        returns: self.params.val_head_rets,
                    });
                }
                self.params.value_head_kind = ValueHeadKind::DoubleY;
                self.params.vbe_chans = layer[1].len();
                self.id.complete = false;
            }

            VbeDenseOut => {
                if self.params.val_head_rets != 1 {
                    return Err(WeightsError::InvalidValueHead {
                        returns: self.params.val_head_rets,
                    });
                }
                let rets = layer[1].len();
                if !(rets == 1 || rets == 2) {
                    return Err(WeightsError::InvalidValueHead { returns: rets });
                }
                self.params.vbe_head_rets = rets;
                self.params.value_head_rets = self.params.val_head_rets + rets;
                if self.params.value_head_kind != ValueHeadKind::DoubleY {
                    self.params.value_head_kind = ValueHeadKind::DoubleT;
                }
                self.id.complete = true;
            }

            Section::None => {}
        }

        if self.params.quartile_encoding && self.params.vbe_head_rets > 1 {
            return Err(WeightsError::QuartileMultiBeta);
        }

        Ok(())
    }

    fn expect_len(
        &self,
        what: &'static str,
        values: &[f32],
        expected: usize,
    ) -> Result<(), WeightsError> {
        if values.len() != expected {
            return Err(WeightsError::ShapeMismatch {
                what,
                expected,
                got: values.len(),
                line: self.id.line,
            });
        }
        Ok(())
    }

    fn store_layer(&mut self, layer: &mut [Vec<f32>; 4]) -> Result<(), WeightsError> {
        use Section::*;
        let entered = self.id.section != self.id.previous;
        let channels = self.params.channels;

        match self.id.section {
            InputConv | ResconvTower => {
                let in_ch = if self.id.section == InputConv {
                    self.params.input_planes
                } else {
                    channels
                };
                self.expect_len("conv weights", &layer[0], in_ch * 9 * channels)?;
                self.expect_len("conv biases", &layer[1], channels)?;
                self.expect_len("batchnorm means", &layer[2], channels)?;
                self.expect_len("batchnorm stddevs", &layer[3], channels)?;
                self.weights.conv_weights.push(mem::take(&mut layer[0]));
                self.weights.conv_biases.push(mem::take(&mut layer[1]));
                self.weights.batchnorm_means.push(mem::take(&mut layer[2]));
                self.weights
                    .batchnorm_stddevs
                    .push(mem::take(&mut layer[3]));
                self.id.excess = 0;
            }

            PolConvTower => {
                let outputs = self.params.policy_outputs;
                let inputs = if entered {
                    channels
                } else {
                    self.params.policy_channels
                };
                self.expect_len("policy conv weights", &layer[0], inputs * outputs)?;
                self.expect_len("policy conv biases", &layer[1], outputs)?;
                self.expect_len("policy batchnorm means", &layer[2], outputs)?;
                self.expect_len("policy batchnorm stddevs", &layer[3], outputs)?;
                self.weights.conv_pol_w.push(mem::take(&mut layer[0]));
                self.weights.conv_pol_b.push(mem::take(&mut layer[1]));
                self.weights.bn_pol_w1.push(mem::take(&mut layer[2]));
                self.weights.bn_pol_w2.push(mem::take(&mut layer[3]));
                self.id.excess = 0;
            }

            PolDense => {
                if layer[1].len() != POTENTIAL_MOVES {
                    // A mismatched bias length means the file is for another
                    // board size.
                    let detected = ((layer[1].len().max(1) - 1) as f64).sqrt().round() as usize;
                    return Err(WeightsError::BoardSizeMismatch { detected });
                }
                self.expect_len(
                    "policy dense weights",
                    &layer[0],
                    self.params.policy_outputs * NUM_INTERSECTIONS * POTENTIAL_MOVES,
                )?;
                self.heads.ip_pol_w = mem::take(&mut layer[0]);
                self.heads.ip_pol_b = mem::take(&mut layer[1]);
                self.id.excess = 2;
            }

            ValueConv => {
                self.expect_len(
                    "value conv weights",
                    &layer[0],
                    channels * self.params.val_outputs,
                )?;
                self.expect_len("value conv biases", &layer[1], self.params.val_outputs)?;
                self.expect_len("value batchnorm means", &layer[2], self.params.val_outputs)?;
                self.expect_len(
                    "value batchnorm stddevs",
                    &layer[3],
                    self.params.val_outputs,
                )?;
                self.weights.conv_val_w = mem::take(&mut layer[0]);
                self.weights.conv_val_b = mem::take(&mut layer[1]);
                self.weights.bn_val_w1 = mem::take(&mut layer[2]);
                self.weights.bn_val_w2 = mem::take(&mut layer[3]);
                self.id.excess = 0;
            }

            ValueAvgpool => {
                let pool = self.params.val_pool_outputs;
                self.expect_len("pool conv weights", &layer[0], self.params.val_outputs * pool)?;
                self.expect_len("pool conv biases", &layer[1], pool)?;
                self.expect_len("pool batchnorm means", &layer[2], pool)?;
                self.expect_len("pool batchnorm stddevs", &layer[3], pool)?;
                self.weights.conv_val_pool_w = mem::take(&mut layer[0]);
                self.weights.conv_val_pool_b = mem::take(&mut layer[1]);
                self.weights.bn_val_pool_w1 = mem::take(&mut layer[2]);
                self.weights.bn_val_pool_w2 = mem::take(&mut layer[3]);
                if self.params.val_outputs < 8 {
                    add_zero_channels(&mut self.params, &mut self.weights);
                }
                self.id.excess = 0;
            }

            ValueDenseTower => {
                let width = self.params.value_channels;
                let inputs = if entered {
                    self.params.val_dense_inputs
                } else {
                    width
                };
                self.expect_len("value dense weights", &layer[0], inputs * width)?;
                self.expect_len("value dense biases", &layer[1], width)?;
                self.expect_len("value dense means", &layer[2], width)?;
                self.expect_len("value dense vars", &layer[3], width)?;
                self.heads.vh_dense_weights.push(mem::take(&mut layer[0]));
                self.heads.vh_dense_biases.push(mem::take(&mut layer[1]));
                self.heads.vh_dense_bn_means.push(mem::take(&mut layer[2]));
                self.heads.vh_dense_bn_vars.push(mem::take(&mut layer[3]));
                self.id.excess = 0;
            }

            ValDenseHidden => {
                let inputs = if self.heads.vh_dense_weights.is_empty() {
                    self.params.val_dense_inputs
                } else {
                    self.params.value_channels
                };
                self.expect_len("alpha hidden weights", &layer[0], inputs * self.params.val_chans)?;
                self.heads.ip1_val_w = mem::take(&mut layer[0]);
                self.heads.ip1_val_b = mem::take(&mut layer[1]);
                self.id.excess = 2;
            }

            ValDenseOut => {
                self.expect_len(
                    "alpha output weights",
                    &layer[0],
                    self.params.val_chans * self.params.value_head_rets,
                )?;
                self.heads.ip2_val_w = mem::take(&mut layer[0]);
                self.heads.ip2_val_b = mem::take(&mut layer[1]);
                self.id.excess = 2;
            }

            VbeDenseHidden => {
                let inputs = if self.heads.vh_dense_weights.is_empty() {
                    self.params.val_dense_inputs
                } else {
                    self.params.value_channels
                };
                self.expect_len("beta hidden weights", &layer[0], inputs * self.params.vbe_chans)?;
                self.heads.ip1_vbe_w = mem::take(&mut layer[0]);
                self.heads.ip1_vbe_b = mem::take(&mut layer[1]);
                self.id.excess = 2;
            }

            VbeDenseOut => {
                let inputs = if self.heads.ip1_vbe_w.is_empty() {
                    self.params.val_chans
                } else {
                    self.params.vbe_chans
                };
                self.expect_len(
                    "beta output weights",
                    &layer[0],
                    inputs * self.params.vbe_head_rets,
                )?;
                self.heads.ip2_vbe_w = mem::take(&mut layer[0]);
                self.heads.ip2_vbe_b = mem::take(&mut layer[1]);
                self.id.excess = 2;
            }

            Section::None => {}
        }

        Ok(())
    }
}
