//! tengen-logging: append-only NDJSON events for run post-mortems.
//!
//! Weights loads, benchmarks, and per-move search summaries each get a
//! versioned event struct; one JSON object per line, flushed periodically.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::Serialize;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Schema-identifying fields carried by every event.
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfoV1 {
    pub engine_version: &'static str,
    pub weights_format_version: u32,
    pub board_size: u32,
}

/// Emitted once after a successful weights load.
#[derive(Debug, Clone, Serialize)]
pub struct WeightsLoadedEventV1 {
    pub event: &'static str,
    pub ts_ms: u64,
    pub v: VersionInfoV1,

    pub channels: u32,
    pub residual_blocks: u32,
    pub input_planes: u32,
    pub input_moves: u32,
    pub value_head: String,
    pub val_pool_outputs: u32,
    pub weight_bytes: u64,
}

/// Emitted after a benchmark run.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkEventV1 {
    pub event: &'static str,
    pub ts_ms: u64,
    pub v: VersionInfoV1,

    pub threads: u32,
    pub evaluations: u64,
    pub seconds: f64,
    pub evals_per_second: f64,
    pub cache_hits: u64,
    pub cache_lookups: u64,
}

/// Emitted per move: the root's view of the finished search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchRootEventV1 {
    pub event: &'static str,
    pub ts_ms: u64,
    pub v: VersionInfoV1,

    pub movenum: u32,
    pub to_move: &'static str,
    pub chosen_move: String,
    pub visits: i32,
    pub winrate: f32,
    pub alpkt_tree: f32,
    pub beta_median: f32,
    pub lambda: f32,
    pub mu: f32,
}

#[derive(Debug)]
pub enum NdjsonError {
    Io(io::Error),
    Json(serde_json::Error),
}

impl From<io::Error> for NdjsonError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for NdjsonError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl std::fmt::Display for NdjsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "ndjson io error: {e}"),
            Self::Json(e) => write!(f, "ndjson encode error: {e}"),
        }
    }
}

impl std::error::Error for NdjsonError {}

/// Append-only NDJSON writer.
///
/// Contract: each call writes exactly one JSON object followed by a newline.
pub struct NdjsonWriter {
    w: BufWriter<File>,
    lines_since_flush: u64,
    flush_every_lines: u64,
}

impl NdjsonWriter {
    /// Open a file for append, creating it if needed.
    pub fn open_append(path: impl AsRef<Path>) -> Result<Self, NdjsonError> {
        Self::open_append_with_flush(path, 0)
    }

    /// `flush_every_lines = 0` disables periodic flushing.
    pub fn open_append_with_flush(
        path: impl AsRef<Path>,
        flush_every_lines: u64,
    ) -> Result<Self, NdjsonError> {
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            w: BufWriter::new(f),
            lines_since_flush: 0,
            flush_every_lines,
        })
    }

    pub fn write_event<T: Serialize>(&mut self, event: &T) -> Result<(), NdjsonError> {
        let mut buf = serde_json::to_vec(event)?;
        buf.push(b'\n');
        self.w.write_all(&buf)?;
        self.lines_since_flush += 1;
        if self.flush_every_lines > 0 && self.lines_since_flush >= self.flush_every_lines {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), NdjsonError> {
        self.w.flush()?;
        self.lines_since_flush = 0;
        Ok(())
    }
}
