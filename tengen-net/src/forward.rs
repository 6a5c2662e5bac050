//! The forward-backend contract.
//!
//! The residual tower and convolutional heads run on a pluggable backend
//! (BLAS, OpenCL, …) behind this trait; the evaluator only sees plane
//! buffers. Backends also own the drain/resume cancellation gate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::weights::NetWeights;

/// Evaluation-time errors.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The backend is draining; the caller should unwind its expansion.
    #[error("network evaluations are halted")]
    Halted,
    /// The backend failed to initialize or run.
    #[error("forward backend failure: {0}")]
    Backend(String),
    /// Reference and primary backends disagree.
    #[error("backend self-check mismatch (L2 distance {distance})")]
    SelfCheck { distance: f32 },
}

/// A forward-inference backend for the convolutional part of the network.
pub trait ForwardBackend: Send + Sync {
    /// One-time device setup for a tower of `channels` channels.
    fn initialize(&mut self, channels: usize) -> Result<(), EvalError>;

    /// Hand the (already Winograd-transformed, BN-fused) weights over.
    fn push_weights(
        &mut self,
        winograd_alpha: usize,
        input_planes: usize,
        channels: usize,
        weights: Arc<NetWeights>,
    ) -> Result<(), EvalError>;

    /// Run one forward pass. `input` is `input_planes · intersections`
    /// floats; `policy_out` and `value_out` receive the policy and value
    /// conv planes. Returns [`EvalError::Halted`] while draining.
    fn forward(
        &self,
        input: &[f32],
        policy_out: &mut [f32],
        value_out: &mut [f32],
    ) -> Result<(), EvalError>;

    /// Reject new evaluations until [`ForwardBackend::resume`].
    fn drain(&self);

    /// Reopen for business after a drain.
    fn resume(&self);
}

/// A kernel-less backend that returns all-zero planes.
///
/// Useful for benchmarks of the orchestration layer and for tests: with zero
/// planes the dense heads reduce to their bias terms, so outputs are exactly
/// predictable. Honors the drain gate like a real backend.
#[derive(Default)]
pub struct ZeroBackend {
    draining: AtomicBool,
    weights: Option<Arc<NetWeights>>,
}

impl ZeroBackend {
    pub fn new() -> ZeroBackend {
        ZeroBackend::default()
    }
}

impl ForwardBackend for ZeroBackend {
    fn initialize(&mut self, _channels: usize) -> Result<(), EvalError> {
        Ok(())
    }

    fn push_weights(
        &mut self,
        _winograd_alpha: usize,
        _input_planes: usize,
        _channels: usize,
        weights: Arc<NetWeights>,
    ) -> Result<(), EvalError> {
        self.weights = Some(weights);
        Ok(())
    }

    fn forward(
        &self,
        _input: &[f32],
        policy_out: &mut [f32],
        value_out: &mut [f32],
    ) -> Result<(), EvalError> {
        if self.draining.load(Ordering::Acquire) {
            return Err(EvalError::Halted);
        }
        policy_out.fill(0.0);
        value_out.fill(0.0);
        Ok(())
    }

    fn drain(&self) {
        self.draining.store(true, Ordering::Release);
    }

    fn resume(&self) {
        self.draining.store(false, Ordering::Release);
    }
}
