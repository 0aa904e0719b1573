// error.rs — Crate-wide error type.
//
// Every failure is fatal for the pass that hit it: a half-computed plane is
// not meaningful, so callers discard it. The variants follow the order in
// which a run can fail:
//
//   Configuration  — bad grid shape, caught before anything is dispatched
//   Build          — the WGSL kernel failed validation / compilation
//   Device         — no adapter, device request refused
//   Dispatch       — an invocation (enqueue, wait, map) failed at runtime
//   LivenessTimeout — a busy-wait on neighbour flags exceeded its bound
//   Mismatch       — a verified pass disagreed with the sequential reference

use thiserror::Error;

use crate::gpu::device::GpuError;

/// Errors surfaced by grid construction, scheduling and the GPU backend.
#[derive(Debug, Error)]
pub enum PredError {
    /// Invalid grid shape or run configuration.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The prediction kernel failed to build.
    #[error("kernel build failed: {0}")]
    Build(String),

    /// GPU device acquisition failed.
    #[error(transparent)]
    Device(#[from] GpuError),

    /// An invocation failed while being enqueued, executed or waited on.
    #[error("dispatch failed: {0}")]
    Dispatch(String),

    /// A device-resident unit gave up waiting for a neighbour's completion
    /// flag. The pass output is incomplete.
    #[error("tile {tile} gave up waiting on its neighbours after {limit}")]
    LivenessTimeout { tile: usize, limit: String },

    /// A pass produced a plane that differs from the raster-order reference.
    #[error("{label} output differs from the reference at ({x}, {y}): got {got}, expected {expected}")]
    Mismatch {
        label: String,
        x: usize,
        y: usize,
        got: u8,
        expected: u8,
    },
}

impl PredError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        PredError::Configuration(msg.into())
    }

    pub(crate) fn dispatch(msg: impl Into<String>) -> Self {
        PredError::Dispatch(msg.into())
    }

    /// True for the liveness hazard, the only error a driver may recover
    /// from by rerunning the pass with the host-barrier strategy.
    pub fn is_liveness(&self) -> bool {
        matches!(self, PredError::LivenessTimeout { .. })
    }
}
