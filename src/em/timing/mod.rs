//! Zero-cost phase timing for the EM loop.
//!
//! With the `timing` feature, each worker accumulates wall-clock totals for the
//! E-step, the M-step and metric evaluation, and logs them at debug level when
//! the fit finishes.
//!
//! Without it, all types are zero-sized and every method compiles away.

/// Coarse phases of one EM iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Search space, log-joint, K(n), posterior and neighbor update.
    EStep,
    /// Sufficient statistics and their all-reduce.
    MStep,
    /// Free energy, likelihood, quantization error, clustering scores.
    Metrics,
}

#[cfg(feature = "timing")]
mod real;
#[cfg(not(feature = "timing"))]
mod stub;

#[cfg(feature = "timing")]
pub use real::*;
#[cfg(not(feature = "timing"))]
pub use stub::*;
