//! Truncated EM engine: distances, neighbor graph, E-step and M-step.
//!
//! Each step is a function from the current [`crate::ModelState`] (plus the
//! worker's shard and communicator) to a new value; nothing here keeps state
//! across iterations.

pub mod distance;
mod estep;
mod mstep;
pub mod neighbors;
pub(crate) mod select;
pub(crate) mod timing;

pub use estep::{e_step, init_active_sets, EStepOutput, EStepParams};
pub use mstep::{apply_statistics, local_statistics, m_step, SufficientStats};
