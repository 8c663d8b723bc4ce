use super::Phase;
use std::time::{Duration, Instant};

use tracing::debug;

/// Lap timer for back-to-back phases (one `Instant::now()` per lap).
pub struct LapTimer(Instant);

impl LapTimer {
    #[inline]
    pub fn start() -> Self {
        Self(Instant::now())
    }

    #[inline]
    pub fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let d = now.duration_since(self.0);
        self.0 = now;
        d
    }
}

/// Per-worker phase totals.
#[derive(Debug, Clone, Default)]
pub struct PhaseTotals {
    e_step: Duration,
    m_step: Duration,
    metrics: Duration,
    iterations: u64,
}

impl PhaseTotals {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add(&mut self, phase: Phase, d: Duration) {
        match phase {
            Phase::EStep => self.e_step += d,
            Phase::MStep => self.m_step += d,
            Phase::Metrics => self.metrics += d,
        }
    }

    #[inline]
    pub fn finish_iteration(&mut self) {
        self.iterations += 1;
    }

    pub fn report(&self, rank: usize) {
        let total = self.e_step + self.m_step + self.metrics;
        let pct = |d: Duration| {
            if total.is_zero() {
                0.0
            } else {
                100.0 * d.as_secs_f64() / total.as_secs_f64()
            }
        };
        debug!(
            rank,
            iterations = self.iterations,
            total_ms = total.as_secs_f64() * 1e3,
            e_step_ms = self.e_step.as_secs_f64() * 1e3,
            e_step_pct = pct(self.e_step),
            m_step_ms = self.m_step.as_secs_f64() * 1e3,
            m_step_pct = pct(self.m_step),
            metrics_ms = self.metrics.as_secs_f64() * 1e3,
            metrics_pct = pct(self.metrics),
            "phase timings"
        );
    }
}
