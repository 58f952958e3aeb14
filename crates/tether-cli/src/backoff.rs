//! Redial pacing for remote sessions

use std::time::Duration;

use tether_core::config::BackoffConfig;

/// Delay schedule between attempts to reach a control node
///
/// Each failed dial or ended session grows the wait by `multiplier` up to
/// `max`. A successful handshake puts the schedule back to `initial`.
#[derive(Debug, Clone)]
pub struct RedialBackoff {
    config: BackoffConfig,
    base: Duration,
}

impl RedialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        let base = config.initial.min(config.max);
        Self { config, base }
    }

    /// How long to wait before the next dial
    ///
    /// Up to `jitter * base` is added on top so that agents cut off together
    /// do not redial in lockstep.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base;
        let grown = base.as_secs_f64() * self.config.multiplier;
        self.base = Duration::try_from_secs_f64(grown)
            .unwrap_or(self.config.max)
            .min(self.config.max);

        let spread = base.as_secs_f64() * self.config.jitter.clamp(0.0, 1.0);
        base + Duration::from_secs_f64(spread * rand::random::<f64>())
    }

    /// The handshake went through; the next outage starts from `initial`
    pub fn connected(&mut self) {
        self.base = self.config.initial.min(self.config.max);
    }
}
