//! Adaptive window control and Expected-In-Flight-Rate bookkeeping (§4.3
//! "Window adaptation", "Expected-In-Flight-Rate (EIFR)"), ported from
//! `original_source/RNS/Resource.py`'s `update_eifr` and the window-tier
//! adjustments inline in `__watchdog_job`/`receive_part`.

use crate::config::ResourceConfig;

/// Tracks the current window size, its tier ceiling, and the rolling
/// fast/very-slow round counters that drive tier transitions.
#[derive(Debug, Clone, Copy)]
pub struct WindowController {
    window: usize,
    window_max: usize,
    window_min: usize,
    window_flexibility: usize,

    fast_rate_rounds: u32,
    very_slow_rate_rounds: u32,
    eifr: f64,

    rate_fast: f64,
    rate_very_slow: f64,
    very_slow_rate_threshold: u32,
    fast_rate_threshold: u32,
    window_max_slow: usize,
    window_max_very_slow: usize,
    window_max_fast: usize,
}

impl WindowController {
    pub fn new(config: &ResourceConfig) -> Self {
        Self {
            window: config.window_initial,
            window_max: config.window_max_slow,
            window_min: config.window_min,
            window_flexibility: config.window_flexibility,

            fast_rate_rounds: 0,
            very_slow_rate_rounds: 0,
            eifr: 0.0,

            rate_fast: config.rate_fast,
            rate_very_slow: config.rate_very_slow,
            very_slow_rate_threshold: config.very_slow_rate_threshold,
            fast_rate_threshold: config.fast_rate_threshold(),
            window_max_slow: config.window_max_slow,
            window_max_very_slow: config.window_max_very_slow,
            window_max_fast: config.window_max_fast,
        }
    }

    /// Warm-starts from a previous resource's settled window on the same
    /// link, per `Link::last_resource_window`.
    pub fn with_warm_start(config: &ResourceConfig, warm_window: usize) -> Self {
        let mut ctrl = Self::new(config);
        ctrl.window = warm_window.clamp(ctrl.window_min, ctrl.window_max);
        ctrl
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn window_max(&self) -> usize {
        self.window_max
    }

    pub fn window_min(&self) -> usize {
        self.window_min
    }

    pub fn eifr(&self) -> f64 {
        self.eifr
    }

    /// The widest span of outstanding part requests a receiver may keep in
    /// flight at once: the current window plus the configured flexibility
    /// slack, so a request round can look slightly ahead of the settled
    /// window without forcing an immediate tier change.
    pub fn max_request_span(&self) -> usize {
        self.window + self.window_flexibility
    }

    /// Folds a satisfied round's throughput sample into the EIFR estimate
    /// and adjusts the window tier / size accordingly.
    pub fn update_eifr(&mut self, bytes_received: u64, elapsed_secs: f64) {
        if elapsed_secs <= 0.0 {
            return;
        }
        let rate = bytes_received as f64 / elapsed_secs;
        self.eifr = rate;

        if rate > self.rate_fast {
            self.window_max = self.window_max_fast;
            self.fast_rate_rounds += 1;
            self.very_slow_rate_rounds = 0;

            if self.fast_rate_rounds > self.fast_rate_threshold && self.window < self.window_max {
                self.window = (self.window + 1).min(self.window_max);
                self.fast_rate_rounds = 0;
            }
        } else if rate < self.rate_very_slow {
            self.window_max = self.window_max_very_slow;
            self.very_slow_rate_rounds += 1;
            self.fast_rate_rounds = 0;

            if self.very_slow_rate_rounds > self.very_slow_rate_threshold
                && self.window > self.window_min
            {
                self.window = self.window.saturating_sub(1).max(self.window_min);
                self.very_slow_rate_rounds = 0;
            }
        } else {
            self.window_max = self.window_max_slow;
            self.fast_rate_rounds = 0;
            self.very_slow_rate_rounds = 0;
        }

        self.window = self.window.clamp(self.window_min, self.window_max);
    }

    /// A timed-out round retreats the window by one step and resets the
    /// rolling tier counters, so a single lost round doesn't immediately
    /// re-trigger a tier promotion on the next good round. Also retreats
    /// `window_max`, twice if the gap to `window` would otherwise exceed the
    /// configured flexibility.
    pub fn on_retry(&mut self) {
        self.fast_rate_rounds = 0;
        self.very_slow_rate_rounds = 0;
        if self.window > self.window_min {
            self.window = self.window.saturating_sub(1).max(self.window_min);
        }
        if self.window_max > self.window_min {
            self.window_max -= 1;
        }
        if self.window_max.saturating_sub(self.window) > self.window_flexibility.saturating_sub(1) {
            self.window_max = self.window_max.saturating_sub(1).max(self.window_min);
        }
        self.window_max = self.window_max.max(self.window);
    }

    /// Unconditional per-round relaxation: a request round that was fully
    /// satisfied without a retry grows the window by one step (distinct from
    /// `update_eifr`'s rate-driven tier promotion), and widens `window_min`
    /// once the settled window has pulled far enough ahead of it.
    pub fn note_round_satisfied(&mut self) {
        if self.window < self.window_max {
            self.window += 1;
        }
        if self.window.saturating_sub(self.window_min) > self.window_flexibility.saturating_sub(1) {
            self.window_min += 1;
        }
    }
}
