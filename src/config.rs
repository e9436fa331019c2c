//! Tunable constants for the resource transfer engine, with optional
//! override loading from a small `[section]`/`key = value` INI dialect —
//! same hand-rolled parser shape the corpus uses for interface config.

use crate::error::ParcelError;

/// Window, retry and timeout tuning. `Default` matches the bit-exact
/// constants named in the protocol design.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceConfig {
    pub window_initial: usize,
    pub window_min: usize,
    pub window_max_slow: usize,
    pub window_max_very_slow: usize,
    pub window_max_fast: usize,
    pub window_flexibility: usize,

    pub rate_fast: f64,
    pub rate_very_slow: f64,
    pub very_slow_rate_threshold: u32,

    pub max_retries: u32,
    pub max_adv_retries: u32,
    pub part_timeout_factor: f64,
    pub part_timeout_factor_after_rtt: f64,
    pub proof_timeout_factor: f64,
    pub sender_grace_time: f64,
    pub processing_grace: f64,
    pub retry_grace_time: f64,
    pub per_retry_delay: f64,
    pub watchdog_max_sleep_ms: u64,
}

impl ResourceConfig {
    /// `FAST_RATE_THRESHOLD = WINDOW_MAX_SLOW - WINDOW - 2`, recomputed
    /// rather than stored since it depends on the other tunables.
    pub fn fast_rate_threshold(&self) -> u32 {
        (self.window_max_slow as i64 - self.window_initial as i64 - 2).max(0) as u32
    }

    pub fn from_ini(ini: &str) -> Result<Self, ParcelError> {
        let mut cfg = Self::default();
        let mut in_resource = false;

        for raw_line in ini.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                in_resource = line[1..line.len() - 1].trim().eq_ignore_ascii_case("resource");
                continue;
            }
            if !in_resource {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else { continue };
            let key = key.trim();
            let value = value.trim();

            macro_rules! set_usize {
                ($field:ident) => {
                    if key == stringify!($field) {
                        cfg.$field = value
                            .parse()
                            .map_err(|_| ParcelError::Codec(format!("bad value for {key}")))?;
                        continue;
                    }
                };
            }
            macro_rules! set_f64 {
                ($field:ident) => {
                    if key == stringify!($field) {
                        cfg.$field = value
                            .parse()
                            .map_err(|_| ParcelError::Codec(format!("bad value for {key}")))?;
                        continue;
                    }
                };
            }

            set_usize!(window_initial);
            set_usize!(window_min);
            set_usize!(window_max_slow);
            set_usize!(window_max_very_slow);
            set_usize!(window_max_fast);
            set_usize!(window_flexibility);
            set_f64!(rate_fast);
            set_f64!(rate_very_slow);
            set_f64!(max_retries);
            set_f64!(sender_grace_time);
        }

        Ok(cfg)
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            window_initial: 4,
            window_min: 2,
            window_max_slow: 10,
            window_max_very_slow: 4,
            window_max_fast: 75,
            window_flexibility: 4,

            rate_fast: (50 * 1000) as f64 / 8.0,
            rate_very_slow: (2 * 1000) as f64 / 8.0,
            very_slow_rate_threshold: 2,

            max_retries: 16,
            max_adv_retries: 4,
            part_timeout_factor: 4.0,
            part_timeout_factor_after_rtt: 2.0,
            proof_timeout_factor: 3.0,
            sender_grace_time: 10.0,
            processing_grace: 1.0,
            retry_grace_time: 0.25,
            per_retry_delay: 0.5,
            watchdog_max_sleep_ms: 1000,
        }
    }
}
