use crate::constants::{buffers, limits, network, retry};
use crate::utils::feature_flags::{env_flag, env_positive_u64};
use rand::Rng;
use std::time::Duration;

/// Connect-step retry. One attempt means no retry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: retry::MAX_ATTEMPTS,
            base_delay_ms: retry::BASE_DELAY_MS,
            max_delay_ms: retry::MAX_DELAY_MS,
            jitter: retry::JITTER,
        }
    }
}

impl RetryPolicy {
    pub fn attempts(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Exponential backoff for the delay after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exp = attempt.saturating_sub(1).min(16) as u32;
        let base = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        if self.jitter <= 0.0 || base == 0 {
            return Duration::from_millis(base);
        }
        let spread = (base as f64 * self.jitter) as i64;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis((base as i64 + offset).max(0) as u64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub connect_timeout_ms: u64,
    pub command_timeout_ms: Option<u64>,
    pub io_timeout_ms: u64,
    pub max_capture_bytes: usize,
    pub transfer_chunk_bytes: usize,
    pub log_command_output: bool,
    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: network::TIMEOUT_CONNECT_MS,
            command_timeout_ms: Some(network::TIMEOUT_COMMAND_MS),
            io_timeout_ms: network::TIMEOUT_IO_MS,
            max_capture_bytes: limits::MAX_CAPTURE_BYTES,
            transfer_chunk_bytes: buffers::TRANSFER_CHUNK_SIZE,
            log_command_output: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl Settings {
    /// Defaults overridden by `PROVISIONER_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut retry = defaults.retry;
        if let Some(attempts) = env_positive_u64("PROVISIONER_CONNECT_ATTEMPTS") {
            retry.max_attempts = attempts as usize;
        }
        if let Some(delay) = env_positive_u64("PROVISIONER_RETRY_BASE_DELAY_MS") {
            retry.base_delay_ms = delay;
        }
        Self {
            connect_timeout_ms: env_positive_u64("PROVISIONER_CONNECT_TIMEOUT_MS")
                .unwrap_or(defaults.connect_timeout_ms),
            command_timeout_ms: env_positive_u64("PROVISIONER_COMMAND_TIMEOUT_MS")
                .or(defaults.command_timeout_ms),
            io_timeout_ms: env_positive_u64("PROVISIONER_IO_TIMEOUT_MS")
                .unwrap_or(defaults.io_timeout_ms),
            max_capture_bytes: env_positive_u64("PROVISIONER_MAX_CAPTURE_BYTES")
                .map(|v| v as usize)
                .unwrap_or(defaults.max_capture_bytes),
            transfer_chunk_bytes: env_positive_u64("PROVISIONER_TRANSFER_CHUNK_BYTES")
                .map(|v| (v as usize).clamp(1024, 4 * 1024 * 1024))
                .unwrap_or(defaults.transfer_chunk_bytes),
            log_command_output: env_flag("PROVISIONER_LOG_COMMAND_OUTPUT", true),
            retry,
        }
    }
}
