//! Environment variable-based runtime configuration.
//!
//! ## Environment Variables
//!
//! ### `CARIBE_STACK_SIZE`
//!
//! Stack size for coroutine request handlers, decimal (`16384`) or
//! hexadecimal (`0x4000`). Default: `0x4000` (16 KB). Total memory is
//! stack_size x concurrent coroutines, so tune for handler depth versus
//! concurrency.
//!
//! ### `CARIBE_ASYNC_TIMEOUT_MS`
//!
//! Milliseconds an async hand-off may stay unresolved before the request is
//! force-completed with a 500. Default: `30000`.
//!
//! ### `CARIBE_PID_POLL_MS`
//!
//! Polling interval for the pid-file shutdown watcher. Default: `2000`.

use std::env;
use std::time::Duration;

const DEFAULT_STACK_SIZE: usize = 0x4000;
const DEFAULT_ASYNC_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_PID_POLL_MS: u64 = 2_000;

/// Async hand-offs unresolved past this are force-completed with a 500.
pub fn default_async_timeout() -> Duration {
    let ms = env::var("CARIBE_ASYNC_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_ASYNC_TIMEOUT_MS);
    Duration::from_millis(ms)
}

/// How often the host re-checks its pid file for shutdown.
pub fn pid_poll_interval() -> Duration {
    let ms = env::var("CARIBE_PID_POLL_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PID_POLL_MS);
    Duration::from_millis(ms)
}

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Stack size for request coroutines in bytes (default: 16 KB / 0x4000).
    pub stack_size: usize,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let stack_size = match env::var("CARIBE_STACK_SIZE") {
            Ok(val) => {
                if let Some(hex) = val.strip_prefix("0x") {
                    usize::from_str_radix(hex, 16).unwrap_or(DEFAULT_STACK_SIZE)
                } else {
                    val.parse().unwrap_or(DEFAULT_STACK_SIZE)
                }
            }
            Err(_) => DEFAULT_STACK_SIZE,
        };
        RuntimeConfig { stack_size }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_size_defaults_without_env() {
        // Runs without CARIBE_STACK_SIZE in the test environment.
        let config = RuntimeConfig::from_env();
        assert!(config.stack_size >= 0x1000);
    }
}
