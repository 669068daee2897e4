#![forbid(unsafe_code)]

//! Runtime configuration.
//!
//! Defaults flush on the first [`poll`](crate::Runtime::poll) after a write
//! (zero-length coalescing window). Environment variables override the
//! defaults when the global runtime is created lazily:
//!
//! | variable                   | field              |
//! |----------------------------|--------------------|
//! | `OBSERVA_COALESCE_MS`      | `coalesce_window`  |
//! | `OBSERVA_MAX_FLUSH_ROUNDS` | `max_flush_rounds` |

use std::env;

use web_time::Duration;

use crate::scheduler::Clock;

/// Configuration for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Quiet period after the last write before a flush becomes due.
    /// Every new write rearms it (trailing edge). Default: zero.
    pub coalesce_window: Duration,

    /// Upper bound on flush rounds in
    /// [`run_until_idle`](crate::Runtime::run_until_idle). Default: 100.
    pub max_flush_rounds: usize,

    /// Time source used to arm the coalescing deadline.
    pub clock: Clock,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            coalesce_window: Duration::ZERO,
            max_flush_rounds: 100,
            clock: Clock::System,
        }
    }
}

impl RuntimeConfig {
    /// Defaults with environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Apply `OBSERVA_*` environment overrides. Unparseable values are ignored.
    #[must_use]
    pub fn apply_env(mut self) -> Self {
        if let Ok(val) = env::var("OBSERVA_COALESCE_MS")
            && let Ok(ms) = val.trim().parse::<u64>()
        {
            self.coalesce_window = Duration::from_millis(ms);
        }
        if let Ok(val) = env::var("OBSERVA_MAX_FLUSH_ROUNDS")
            && let Ok(n) = val.trim().parse::<usize>()
            && n > 0
        {
            self.max_flush_rounds = n;
        }
        self
    }

    #[must_use]
    pub fn with_coalesce_window(mut self, window: Duration) -> Self {
        self.coalesce_window = window;
        self
    }

    #[must_use]
    pub fn with_max_flush_rounds(mut self, rounds: usize) -> Self {
        self.max_flush_rounds = rounds.max(1);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}
