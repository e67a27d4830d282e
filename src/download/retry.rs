//! When and how long to wait before saving a file again.
//!
//! A failed save is first mapped to a [`FailureType`] by [`classify_error`].
//! The [`RetryPolicy`] then either schedules another attempt after a doubling
//! backoff with random jitter, or gives up with a [`GiveUp`] reason.
//!
//! ```
//! use politodown::PortalError;
//! use politodown::download::{RetryDecision, RetryPolicy, classify_error};
//!
//! let policy = RetryPolicy::with_max_retries(2);
//! let error = PortalError::http_status("https://didattica.polito.it/x", 503);
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => println!("attempt {attempt} in {delay:?}"),
//!     RetryDecision::GiveUp(reason) => println!("giving up: {reason}"),
//! }
//! ```

use std::fmt;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use crate::error::PortalError;

/// Retries after the first attempt when nothing else is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const FIRST_BACKOFF: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(32);
const JITTER_CAP_MS: u64 = 500;

/// How a failed save is expected to behave if tried again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Network trouble, timeouts, and 5xx answers.
    Transient,
    /// Missing documents, unexpected pages, and local IO errors.
    Permanent,
    /// The login was rejected or no credentials were set.
    NeedsAuth,
    /// HTTP 429.
    RateLimited,
}

/// Why a save is not tried again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUp {
    /// The failure would repeat.
    Permanent,
    /// The session cannot authenticate.
    NeedsAuth,
    /// Every allowed attempt was used.
    Exhausted {
        /// Attempts made, the first one included.
        attempts: u32,
    },
}

impl fmt::Display for GiveUp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permanent => f.write_str("permanent failure"),
            Self::NeedsAuth => f.write_str("authentication required"),
            Self::Exhausted { attempts } => write!(f, "gave up after {attempts} attempts"),
        }
    }
}

/// Outcome of [`RetryPolicy::should_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then make attempt number `attempt` (1-indexed).
    Retry { delay: Duration, attempt: u32 },
    /// Stop and report the last error.
    GiveUp(GiveUp),
}

/// Attempt budget and backoff schedule.
///
/// The wait before attempt `n + 1` is `first_backoff * 2^(n - 1)`, capped at
/// `backoff_cap`, plus up to 500 ms of jitter: about 1 s, 2 s, 4 s with the
/// defaults.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    first_backoff: Duration,
    backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_max_retries(DEFAULT_MAX_RETRIES)
    }
}

impl RetryPolicy {
    /// A policy with an explicit schedule. `max_attempts` counts the first
    /// attempt and is raised to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, first_backoff: Duration, backoff_cap: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            first_backoff,
            backoff_cap,
        }
    }

    /// Allows `max_retries` more attempts after the first one.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self::new(max_retries.saturating_add(1), FIRST_BACKOFF, BACKOFF_CAP)
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides what follows the failure of attempt number `attempt`.
    #[instrument(level = "debug", skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        let reason = match failure_type {
            FailureType::Permanent => Some(GiveUp::Permanent),
            FailureType::NeedsAuth => Some(GiveUp::NeedsAuth),
            FailureType::Transient | FailureType::RateLimited
                if attempt >= self.max_attempts =>
            {
                Some(GiveUp::Exhausted { attempts: attempt })
            }
            FailureType::Transient | FailureType::RateLimited => None,
        };
        if let Some(reason) = reason {
            debug!(%reason, "not retrying");
            return RetryDecision::GiveUp(reason);
        }

        let delay = self.backoff(attempt) + jitter();
        debug!(delay_ms = delay.as_millis(), "retry scheduled");
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Backoff without jitter after attempt `attempt` failed.
    fn backoff(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1);
        2u32.checked_pow(doublings)
            .and_then(|factor| self.first_backoff.checked_mul(factor))
            .map_or(self.backoff_cap, |delay| delay.min(self.backoff_cap))
    }
}

fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..=JITTER_CAP_MS))
}

/// Maps a save error to its [`FailureType`].
///
/// Timeouts and network errors are transient, except TLS failures.
/// Login problems need authentication. HTTP statuses go by code: 401 needs
/// authentication, 408 and 5xx are transient, 429 is rate limiting, and other
/// codes (403 included, the portal's answer for removed documents) are
/// permanent. Everything else is permanent.
#[must_use]
pub fn classify_error(error: &PortalError) -> FailureType {
    match error {
        PortalError::HttpStatus { status, .. } => match *status {
            401 => FailureType::NeedsAuth,
            408 | 500..=599 => FailureType::Transient,
            429 => FailureType::RateLimited,
            _ => FailureType::Permanent,
        },
        PortalError::Timeout { .. } => FailureType::Transient,
        PortalError::Network { source, .. } if !looks_like_tls(source) => FailureType::Transient,
        PortalError::Login { .. } | PortalError::NotSignedIn => FailureType::NeedsAuth,
        _ => FailureType::Permanent,
    }
}

fn looks_like_tls(error: &reqwest::Error) -> bool {
    let message = error.to_string().to_lowercase();
    ["certificate", "tls", "ssl"]
        .iter()
        .any(|needle| message.contains(needle))
}
