use std::time::Duration;

use crate::safekit_export;

/// Deployment environment of the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum SafekitEnvironment {
    /// Testnets are available next to mainnets.
    Staging,
    /// Mainnets only.
    Production,
}

impl SafekitEnvironment {
    /// Returns the string representation of the environment
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl std::fmt::Display for SafekitEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration passed explicitly to sessions and workflows.
///
/// ```swift
/// let config = SafekitConfig(environment: .production, confirmationTimeoutSecs: 300, pollIntervalMs: 4000)
/// ```
#[derive(Debug, Clone, uniffi::Object)]
pub struct SafekitConfig {
    environment: SafekitEnvironment,
    confirmation_timeout: Duration,
    poll_interval: Duration,
}

impl SafekitConfig {
    /// Default upper bound for waiting on a transaction receipt.
    pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 300;
    /// Default delay between two receipt polls.
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 4_000;

    /// Builds a configuration with arbitrary durations.
    #[must_use]
    pub const fn with_timeouts(
        environment: SafekitEnvironment,
        confirmation_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            environment,
            confirmation_timeout,
            poll_interval,
        }
    }

    /// Upper bound for the `confirmed` step of a workflow.
    #[must_use]
    pub const fn confirmation_timeout(&self) -> Duration {
        self.confirmation_timeout
    }

    /// Delay between two `eth_getTransactionReceipt` polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

#[safekit_export]
impl SafekitConfig {
    /// Creates a configuration. Zero values fall back to the defaults.
    #[uniffi::constructor]
    #[must_use]
    pub fn new(
        environment: SafekitEnvironment,
        confirmation_timeout_secs: u64,
        poll_interval_ms: u64,
    ) -> Self {
        let confirmation_timeout_secs = if confirmation_timeout_secs == 0 {
            Self::DEFAULT_CONFIRMATION_TIMEOUT_SECS
        } else {
            confirmation_timeout_secs
        };
        let poll_interval_ms = if poll_interval_ms == 0 {
            Self::DEFAULT_POLL_INTERVAL_MS
        } else {
            poll_interval_ms
        };
        crate::debug!(
            "config.created environment={environment} confirmation_timeout_secs={confirmation_timeout_secs} poll_interval_ms={poll_interval_ms}"
        );

        Self::with_timeouts(
            environment,
            Duration::from_secs(confirmation_timeout_secs),
            Duration::from_millis(poll_interval_ms),
        )
    }

    /// The configured environment.
    #[must_use]
    pub fn environment(&self) -> SafekitEnvironment {
        self.environment
    }

    /// The confirmation timeout in whole seconds.
    #[must_use]
    pub fn confirmation_timeout_secs(&self) -> u64 {
        self.confirmation_timeout.as_secs()
    }

    /// The poll interval in milliseconds.
    #[must_use]
    pub fn poll_interval_ms(&self) -> u64 {
        u64::try_from(self.poll_interval.as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for SafekitConfig {
    fn default() -> Self {
        Self::new(SafekitEnvironment::Production, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_display() {
        assert_eq!(SafekitEnvironment::Staging.as_str(), "staging");
        assert_eq!(SafekitEnvironment::Production.to_string(), "production");
    }

    #[test]
    fn test_zero_values_use_defaults() {
        let config = SafekitConfig::new(SafekitEnvironment::Staging, 0, 0);
        assert_eq!(
            config.confirmation_timeout_secs(),
            SafekitConfig::DEFAULT_CONFIRMATION_TIMEOUT_SECS
        );
        assert_eq!(config.poll_interval_ms(), SafekitConfig::DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.environment(), SafekitEnvironment::Staging);
    }

    #[test]
    fn test_explicit_values() {
        let config = SafekitConfig::new(SafekitEnvironment::Production, 60, 500);
        assert_eq!(config.confirmation_timeout(), Duration::from_secs(60));
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
    }
}
