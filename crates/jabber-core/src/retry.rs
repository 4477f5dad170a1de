//! Exponential backoff with jitter, and a generic retry wrapper

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Fraction of the computed delay that jitter may add or remove
const JITTER_FRACTION: f64 = 0.25;

/// Backoff parameters for a class of retried operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    #[serde(with = "duration_secs")]
    pub initial_delay: Duration,
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Parameters used when re-establishing a dropped chat connection
    pub fn reconnect() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(120),
            ..Self::default()
        }
    }

    /// Same parameters with jitter turned off
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }
}

/// Delay to wait before attempt number `attempt` (zero-based)
pub fn delay(attempt: u32, config: &RetryConfig) -> Duration {
    delay_with_rng(attempt, config, &mut fastrand::Rng::new())
}

/// Like [`delay`] with an explicit random source
pub fn delay_with_rng(attempt: u32, config: &RetryConfig, rng: &mut fastrand::Rng) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let base = config.initial_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    let secs = if config.jitter {
        let factor = 1.0 + (rng.f64() * 2.0 - 1.0) * JITTER_FRACTION;
        capped * factor
    } else {
        capped
    };

    if !secs.is_finite() {
        return config.max_delay;
    }
    Duration::from_secs_f64(secs.max(0.0))
}

/// Run `operation` until it succeeds or `config.max_attempts` is used up
///
/// The error of the final attempt is returned unchanged. Dropping the
/// returned future cancels any pending backoff sleep.
pub async fn retry_with_backoff<T, E, F, Fut>(
    operation: F,
    config: &RetryConfig,
    label: &str,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_with_backoff_while(operation, config, label, |_| true).await
}

/// Like [`retry_with_backoff`], stopping early on errors `should_retry` rejects
pub async fn retry_with_backoff_while<T, E, F, Fut, P>(
    mut operation: F,
    config: &RetryConfig,
    label: &str,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        let wait = delay(attempt, config);
        if !wait.is_zero() {
            debug!("{}: waiting {:.2}s before attempt {}", label, wait.as_secs_f64(), attempt + 1);
            tokio::time::sleep(wait).await;
        }

        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!("{} succeeded on attempt {}/{}", label, attempt + 1, max_attempts);
                }
                return Ok(value);
            }
            Err(e) => {
                attempt += 1;
                if !should_retry(&e) {
                    warn!("{} failed with a non-retryable error: {}", label, e);
                    return Err(e);
                }
                if attempt >= max_attempts {
                    warn!("{} failed after {} attempts: {}", label, max_attempts, e);
                    return Err(e);
                }
                warn!("{} failed (attempt {}/{}): {}", label, attempt, max_attempts, e);
            }
        }
    }
}

/// Serde adapter writing a `Duration` as fractional seconds
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| D::Error::custom(format!("invalid duration {}: {}", secs, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter(initial: f64, mult: f64, max: f64) -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_secs_f64(initial),
            max_delay: Duration::from_secs_f64(max),
            backoff_multiplier: mult,
            jitter: false,
        }
    }

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.backoff_multiplier, 2.0);
        assert!(config.jitter);

        let reconnect = RetryConfig::reconnect();
        assert_eq!(reconnect.max_attempts, 5);
        assert_eq!(reconnect.initial_delay, Duration::from_secs(3));
        assert_eq!(reconnect.max_delay, Duration::from_secs(120));
    }

    #[test]
    fn test_first_attempt_has_no_delay() {
        assert_eq!(delay(0, &RetryConfig::default()), Duration::ZERO);
        assert_eq!(delay(0, &no_jitter(5.0, 3.0, 60.0)), Duration::ZERO);
    }

    #[test]
    fn test_exponential_growth_and_cap() {
        let config = no_jitter(1.0, 2.0, 10.0);
        assert_eq!(delay(1, &config), Duration::from_secs(1));
        assert_eq!(delay(2, &config), Duration::from_secs(2));
        assert_eq!(delay(3, &config), Duration::from_secs(4));

        let capped = no_jitter(1.0, 2.0, 5.0);
        assert_eq!(delay(4, &capped), Duration::from_secs(5));
        assert_eq!(delay(u32::MAX, &capped), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(4),
            ..RetryConfig::default()
        };
        let mut rng = fastrand::Rng::with_seed(7);
        let samples: Vec<Duration> = (0..10)
            .map(|_| delay_with_rng(1, &config, &mut rng))
            .collect();

        for sample in &samples {
            assert!(*sample <= Duration::from_secs_f64(1.25 * 4.0));
            assert!(*sample >= Duration::from_secs_f64(0.75 * 4.0));
        }
        assert!(samples.iter().any(|s| *s != samples[0]));
    }

    #[test]
    fn test_config_round_trips_as_seconds() {
        let config = no_jitter(1.5, 2.0, 10.0);
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("initial_delay = 1.5"));

        let back: RetryConfig = toml::from_str("max_attempts = 7\ninitial_delay = 0.25\n").unwrap();
        assert_eq!(back.max_attempts, 7);
        assert_eq!(back.initial_delay, Duration::from_millis(250));
        assert_eq!(back.max_delay, Duration::from_secs(30));

        assert!(toml::from_str::<RetryConfig>("initial_delay = -1.0").is_err());
        assert!(toml::from_str::<RetryConfig>("max_delay = 1e30").is_err());
        assert!(toml::from_str::<RetryConfig>("max_delay = inf").is_err());
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<&str, String> = retry_with_backoff(
            || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 { Err(format!("failure {}", n)) } else { Ok("done") }
                }
            },
            &fast(3),
            "flaky operation",
        )
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = retry_with_backoff(
            || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    Err(format!("failure {}", n))
                }
            },
            &fast(4),
            "always failing",
        )
        .await;

        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = retry_with_backoff(
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("nope".to_string())
                }
            },
            &fast(0),
            "single shot",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_early() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), String> = retry_with_backoff_while(
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("auth".to_string())
                }
            },
            &fast(5),
            "login",
            |e| e != "auth",
        )
        .await;

        assert_eq!(result, Err("auth".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_backoff_sleep() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 1.0,
            jitter: false,
        };

        let task = tokio::spawn(async move {
            retry_with_backoff(
                || async { Err::<(), _>("down".to_string()) },
                &config,
                "slow",
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        task.abort();
        let joined = task.await;
        assert!(joined.unwrap_err().is_cancelled());
    }
}
