//! Session re-establishment with exponential backoff and jitter

use std::future::Future;
use std::time::{Duration, Instant};

use common::ShutdownListener;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReconnectError {
    #[error("Maximum reconnection attempts exceeded")]
    MaxAttemptsExceeded,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Reconnection cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
    Reconnecting,
    /// Attempts exhausted
    Failed,
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// 0 means unlimited
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// ±25% of the computed delay
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(
        max_attempts: u32,
        initial_delay_ms: u64,
        max_delay_ms: u64,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            backoff_multiplier,
            jitter: true,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ReconnectStats {
    pub total_attempts: u64,
    pub successful: u64,
    pub failed: u64,
    pub last_connected: Option<Instant>,
}

#[derive(Debug)]
pub struct ReconnectHelper {
    policy: ReconnectPolicy,
    attempt: u32,
    state: LinkState,
    stats: ReconnectStats,
}

impl ReconnectHelper {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            state: LinkState::Disconnected,
            stats: ReconnectStats::default(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn stats(&self) -> &ReconnectStats {
        &self.stats
    }

    /// Delay before the current attempt: `initial * multiplier^(attempt-1)`, capped
    pub fn calculate_next_delay(&self) -> Duration {
        let exponent = self.attempt.saturating_sub(1).min(32) as i32;
        let mut delay = self
            .policy
            .initial_delay
            .mul_f64(self.policy.backoff_multiplier.powi(exponent))
            .min(self.policy.max_delay);

        if self.policy.jitter {
            let range = delay.as_millis() as f64 * 0.25;
            if range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-range..range);
                delay = Duration::from_millis((delay.as_millis() as f64 + jitter).max(0.0) as u64);
            }
        }
        delay
    }

    /// Run one attempt, sleeping the backoff delay first unless it is the first
    pub async fn execute_reconnect<F, Fut, E>(
        &mut self,
        mut connect_fn: F,
    ) -> Result<(), ReconnectError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        if self.policy.max_attempts > 0 && self.attempt >= self.policy.max_attempts {
            self.state = LinkState::Failed;
            warn!(
                "Maximum reconnection attempts ({}) exceeded",
                self.policy.max_attempts
            );
            return Err(ReconnectError::MaxAttemptsExceeded);
        }

        self.state = LinkState::Reconnecting;
        self.attempt += 1;
        self.stats.total_attempts += 1;

        if self.attempt > 1 {
            let delay = self.calculate_next_delay();
            info!("Waiting {:?} before attempt {}", delay, self.attempt);
            tokio::time::sleep(delay).await;
        }

        let started = Instant::now();
        match connect_fn().await {
            Ok(()) => {
                info!(
                    "Connected after {:?} (attempt {})",
                    started.elapsed(),
                    self.attempt
                );
                self.state = LinkState::Connected;
                self.attempt = 0;
                self.stats.successful += 1;
                self.stats.last_connected = Some(Instant::now());
                Ok(())
            },
            Err(e) => {
                warn!("Attempt {} failed: {}", self.attempt, e);
                self.stats.failed += 1;
                self.state = if self.policy.max_attempts == 0
                    || self.attempt < self.policy.max_attempts
                {
                    LinkState::Disconnected
                } else {
                    LinkState::Failed
                };
                Err(ReconnectError::ConnectionFailed(e.to_string()))
            },
        }
    }

    /// Retry until connected, attempts run out, or shutdown is requested
    pub async fn run_until_connected<F, Fut, E>(
        &mut self,
        mut connect_fn: F,
        shutdown: &mut ShutdownListener,
    ) -> Result<(), ReconnectError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        loop {
            if shutdown.is_triggered() {
                return Err(ReconnectError::Cancelled);
            }
            let attempt = self.execute_reconnect(&mut connect_fn);
            tokio::select! {
                _ = shutdown.wait() => {
                    debug!("Reconnection cancelled by shutdown");
                    return Err(ReconnectError::Cancelled);
                }
                result = attempt => match result {
                    Ok(()) => return Ok(()),
                    Err(ReconnectError::ConnectionFailed(_)) => continue,
                    Err(e) => return Err(e),
                },
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use common::ShutdownTrigger;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fixed_policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_exponential_backoff_capped() {
        let mut helper = ReconnectHelper::new(fixed_policy(10));
        let expected = [100, 200, 400, 500, 500];
        for (i, ms) in expected.iter().enumerate() {
            helper.attempt = i as u32 + 1;
            assert_eq!(helper.calculate_next_delay(), Duration::from_millis(*ms));
        }
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut policy = fixed_policy(0);
        policy.jitter = true;
        let mut helper = ReconnectHelper::new(policy);
        helper.attempt = 2;
        for _ in 0..50 {
            let d = helper.calculate_next_delay().as_millis();
            assert!((150..=250).contains(&d), "delay {d}");
        }
    }

    #[tokio::test]
    async fn test_max_attempts() {
        let mut helper = ReconnectHelper::new(ReconnectPolicy {
            initial_delay: Duration::from_millis(1),
            ..fixed_policy(2)
        });
        let failing = || async { Err::<(), _>("no carrier") };

        assert!(helper.execute_reconnect(failing).await.is_err());
        assert!(helper.execute_reconnect(failing).await.is_err());
        assert_eq!(helper.state(), LinkState::Failed);
        assert_eq!(
            helper.execute_reconnect(failing).await,
            Err(ReconnectError::MaxAttemptsExceeded)
        );
        assert_eq!(helper.stats().failed, 2);
    }

    #[tokio::test]
    async fn test_run_until_connected_retries() {
        let mut helper = ReconnectHelper::new(ReconnectPolicy {
            initial_delay: Duration::from_millis(1),
            ..fixed_policy(0)
        });
        let calls = AtomicU32::new(0);
        let (_trigger, mut listener) = ShutdownTrigger::new();

        let result = helper
            .run_until_connected(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err("not yet")
                        } else {
                            Ok(())
                        }
                    }
                },
                &mut listener,
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(helper.state(), LinkState::Connected);
        assert_eq!(helper.stats().successful, 1);
    }

    #[tokio::test]
    async fn test_run_until_connected_cancelled() {
        let mut helper = ReconnectHelper::new(fixed_policy(0));
        let (trigger, mut listener) = ShutdownTrigger::new();
        trigger.trigger();
        let result = helper
            .run_until_connected(|| async { Err::<(), _>("down") }, &mut listener)
            .await;
        assert_eq!(result, Err(ReconnectError::Cancelled));
    }
}
