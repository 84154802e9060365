//! Retry-until-done utility used for payment status polling.
//!
//! Sleeping goes through the [`Sleeper`] trait so tests can run the loop without
//! real timers, and a [`CancellationFlag`] lets the caller stop polling early.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Interval and attempt budget for a polling loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Growth factor applied to the interval after each attempt. 1.0 keeps it fixed.
    pub backoff_multiplier: f64,
    pub max_interval: Duration,
}

impl PollPolicy {
    /// Every 2 seconds, 30 attempts.
    pub fn standard() -> Self {
        Self::fixed(Duration::from_secs(2), 30)
    }

    /// Every 3 seconds, 15 attempts.
    pub fn relaxed() -> Self {
        Self::fixed(Duration::from_secs(3), 15)
    }

    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            backoff_multiplier: 1.0,
            max_interval: interval,
        }
    }

    pub fn with_backoff(mut self, multiplier: f64, max_interval: Duration) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self.max_interval = max_interval.max(self.interval);
        self
    }

    /// Delay before the given attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let scaled = self.interval.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_interval.as_secs_f64() {
            self.max_interval
        } else {
            Duration::from_secs_f64(scaled)
        }
    }

    /// Upper bound on the time spent sleeping across the whole loop.
    pub fn total_budget(&self) -> Duration {
        (1..=self.max_attempts).map(|a| self.delay_for(a)).sum()
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real timer backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Shared flag that stops a polling loop at its next await point.
///
/// Cancelling only stops further polling. Anything already sent to the provider is
/// unaffected.
#[derive(Debug, Clone)]
pub struct CancellationFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum PollError<E> {
    #[error("No terminal result after {attempts} attempts")]
    Exhausted { attempts: u32, last_error: Option<E> },

    #[error("Polling cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Value that satisfied the stop condition and the attempt that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Polled<T> {
    pub value: T,
    pub attempts: u32,
}

/// Calls `op` until `is_done` accepts its result, sleeping before every call.
///
/// Errors from `op` are treated as transient: they are logged and polling continues
/// until the attempt budget runs out. The loop never issues more than
/// `policy.max_attempts` calls and never calls `op` again once `is_done` returns true.
pub async fn poll_until<T, E, F, Fut, D>(
    policy: &PollPolicy,
    sleeper: &dyn Sleeper,
    cancel: &CancellationFlag,
    mut op: F,
    mut is_done: D,
) -> Result<Polled<T>, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    D: FnMut(&T) -> bool,
    E: std::fmt::Display,
{
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts {
        let completed = attempt - 1;
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled {
                attempts: completed,
            });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(PollError::Cancelled { attempts: completed });
            }
            _ = sleeper.sleep(policy.delay_for(attempt)) => {}
        }

        if cancel.is_cancelled() {
            return Err(PollError::Cancelled {
                attempts: completed,
            });
        }

        match op(attempt).await {
            Ok(value) if is_done(&value) => {
                debug!(attempt, "Polling reached a terminal result");
                return Ok(Polled {
                    value,
                    attempts: attempt,
                });
            }
            Ok(_) => {
                debug!(attempt, max_attempts = policy.max_attempts, "Still pending");
                last_error = None;
            }
            Err(err) => {
                warn!(attempt, error = %err, "Poll attempt failed, will retry");
                last_error = Some(err);
            }
        }
    }

    Err(PollError::Exhausted {
        attempts: policy.max_attempts,
        last_error,
    })
}
