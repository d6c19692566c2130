//! Supervision policies
//!

use crate::{ActorId, Error};

use serde::{Deserialize, Serialize};

use backoff::backoff::Backoff as InnerBackoff;

use std::{
    fmt::Debug,
    sync::{Arc, Mutex},
    time::Duration,
};

/// What the supervisor does with an actor after a crash.
///
/// A crash is a failed `pre_start` or a failed message handler; an explicit
/// destroy is never restarted. With `None` a handler failure is isolated:
/// the error goes to the caller (and the supervisor log) and the actor keeps
/// its state and continues. With a restart policy the actor is recreated
/// under the same id with fresh state; its references stay valid across the
/// restart.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub enum RestartPolicy {
    /// Never restart. Handler failures are isolated; startup failures
    /// terminate the actor.
    #[default]
    None,
    /// Restart after any crash, including a failed `pre_start`.
    Always,
    /// Restart only after a handler failure; a failed `pre_start`
    /// terminates the actor.
    OnFailureOnly,
}

/// Trait to define a RetryStrategy. You can use this trait to define your
/// custom retry pacing for actor restarts.
pub trait RetryStrategy: Debug + Send + Sync {
    /// Maximum number of restart attempts before permanently failing an actor
    fn max_retries(&self) -> usize;
    /// Wait duration before the next restart attempt
    fn next_backoff(&mut self) -> Option<Duration>;
}

/// A retry strategy that immediately restarts an actor without waiting.
#[derive(Debug, Default)]
pub struct NoIntervalStrategy {
    max_retries: usize,
}

impl NoIntervalStrategy {
    pub fn new(max_retries: usize) -> Self {
        NoIntervalStrategy { max_retries }
    }
}

impl RetryStrategy for NoIntervalStrategy {
    fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        None
    }
}

/// A retry strategy that restarts an actor with a fixed wait period between
/// attempts.
#[derive(Debug, Default)]
pub struct FixedIntervalStrategy {
    /// Maximum number of retries before permanently failing an actor.
    max_retries: usize,
    /// Wait duration before retrying.
    duration: Duration,
}

impl FixedIntervalStrategy {
    pub fn new(max_retries: usize, duration: Duration) -> Self {
        FixedIntervalStrategy {
            max_retries,
            duration,
        }
    }
}

impl RetryStrategy for FixedIntervalStrategy {
    fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        Some(self.duration)
    }
}

/// A retry strategy that restarts an actor with an exponential backoff wait
/// period between attempts.
#[derive(Debug, Default)]
pub struct ExponentialBackoffStrategy {
    /// Maximum number of retries before permanently failing an actor.
    max_retries: usize,
    /// Inner exponential backoff strategy.
    inner: Arc<Mutex<backoff::ExponentialBackoff>>,
}

impl ExponentialBackoffStrategy {
    pub fn new(max_retries: usize) -> Self {
        ExponentialBackoffStrategy {
            max_retries,
            inner: Arc::new(Mutex::new(backoff::ExponentialBackoff::default())),
        }
    }
}

impl RetryStrategy for ExponentialBackoffStrategy {
    fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.inner.lock().ok().and_then(|mut eb| eb.next_backoff())
    }
}

/// The reason an actor terminated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// The actor stopped normally: explicit destroy or pool teardown.
    Stopped,
    /// The actor crashed and its restart policy gave up (or forbade
    /// restarting).
    Failed(Error),
}

/// Terminal event delivered to watchers when an actor stops.
///
/// Exactly one terminal event is published per actor lifetime; a restart is
/// not terminal, only the final stop or the moment the restart policy gives
/// up.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Termination {
    /// Id of the terminated actor.
    pub id: ActorId,
    /// Why it terminated.
    pub reason: TerminationReason,
}

impl Termination {
    /// True if the actor ended by failure rather than a normal stop.
    pub fn is_failure(&self) -> bool {
        matches!(self.reason, TerminationReason::Failed(_))
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_no_interval_strategy() {
        let mut strategy = NoIntervalStrategy::new(3);
        assert_eq!(strategy.max_retries(), 3);
        assert_eq!(strategy.next_backoff(), None);
    }

    #[test]
    fn test_fixed_interval_strategy() {
        let mut strategy =
            FixedIntervalStrategy::new(3, Duration::from_secs(1));
        assert_eq!(strategy.max_retries(), 3);
        assert_eq!(strategy.next_backoff(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_exponential_backoff_strategy() {
        let mut strategy = ExponentialBackoffStrategy::new(3);
        assert_eq!(strategy.max_retries(), 3);
        assert!(strategy.next_backoff().is_some());
    }

    #[test]
    fn test_termination_reason() {
        let stopped = Termination {
            id: ActorId::from("a"),
            reason: TerminationReason::Stopped,
        };
        assert!(!stopped.is_failure());
        let failed = Termination {
            id: ActorId::from("a"),
            reason: TerminationReason::Failed(Error::Stop),
        };
        assert!(failed.is_failure());
    }
}
