//! Bounded retry envelope around resolution and interaction.
//!
//! Two independent budgets apply to one dispatched request:
//!
//! * one re-snapshot, spent either on a failed resolution (`NotFound`,
//!   `AmbiguousMatch`) or on a locator that went stale between snapshot and
//!   interaction;
//! * exponential backoff for elements that exist but are not usable yet,
//!   up to `max_attempts` tries.
//!
//! Navigation-class verbs never pass through here.

use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::RecoveryConfig;
use crate::dom::SnapshotSource;
use crate::error::{DriverError, ErrorKind, InteractError, ResolveError};
use crate::resolver::Resolve;
use crate::types::{ElementDescriptor, PageSnapshot, TargetSpec};

/// Why a recovered call still failed.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Interact(#[from] InteractError),

    #[error("could not rebuild snapshot: {0}")]
    Snapshot(DriverError),
}

impl RecoveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecoveryError::Resolve(err) => err.kind(),
            RecoveryError::Interact(err) => err.kind(),
            RecoveryError::Snapshot(err) => err.kind(),
        }
    }

    pub fn detail(&self) -> String {
        match self {
            RecoveryError::Resolve(err) => err.detail(),
            other => other.to_string(),
        }
    }
}

/// Outcome of a recovered element action.
#[derive(Debug)]
pub struct Recovered<T> {
    pub value: T,
    pub element: ElementDescriptor,
    /// True when the snapshot was rebuilt along the way.
    pub refreshed: bool,
}

#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    config: RecoveryConfig,
}

impl RecoveryPolicy {
    pub fn new(config: RecoveryConfig) -> Self {
        Self { config }
    }

    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base, …
    /// capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let ms = self
            .config
            .base_backoff_ms
            .saturating_mul(factor)
            .min(self.config.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Run `op` again while it fails with a transient error, sleeping the
    /// backoff in between, for at most `max_attempts` tries in total.
    pub fn with_backoff<T, F>(&self, mut op: F) -> Result<T, InteractError>
    where
        F: FnMut() -> Result<T, InteractError>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient interaction failure, backing off"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Resolve `target` against `snapshot` and apply `act` to the element.
    ///
    /// `snapshot` is replaced in place when a rebuild happens so the caller
    /// keeps the catalogue the element came from.
    pub fn run<T, A>(
        &self,
        target: &TargetSpec,
        resolver: &dyn Resolve,
        source: &dyn SnapshotSource,
        snapshot: &mut PageSnapshot,
        mut act: A,
    ) -> Result<Recovered<T>, RecoveryError>
    where
        A: FnMut(&ElementDescriptor) -> Result<T, InteractError>,
    {
        let mut refreshed = false;
        let mut wanted = target.clone();

        loop {
            let element = match resolver.resolve(&wanted, snapshot) {
                Ok(element) => element,
                Err(err) if !refreshed => {
                    info!(%target, error = %err, "resolution failed, re-snapshotting once");
                    *snapshot = source.build_snapshot().map_err(RecoveryError::Snapshot)?;
                    refreshed = true;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            match self.with_backoff(|| act(&element)) {
                Ok(value) => {
                    return Ok(Recovered {
                        value,
                        element,
                        refreshed,
                    });
                }
                Err(InteractError::Detached { id }) if !refreshed => {
                    info!(id, "element went stale, re-snapshotting once");
                    *snapshot = source.build_snapshot().map_err(RecoveryError::Snapshot)?;
                    refreshed = true;
                    // IDs of the new snapshot are unrelated to the old one, so
                    // look the element up again by what it looked like.
                    wanted = identity_of(&element).unwrap_or_else(|| target.clone());
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Structured target describing a known element, when it carries a label.
fn identity_of(element: &ElementDescriptor) -> Option<TargetSpec> {
    let label = element.label();
    (label != element.kind.as_str()).then(|| TargetSpec::ByStructured {
        kind: Some(element.kind),
        text: Some(label.to_string()),
        attributes: Default::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecoveryConfig;

    fn policy(max_attempts: u32) -> RecoveryPolicy {
        RecoveryPolicy::new(RecoveryConfig {
            max_attempts,
            base_backoff_ms: 1,
            max_backoff_ms: 2,
        })
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RecoveryPolicy::new(RecoveryConfig::default());
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(10), Duration::from_millis(5_000));
    }

    #[test]
    fn transient_failures_retry_up_to_ceiling() {
        let mut calls = 0;
        let result: Result<(), _> = policy(3).with_backoff(|| {
            calls += 1;
            Err(InteractError::NotInteractable {
                id: 1,
                reason: "covered".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn transient_failure_then_success() {
        let mut calls = 0;
        let result = policy(4).with_backoff(|| {
            calls += 1;
            if calls < 3 {
                Err(InteractError::NotInteractable {
                    id: 1,
                    reason: "animating".to_string(),
                })
            } else {
                Ok("done")
            }
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls, 3);
    }

    #[test]
    fn permanent_failures_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = policy(4).with_backoff(|| {
            calls += 1;
            Err(InteractError::Invalid("bad combo".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
