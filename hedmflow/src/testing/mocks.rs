//! Mock command executors for testing.

use crate::errors::{HedmflowError, StageExecutionError};
use crate::executor::{CommandExecutor, Invocation};
use crate::stages::StageKind;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// A mock executor that records invocations in call order.
///
/// Successful invocations materialize their mapped stdout file (empty), so
/// join barriers behave as they would against real processes. Specific
/// `(stage, node)` pairs can be configured to fail, and an artificial delay
/// can be applied to every invocation.
#[derive(Debug, Default)]
pub struct MockExecutor {
    calls: Mutex<Vec<Invocation>>,
    failures: Mutex<HashMap<(StageKind, Option<u32>), String>>,
    delay: Mutex<Option<Duration>>,
}

impl MockExecutor {
    /// Creates a new mock executor where every invocation succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the given `(stage, node)` invocation to fail.
    pub fn fail_on(&self, stage: StageKind, node: Option<u32>, detail: impl Into<String>) {
        self.failures.lock().insert((stage, node), detail.into());
    }

    /// Applies an artificial delay to every invocation.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Returns all recorded invocations, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    /// Returns the recorded stage kinds, in call order.
    #[must_use]
    pub fn stages_invoked(&self) -> Vec<StageKind> {
        self.calls.lock().iter().map(|c| c.stage).collect()
    }

    /// Returns the number of recorded invocations.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns how many invocations of the given stage were recorded.
    #[must_use]
    pub fn count_for(&self, stage: StageKind) -> usize {
        self.calls.lock().iter().filter(|c| c.stage == stage).count()
    }

    /// Clears recorded invocations.
    pub fn reset(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl CommandExecutor for MockExecutor {
    async fn run(&self, invocation: &Invocation) -> Result<(), HedmflowError> {
        self.calls.lock().push(invocation.clone());

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .failures
            .lock()
            .get(&(invocation.stage, invocation.node))
            .cloned();
        if let Some(detail) = failure {
            return Err(
                StageExecutionError::new(invocation.stage, invocation.node, detail).into(),
            );
        }

        if let Some(parent) = invocation.stdout_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&invocation.stdout_path, b"").await?;
        Ok(())
    }
}
