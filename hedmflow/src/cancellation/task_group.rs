//! Task group for running one fan-out stage's node invocations.

use super::CancellationToken;
use crate::errors::HedmflowError;
use crate::stages::StageResult;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A group of per-node tasks with fail-fast cancellation.
///
/// The first task error cancels the shared token; tasks that have not yet
/// started their invocation observe the token and back out, while in-flight
/// invocations are awaited. `wait` returns results in spawn order.
pub struct NodeTaskGroup {
    /// The cancellation token shared by all tasks in the group.
    cancel_token: Arc<CancellationToken>,
    /// Handles to spawned tasks, in spawn order.
    handles: Mutex<Vec<JoinHandle<Result<StageResult, HedmflowError>>>>,
}

impl NodeTaskGroup {
    /// Creates a task group sharing the given token.
    #[must_use]
    pub fn new(cancel_token: Arc<CancellationToken>) -> Self {
        Self {
            cancel_token,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Returns the group's cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel_token
    }

    /// Spawns a node task in the group.
    ///
    /// The task receives the shared token. If the token is already
    /// cancelled when the task starts, the invocation is not launched.
    /// A task error cancels the token immediately.
    pub fn spawn<F, Fut>(&self, task: F)
    where
        F: FnOnce(Arc<CancellationToken>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<StageResult, HedmflowError>> + Send + 'static,
    {
        let token = self.cancel_token.clone();
        let handle = tokio::spawn(async move {
            if token.is_cancelled() {
                return Err(token.as_error());
            }
            match task(token.clone()).await {
                Ok(result) => Ok(result),
                Err(e) => {
                    token.cancel(e.to_string());
                    Err(e)
                }
            }
        });

        self.handles.lock().push(handle);
    }

    /// Waits for all tasks and returns their results in spawn order.
    ///
    /// If any task failed, the first real failure is returned (a task that
    /// merely observed cancellation does not mask the failure that caused
    /// it). All tasks are awaited before returning.
    pub async fn wait(&self) -> Result<Vec<StageResult>, HedmflowError> {
        let handles: Vec<_> = {
            let mut h = self.handles.lock();
            std::mem::take(&mut *h)
        };

        let mut results = Vec::with_capacity(handles.len());
        let mut first_error: Option<HedmflowError> = None;

        for handle in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_error) => Err(HedmflowError::TaskJoin(join_error.to_string())),
            };
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => record_error(&mut first_error, e),
            }
        }

        if let Some(e) = first_error {
            self.cancel_token.cancel(e.to_string());
            Err(e)
        } else {
            Ok(results)
        }
    }

    /// Returns the number of pending tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.handles.lock().len()
    }
}

impl std::fmt::Debug for NodeTaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeTaskGroup")
            .field("task_count", &self.task_count())
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish()
    }
}

// A Cancelled outcome is a consequence of some other failure; keep the cause.
fn record_error(first_error: &mut Option<HedmflowError>, e: HedmflowError) {
    match first_error {
        None => *first_error = Some(e),
        Some(HedmflowError::Cancelled { .. })
            if !matches!(e, HedmflowError::Cancelled { .. }) =>
        {
            *first_error = Some(e);
        }
        Some(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StageExecutionError;
    use crate::stages::StageKind;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn result_for(node: u32) -> StageResult {
        StageResult::new(
            StageKind::Peaks,
            Some(node),
            PathBuf::from(format!("/tmp/Peaks_{node}_.out")),
        )
    }

    #[tokio::test]
    async fn test_group_collects_results_in_spawn_order() {
        let group = NodeTaskGroup::new(Arc::new(CancellationToken::new()));

        for node in 0..4 {
            group.spawn(move |_token| async move {
                // Later nodes finish first; order must still hold.
                tokio::time::sleep(Duration::from_millis(u64::from(4 - node))).await;
                Ok(result_for(node))
            });
        }

        let results = group.wait().await.expect("all tasks succeed");
        let nodes: Vec<_> = results.iter().map(|r| r.node_index).collect();
        assert_eq!(nodes, vec![Some(0), Some(1), Some(2), Some(3)]);
    }

    #[tokio::test]
    async fn test_first_failure_cancels_token() {
        let group = NodeTaskGroup::new(Arc::new(CancellationToken::new()));

        group.spawn(|_token| async { Ok(result_for(0)) });
        group.spawn(|_token| async {
            Err(StageExecutionError::new(StageKind::Peaks, Some(1), "exit status 1").into())
        });

        let err = group.wait().await.unwrap_err();
        assert!(matches!(err, HedmflowError::StageExecution(_)));
        assert!(group.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_failure_not_masked_by_cancelled_tasks() {
        let group = NodeTaskGroup::new(Arc::new(CancellationToken::new()));

        // Node 0 backs out after observing cancellation caused by node 1.
        group.spawn(|token| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if token.is_cancelled() {
                return Err(token.as_error());
            }
            Ok(result_for(0))
        });
        group.spawn(|_token| async {
            Err(StageExecutionError::new(StageKind::Peaks, Some(1), "exit status 2").into())
        });

        let err = group.wait().await.unwrap_err();
        assert!(matches!(err, HedmflowError::StageExecution(_)));
    }

    #[tokio::test]
    async fn test_cancelled_token_prevents_launch() {
        let token = Arc::new(CancellationToken::new());
        token.cancel("pre-cancelled");
        let group = NodeTaskGroup::new(token);
        let launched = Arc::new(AtomicUsize::new(0));

        let launched_clone = launched.clone();
        group.spawn(move |_token| {
            let launched = launched_clone;
            async move {
                launched.fetch_add(1, Ordering::SeqCst);
                Ok(result_for(0))
            }
        });

        let err = group.wait().await.unwrap_err();
        assert!(matches!(err, HedmflowError::Cancelled { .. }));
        assert_eq!(launched.load(Ordering::SeqCst), 0);
    }
}
