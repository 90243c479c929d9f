//! Per-shard operation gating and background task tracking.
//!
//! Create and recover are mutually exclusive per shard: a claim must be
//! taken before either runs, and a second request while one is in flight
//! fails with `AlreadyInProgress` whatever its own `wait` flag says. The
//! claim is a drop guard, so the slot is released on every exit path:
//! success, error, panic, or a synchronous caller disconnecting.

use crate::error::SnapshotError;
use crate::types::{OperationOutcome, ShardKey};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::error;

/// Kind of tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    CreateSnapshot,
    RecoverShard,
}

/// Lifecycle of a tracked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One tracked task record.
#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub kind: TaskKind,
    pub shard: ShardKey,
    pub state: TaskState,
    finished_at: Option<Instant>,
}

struct TrackerInner {
    active: HashMap<ShardKey, TaskStatus>,
    finished: Vec<TaskStatus>,
    retention: Duration,
}

impl TrackerInner {
    fn prune(&mut self) {
        let retention = self.retention;
        self.finished
            .retain(|task| match task.finished_at {
                Some(at) => at.elapsed() < retention,
                None => false,
            });
    }
}

/// Serializes create/recover operations per shard and records task states.
#[derive(Clone)]
pub struct TaskTracker {
    inner: Arc<Mutex<TrackerInner>>,
}

fn lock(inner: &Mutex<TrackerInner>) -> MutexGuard<'_, TrackerInner> {
    // claim release must survive a poisoned tracker
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl TaskTracker {
    pub fn new(retention: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TrackerInner {
                active: HashMap::new(),
                finished: Vec::new(),
                retention,
            })),
        }
    }

    /// Claims the shard's exclusive operation slot.
    ///
    /// Fails with `AlreadyInProgress` when a create/recover task is already
    /// active for the shard. The returned claim releases the slot on drop.
    pub fn claim(&self, shard: &ShardKey, kind: TaskKind) -> Result<TaskClaim, SnapshotError> {
        let mut inner = lock(&self.inner);
        inner.prune();

        if inner.active.contains_key(shard) {
            return Err(SnapshotError::AlreadyInProgress(shard.to_string()));
        }
        inner.active.insert(
            shard.clone(),
            TaskStatus {
                kind,
                shard: shard.clone(),
                state: TaskState::Pending,
                finished_at: None,
            },
        );
        Ok(TaskClaim {
            inner: Arc::clone(&self.inner),
            shard: shard.clone(),
            outcome: None,
        })
    }

    /// The shard's in-flight task, if any.
    pub fn status(&self, shard: &ShardKey) -> Option<TaskStatus> {
        lock(&self.inner).active.get(shard).cloned()
    }

    /// Finished tasks still inside the retention window, oldest first.
    pub fn finished(&self) -> Vec<TaskStatus> {
        let mut inner = lock(&self.inner);
        inner.prune();
        inner.finished.clone()
    }
}

/// Exclusive per-shard claim; releases the slot on drop.
///
/// A claim dropped without an explicit outcome (cancellation, panic) is
/// recorded as failed.
pub struct TaskClaim {
    inner: Arc<Mutex<TrackerInner>>,
    shard: ShardKey,
    outcome: Option<TaskState>,
}

impl TaskClaim {
    /// Marks the task running.
    pub fn start(&self) {
        let mut inner = lock(&self.inner);
        if let Some(status) = inner.active.get_mut(&self.shard) {
            status.state = TaskState::Running;
        }
    }

    pub fn complete(mut self) {
        self.outcome = Some(TaskState::Completed);
    }

    pub fn fail(mut self) {
        self.outcome = Some(TaskState::Failed);
    }
}

impl Drop for TaskClaim {
    fn drop(&mut self) {
        let mut inner = lock(&self.inner);
        if let Some(mut status) = inner.active.remove(&self.shard) {
            status.state = self.outcome.take().unwrap_or(TaskState::Failed);
            status.finished_at = Some(Instant::now());
            inner.finished.push(status);
        }
        inner.prune();
    }
}

/// Runs `op` under `claim`, honoring the `wait` flag.
///
/// `wait = true` executes inline: the caller observes the result or the
/// operation's own error. `wait = false` spawns the operation on the
/// runtime and returns `Accepted` immediately; a background failure is
/// logged but never retroactively delivered to the caller, who only sees
/// it through side effects (the snapshot never appearing, the shard's data
/// unchanged).
pub async fn run<T, F>(
    claim: TaskClaim,
    wait: bool,
    label: &str,
    op: F,
) -> Result<OperationOutcome<T>, SnapshotError>
where
    F: Future<Output = Result<T, SnapshotError>> + Send + 'static,
    T: Send + 'static,
{
    if wait {
        claim.start();
        match op.await {
            Ok(value) => {
                claim.complete();
                Ok(OperationOutcome::Completed(value))
            }
            Err(e) => {
                claim.fail();
                Err(e)
            }
        }
    } else {
        let label = label.to_string();
        tokio::spawn(async move {
            claim.start();
            match op.await {
                Ok(_) => claim.complete(),
                Err(e) => {
                    error!("background {} failed: {}", label, e);
                    claim.fail();
                }
            }
        });
        Ok(OperationOutcome::Accepted)
    }
}

/// Spawns an untracked background operation, logging its failure.
///
/// Used for operations outside the create/recover gate (snapshot deletion).
pub(crate) fn spawn_logged<F>(label: &'static str, op: F)
where
    F: Future<Output = Result<(), SnapshotError>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = op.await {
            error!("background {} failed: {}", label, e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> TaskTracker {
        TaskTracker::new(Duration::from_secs(60))
    }

    #[test]
    fn second_claim_for_same_shard_is_rejected() {
        let tracker = tracker();
        let shard = ShardKey::new("books", 0);

        let claim = tracker.claim(&shard, TaskKind::CreateSnapshot).unwrap();
        let denied = tracker.claim(&shard, TaskKind::RecoverShard);
        assert!(matches!(denied, Err(SnapshotError::AlreadyInProgress(_))));

        drop(claim);
        assert!(tracker.claim(&shard, TaskKind::RecoverShard).is_ok());
    }

    #[test]
    fn claims_for_different_shards_are_independent() {
        let tracker = tracker();
        let _a = tracker
            .claim(&ShardKey::new("books", 0), TaskKind::CreateSnapshot)
            .unwrap();
        let _b = tracker
            .claim(&ShardKey::new("books", 1), TaskKind::CreateSnapshot)
            .unwrap();
    }

    #[test]
    fn state_transitions_are_recorded() {
        let tracker = tracker();
        let shard = ShardKey::new("books", 0);

        let claim = tracker.claim(&shard, TaskKind::CreateSnapshot).unwrap();
        assert_eq!(tracker.status(&shard).unwrap().state, TaskState::Pending);

        claim.start();
        assert_eq!(tracker.status(&shard).unwrap().state, TaskState::Running);

        claim.complete();
        assert!(tracker.status(&shard).is_none());
        let finished = tracker.finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].state, TaskState::Completed);
    }

    #[test]
    fn dropped_claim_is_recorded_as_failed() {
        let tracker = tracker();
        let shard = ShardKey::new("books", 0);

        let claim = tracker.claim(&shard, TaskKind::RecoverShard).unwrap();
        drop(claim);

        let finished = tracker.finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].state, TaskState::Failed);
    }

    #[test]
    fn finished_records_expire_after_retention() {
        let tracker = TaskTracker::new(Duration::from_millis(0));
        let shard = ShardKey::new("books", 0);

        tracker
            .claim(&shard, TaskKind::CreateSnapshot)
            .unwrap()
            .complete();
        assert!(tracker.finished().is_empty());
    }
}
