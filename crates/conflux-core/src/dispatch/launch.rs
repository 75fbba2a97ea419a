//! Fan-out: spawn one tokio task per [`Task`] and hand back the set for fan-in.

use std::collections::HashMap;
use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::{Id, JoinSet};
use tracing::{Instrument, Span, debug, debug_span, error, warn};

use crate::domain::Task;
use crate::error::{DispatchError, WorkerError};

/// Terminal state of one launched task, keyed by its original index.
pub(crate) enum Settled<T> {
    Done { index: usize, value: T },
    Panicked { index: usize, message: String },
}

/// Tasks that have been spawned but not yet observed.
///
/// Every spawned task is observed exactly once, either through [`Launched::next`]
/// or by [`Launched::drain_in_background`]. Dropping a `Launched` with tasks
/// still pending drains them in the background instead of aborting them.
pub(crate) struct Launched<T: Send + 'static> {
    set: JoinSet<T>,
    slots: HashMap<Id, usize>,
    labels: Vec<String>,
}

/// Spawn every task before returning. Nothing here awaits, so worker
/// latencies overlap instead of stacking.
///
/// Must be called from within a tokio runtime.
pub(crate) fn fan_out<T, F, Fut>(tasks: Vec<Task>, parent: &Span, f: F) -> Launched<T>
where
    T: Send + 'static,
    F: Fn(Task) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    let mut set = JoinSet::new();
    let mut slots = HashMap::with_capacity(tasks.len());
    let mut labels = Vec::with_capacity(tasks.len());

    for task in tasks {
        let index = task.index();
        let span = debug_span!(parent: parent, "task", index, worker = task.label());
        labels.push(task.label().to_string());
        let handle = set.spawn(f(task).instrument(span));
        slots.insert(handle.id(), index);
    }

    Launched { set, slots, labels }
}

/// Fan out plain worker calls: each task resolves to the worker's own result.
pub(crate) fn call_all(tasks: Vec<Task>, parent: &Span) -> Launched<Result<String, WorkerError>> {
    fan_out(tasks, parent, |task| async move {
        let result = task.worker().call(task.input()).await;
        match &result {
            Ok(_) => debug!("worker succeeded"),
            Err(err) => debug!(error = %err, "worker failed"),
        }
        result
    })
}

impl<T: Send + 'static> Launched<T> {
    pub(crate) fn len(&self) -> usize {
        self.labels.len()
    }

    pub(crate) fn label(&self, index: usize) -> &str {
        self.labels.get(index).map(String::as_str).unwrap_or("<unknown>")
    }

    /// Wait for the next task to finish, in completion order.
    ///
    /// Returns `None` once every task has been observed.
    pub(crate) async fn next(&mut self) -> Option<Settled<T>> {
        loop {
            let (id, settled) = match self.set.join_next_with_id().await? {
                Ok((id, value)) => (id, Ok(value)),
                Err(err) => (err.id(), Err(err.to_string())),
            };
            // `fan_out` records every spawned id, so this only fires if that
            // bookkeeping is broken. Skipping keeps the remaining tasks joinable.
            let Some(index) = self.slots.remove(&id) else {
                error!(task_id = %id, "joined a task that was never launched");
                continue;
            };
            return Some(match settled {
                Ok(value) => Settled::Done { index, value },
                Err(message) => Settled::Panicked { index, message },
            });
        }
    }

    /// Hand the still-running tasks to a background task that observes each
    /// one as it finishes. Tasks are not aborted.
    pub(crate) fn drain_in_background(mut self) {
        if self.set.is_empty() {
            return;
        }
        let pending = self.set.len();
        let Ok(runtime) = Handle::try_current() else {
            // No runtime to observe them on; let them run to completion unjoined.
            warn!(pending, "no runtime available; detaching remaining tasks");
            self.set.detach_all();
            return;
        };
        debug!(pending, "draining remaining tasks in background");
        runtime.spawn(
            async move {
                while let Some(settled) = self.next().await {
                    if let Settled::Panicked { index, message } = settled {
                        warn!(index, worker = self.label(index), %message, "straggler did not complete");
                    }
                }
                debug!("background drain finished");
            }
            .in_current_span(),
        );
    }
}

impl<T: Send + 'static> Drop for Launched<T> {
    fn drop(&mut self) {
        if self.set.is_empty() {
            return;
        }
        let rest = Launched {
            set: std::mem::take(&mut self.set),
            slots: std::mem::take(&mut self.slots),
            labels: std::mem::take(&mut self.labels),
        };
        rest.drain_in_background();
    }
}

impl Launched<Result<String, WorkerError>> {
    /// Convert a settled plain call into the dispatcher's failure shape.
    pub(crate) fn outcome(
        &self,
        settled: Settled<Result<String, WorkerError>>,
    ) -> (usize, Result<String, DispatchError>) {
        match settled {
            Settled::Done { index, value } => (
                index,
                value.map_err(|source| DispatchError::WorkerFailure {
                    index,
                    worker: self.label(index).to_string(),
                    source,
                }),
            ),
            Settled::Panicked { index, message } => (
                index,
                Err(DispatchError::TaskPanicked {
                    index,
                    worker: self.label(index).to_string(),
                    message,
                }),
            ),
        }
    }
}

/// Keep the failure with the lowest task index.
pub(crate) fn keep_lowest(current: &mut Option<DispatchError>, candidate: DispatchError) {
    let held = current.as_ref().and_then(DispatchError::task_index);
    let replace = match (held, candidate.task_index()) {
        (Some(held), Some(new)) => new < held,
        _ => current.is_none(),
    };
    if replace {
        *current = Some(candidate);
    }
}
