//! Completion-order capture: results in the order tasks actually finished.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{Span, debug};

use super::launch::{Launched, Settled, fan_out, keep_lowest};
use crate::domain::Task;
use crate::error::{DispatchError, WorkerError};

/// Accumulator shared by every task of one call. Appends are serialized by
/// the mutex; nothing orders which task appends first.
pub(crate) type Arrivals = Arc<Mutex<Vec<String>>>;

/// Spawn tasks that append their own success to `arrivals` as they complete.
pub(crate) fn launch(
    tasks: Vec<Task>,
    parent: &Span,
    arrivals: &Arrivals,
) -> Launched<Result<(), WorkerError>> {
    fan_out(tasks, parent, |task| {
        let arrivals = Arc::clone(arrivals);
        async move {
            let value = task.worker().call(task.input()).await?;
            let mut arrivals = arrivals.lock().await;
            arrivals.push(value);
            debug!(position = arrivals.len() - 1, "recorded arrival");
            Ok::<(), WorkerError>(())
        }
    })
}

/// Wait for every task; any failure fails the aggregate.
pub(crate) async fn collect(
    mut launched: Launched<Result<(), WorkerError>>,
    arrivals: Arrivals,
) -> Result<Vec<String>, DispatchError> {
    let mut failure: Option<DispatchError> = None;

    while let Some(settled) = launched.next().await {
        let err = match settled {
            Settled::Done { value: Ok(()), .. } => continue,
            Settled::Done { index, value: Err(source) } => {
                DispatchError::WorkerFailure {
                    index,
                    worker: launched.label(index).to_string(),
                    source,
                }
            }
            Settled::Panicked { index, message } => DispatchError::TaskPanicked {
                index,
                worker: launched.label(index).to_string(),
                message,
            },
        };
        keep_lowest(&mut failure, err);
    }

    if let Some(err) = failure {
        return Err(err);
    }
    let mut arrivals = arrivals.lock().await;
    Ok(std::mem::take(&mut *arrivals))
}
