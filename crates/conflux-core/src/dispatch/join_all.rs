//! Join-all: every task must succeed; results keep the original task order.

use tracing::debug;

use super::launch::{Launched, keep_lowest};
use crate::error::{DispatchError, WorkerError};

/// Drain every task, then join the successes in task order.
///
/// Any failure fails the aggregate, but only after all tasks have been
/// observed. With several failures the lowest task index wins.
pub(crate) async fn collect_ordered(
    mut launched: Launched<Result<String, WorkerError>>,
    separator: &str,
) -> Result<String, DispatchError> {
    let mut slots: Vec<Option<String>> = vec![None; launched.len()];
    let mut failure: Option<DispatchError> = None;

    while let Some(settled) = launched.next().await {
        let (index, outcome) = launched.outcome(settled);
        match outcome {
            Ok(value) => slots[index] = Some(value),
            Err(err) => keep_lowest(&mut failure, err),
        }
    }

    if let Some(err) = failure {
        debug!(error = %err, "aggregate failed");
        return Err(err);
    }
    Ok(join_segments(slots.into_iter().flatten(), separator))
}

pub(crate) fn join_segments(segments: impl IntoIterator<Item = String>, separator: &str) -> String {
    segments.into_iter().collect::<Vec<_>>().join(separator)
}
