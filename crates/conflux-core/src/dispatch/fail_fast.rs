//! Fail-fast: any failure fails the aggregate, never a partial string.

use tracing::debug;

use super::join_all::{collect_ordered, join_segments};
use super::launch::Launched;
use crate::config::FailFastMode;
use crate::error::{DispatchError, WorkerError};

pub(crate) async fn collect(
    launched: Launched<Result<String, WorkerError>>,
    separator: &str,
    mode: FailFastMode,
) -> Result<String, DispatchError> {
    match mode {
        FailFastMode::AfterAll => collect_ordered(launched, separator).await,
        FailFastMode::Early => collect_early(launched, separator).await,
    }
}

/// Resolve on the first observed failure.
///
/// Remaining tasks are not cancelled; they are handed to a background drain.
async fn collect_early(
    mut launched: Launched<Result<String, WorkerError>>,
    separator: &str,
) -> Result<String, DispatchError> {
    let mut slots: Vec<Option<String>> = vec![None; launched.len()];

    while let Some(settled) = launched.next().await {
        let (index, outcome) = launched.outcome(settled);
        match outcome {
            Ok(value) => slots[index] = Some(value),
            Err(err) => {
                debug!(error = %err, "failing fast");
                launched.drain_in_background();
                return Err(err);
            }
        }
    }

    Ok(join_segments(slots.into_iter().flatten(), separator))
}
