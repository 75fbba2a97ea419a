//! Absorbing policies: per-task failures become ordinary values at the task
//! boundary, so the barrier below can never fail.
//!
//! - fail-partial: failure -> `None`, dropped from the output
//! - fail-soft: failure -> caller's fallback string

use std::sync::Arc;

use tracing::{Span, warn};

use super::join_all::join_segments;
use super::launch::{Launched, Settled, fan_out};
use crate::domain::Task;

pub(crate) fn launch_partial(tasks: Vec<Task>, parent: &Span) -> Launched<Option<String>> {
    fan_out(tasks, parent, |task| async move {
        match task.worker().call(task.input()).await {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(error = %err, "worker failed; dropping its result");
                None
            }
        }
    })
}

pub(crate) fn launch_soft(tasks: Vec<Task>, parent: &Span, fallback: Arc<str>) -> Launched<String> {
    fan_out(tasks, parent, |task| {
        let fallback = Arc::clone(&fallback);
        async move {
            match task.worker().call(task.input()).await {
                Ok(value) => value,
                Err(err) => {
                    warn!(error = %err, "worker failed; using fallback");
                    fallback.to_string()
                }
            }
        }
    })
}

/// Surviving values in task order. A panicked task counts as a failure.
pub(crate) async fn collect_partial(mut launched: Launched<Option<String>>) -> Vec<String> {
    let mut slots: Vec<Option<String>> = vec![None; launched.len()];

    while let Some(settled) = launched.next().await {
        match settled {
            Settled::Done { index, value } => slots[index] = value,
            Settled::Panicked { index, message } => {
                warn!(index, worker = launched.label(index), %message, "task did not complete; dropping it");
            }
        }
    }

    slots.into_iter().flatten().collect()
}

/// Exactly one segment per task, in task order.
pub(crate) async fn collect_soft(
    mut launched: Launched<String>,
    fallback: Arc<str>,
    separator: &str,
) -> String {
    let mut slots: Vec<Option<String>> = vec![None; launched.len()];

    while let Some(settled) = launched.next().await {
        match settled {
            Settled::Done { index, value } => slots[index] = Some(value),
            Settled::Panicked { index, message } => {
                warn!(index, worker = launched.label(index), %message, "task did not complete; using fallback");
                slots[index] = Some(fallback.to_string());
            }
        }
    }

    let segments = slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| fallback.to_string()));
    join_segments(segments, separator)
}
