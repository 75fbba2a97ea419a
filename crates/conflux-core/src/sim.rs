//! Simulated workers for demos and tests.
//!
//! `LabelWorker` answers `"<label>:<INPUT-UPPERCASED>"` after a random delay,
//! which is enough to make completion order vary between runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::error::WorkerError;
use crate::worker::{SharedWorker, Worker};

/// Inclusive range an artificial scheduling delay is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    min: Duration,
    max: Duration,
}

impl DelayRange {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay)
    }

    pub fn none() -> Self {
        Self::fixed(Duration::ZERO)
    }

    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let lo = micros(self.min);
        let hi = micros(self.max);
        Duration::from_micros(rand::thread_rng().gen_range(lo..=hi))
    }
}

/// Saturates at `u64::MAX` microseconds.
fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

impl Default for DelayRange {
    fn default() -> Self {
        Self::new(Duration::ZERO, Duration::from_millis(20))
    }
}

async fn pause(delay: DelayRange) {
    let d = delay.sample();
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}

/// Uppercases the input and prefixes it with its label.
#[derive(Debug, Clone)]
pub struct LabelWorker {
    label: String,
    delay: DelayRange,
}

impl LabelWorker {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            delay: DelayRange::default(),
        }
    }

    pub fn with_delay(mut self, delay: DelayRange) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Worker for LabelWorker {
    fn label(&self) -> &str {
        &self.label
    }

    async fn call(&self, input: &str) -> Result<String, WorkerError> {
        pause(self.delay).await;
        Ok(format!("{}:{}", self.label, input.to_uppercase()))
    }
}

/// Always fails.
#[derive(Debug, Clone)]
pub struct FailingWorker {
    label: String,
    delay: DelayRange,
}

impl FailingWorker {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            delay: DelayRange::none(),
        }
    }

    pub fn with_delay(mut self, delay: DelayRange) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Worker for FailingWorker {
    fn label(&self) -> &str {
        &self.label
    }

    async fn call(&self, _input: &str) -> Result<String, WorkerError> {
        pause(self.delay).await;
        Err(WorkerError::new(format!("{}: forced failure", self.label)))
    }
}

/// Build a worker from `LABEL` or `LABEL:fail`.
pub fn worker_from_spec(spec: &str, delay: DelayRange) -> Result<SharedWorker, WorkerError> {
    let (label, failing) = match spec.rsplit_once(':') {
        Some((label, "fail")) => (label, true),
        Some((_, mode)) => {
            return Err(WorkerError::new(format!(
                "unknown worker mode '{mode}' in '{spec}' (expected LABEL or LABEL:fail)"
            )));
        }
        None => (spec, false),
    };
    if label.is_empty() {
        return Err(WorkerError::new(format!("empty worker label in '{spec}'")));
    }

    Ok(if failing {
        Arc::new(FailingWorker::new(label).with_delay(delay))
    } else {
        Arc::new(LabelWorker::new(label).with_delay(delay))
    })
}
