use std::fmt;

use crate::worker::SharedWorker;

/// One (worker, input) pairing inside a single dispatch call.
///
/// `index` is the task's position in the caller's input lists and is the
/// ordering key for every order-preserving policy.
pub struct Task {
    index: usize,
    worker: SharedWorker,
    input: String,
}

impl Task {
    pub fn new(index: usize, worker: SharedWorker, input: impl Into<String>) -> Self {
        Self {
            index,
            worker,
            input: input.into(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn worker(&self) -> &SharedWorker {
        &self.worker
    }

    pub fn label(&self) -> &str {
        self.worker.label()
    }

    pub fn input(&self) -> &str {
        &self.input
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("index", &self.index)
            .field("worker", &self.worker.label())
            .field("input", &self.input)
            .finish()
    }
}
