use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WorkerError;

/// A single-request responder the dispatcher fans out to.
///
/// The dispatcher only relies on the call contract: one input in, exactly one
/// terminal outcome out. Workers are shared as `Arc<dyn Worker>` and may be
/// reused across dispatcher calls, so implementations must not assume
/// exclusive access.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Name used in logs and failure reports.
    fn label(&self) -> &str;

    async fn call(&self, input: &str) -> Result<String, WorkerError>;
}

/// Shared handle to a worker.
pub type SharedWorker = Arc<dyn Worker>;
