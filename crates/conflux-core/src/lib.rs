//! conflux-core
//!
//! Concurrent fan-out/fan-in dispatcher.
//!
//! # モジュール構成
//! - **worker**: `Worker` trait（外部の非同期レスポンダ）
//! - **dispatch**: `Dispatcher` と 4 つの集約ポリシー（join-all, completion-order, fail-fast, fail-partial/soft）
//! - **domain**: ids, task, policy
//! - **config**: `DispatchConfig`（区切り文字, fail-fast のタイミング）
//! - **error**: `WorkerError`, `DispatchError`, `ConfigError`
//! - **sim**: デモ・テスト用の擬似 worker

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod sim;
pub mod worker;

pub use config::{DispatchConfig, FailFastMode};
pub use dispatch::{Aggregate, Dispatcher};
pub use domain::{DispatchId, Policy};
pub use error::{ConfigError, DispatchError, WorkerError};
pub use worker::{SharedWorker, Worker};
