//! Dispatcher: fan a batch of worker calls out, fan the results back in.
//!
//! Every operation shares one skeleton:
//! 1. validate the inputs (synchronously, before anything runs)
//! 2. spawn every task (no awaiting in between)
//! 3. return an [`Aggregate`] whose single await point is the all-resolved barrier
//!
//! The policies differ only in how settled tasks are reduced.

mod absorb;
mod completion_order;
mod fail_fast;
mod join_all;
mod launch;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::Mutex;
use tracing::{Instrument, Span, debug, info_span};

use crate::config::DispatchConfig;
use crate::domain::{DispatchId, Policy, Task};
use crate::error::DispatchError;
use crate::worker::SharedWorker;

/// Asynchronous aggregate of one dispatch call.
///
/// Tasks are already running when this is returned. Awaiting it waits for the
/// policy's completion condition. Wrap it in `tokio::time::timeout` to bound
/// the wait: dropping it before it resolves does not cancel anything, and
/// tasks not yet observed are drained in the background.
#[must_use = "the dispatch outcome is only observed by awaiting the Aggregate"]
pub struct Aggregate<T> {
    id: DispatchId,
    policy: Policy,
    tasks: usize,
    inner: Pin<Box<dyn Future<Output = Result<T, DispatchError>> + Send + 'static>>,
}

impl<T> Aggregate<T> {
    fn new<F>(id: DispatchId, policy: Policy, tasks: usize, span: Span, fut: F) -> Self
    where
        F: Future<Output = Result<T, DispatchError>> + Send + 'static,
    {
        Self {
            id,
            policy,
            tasks,
            inner: Box::pin(fut.instrument(span)),
        }
    }

    pub fn id(&self) -> DispatchId {
        self.id
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Number of tasks launched for this call.
    pub fn tasks(&self) -> usize {
        self.tasks
    }
}

impl<T> Future for Aggregate<T> {
    type Output = Result<T, DispatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl<T> fmt::Debug for Aggregate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregate")
            .field("id", &self.id)
            .field("policy", &self.policy)
            .field("tasks", &self.tasks)
            .finish_non_exhaustive()
    }
}

/// Stateless fan-out/fan-in dispatcher.
///
/// Holds only configuration; calls are independent of each other. All
/// operations must be called from within a tokio runtime because they spawn
/// their tasks before returning.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Broadcast `message` to every worker; join the results in worker order.
    pub fn join_all(
        &self,
        workers: &[SharedWorker],
        message: &str,
    ) -> Result<Aggregate<String>, DispatchError> {
        self.join_tasks(Policy::JoinAll, broadcast(workers, message))
    }

    /// Join-all with one message per worker.
    pub fn join_all_each<S: AsRef<str>>(
        &self,
        workers: &[SharedWorker],
        messages: &[S],
    ) -> Result<Aggregate<String>, DispatchError> {
        let tasks = pair(workers, messages)?;
        self.join_tasks(Policy::JoinAll, tasks)
    }

    /// Broadcast `message`; collect results in the order they arrive.
    pub fn completion_order(
        &self,
        workers: &[SharedWorker],
        message: &str,
    ) -> Result<Aggregate<Vec<String>>, DispatchError> {
        let tasks = broadcast(workers, message);
        let (id, span) = begin(Policy::CompletionOrder, &tasks);
        let count = tasks.len();

        let arrivals: completion_order::Arrivals = Arc::new(Mutex::new(Vec::with_capacity(count)));
        let launched = completion_order::launch(tasks, &span, &arrivals);

        Ok(Aggregate::new(id, Policy::CompletionOrder, count, span, async move {
            let result = completion_order::collect(launched, arrivals).await;
            finish(&result);
            result
        }))
    }

    /// Any failing task fails the aggregate. Timing follows
    /// [`DispatchConfig::fail_fast`].
    pub fn fail_fast<S: AsRef<str>>(
        &self,
        workers: &[SharedWorker],
        messages: &[S],
    ) -> Result<Aggregate<String>, DispatchError> {
        let tasks = pair(workers, messages)?;
        let (id, span) = begin(Policy::FailFast, &tasks);
        let count = tasks.len();

        let launched = launch::call_all(tasks, &span);
        let separator = self.config.separator.clone();
        let mode = self.config.fail_fast;

        Ok(Aggregate::new(id, Policy::FailFast, count, span, async move {
            let result = fail_fast::collect(launched, &separator, mode).await;
            finish(&result);
            result
        }))
    }

    /// Failed tasks are dropped; survivors keep their task order. Never fails
    /// once launched.
    pub fn fail_partial<S: AsRef<str>>(
        &self,
        workers: &[SharedWorker],
        messages: &[S],
    ) -> Result<Aggregate<Vec<String>>, DispatchError> {
        let tasks = pair(workers, messages)?;
        let (id, span) = begin(Policy::FailPartial, &tasks);
        let count = tasks.len();

        let launched = absorb::launch_partial(tasks, &span);

        Ok(Aggregate::new(id, Policy::FailPartial, count, span, async move {
            let values = absorb::collect_partial(launched).await;
            debug!(survivors = values.len(), "dispatch resolved");
            Ok(values)
        }))
    }

    /// Failed tasks contribute `fallback` instead; the result always has one
    /// segment per task. Never fails once launched.
    pub fn fail_soft<S: AsRef<str>>(
        &self,
        workers: &[SharedWorker],
        messages: &[S],
        fallback: &str,
    ) -> Result<Aggregate<String>, DispatchError> {
        let tasks = pair(workers, messages)?;
        let (id, span) = begin(Policy::FailSoft, &tasks);
        let count = tasks.len();

        let fallback: Arc<str> = Arc::from(fallback);
        let launched = absorb::launch_soft(tasks, &span, Arc::clone(&fallback));
        let separator = self.config.separator.clone();

        Ok(Aggregate::new(id, Policy::FailSoft, count, span, async move {
            let joined = absorb::collect_soft(launched, fallback, &separator).await;
            debug!("dispatch resolved");
            Ok(joined)
        }))
    }

    fn join_tasks(
        &self,
        policy: Policy,
        tasks: Vec<Task>,
    ) -> Result<Aggregate<String>, DispatchError> {
        let (id, span) = begin(policy, &tasks);
        let count = tasks.len();

        let launched = launch::call_all(tasks, &span);
        let separator = self.config.separator.clone();

        Ok(Aggregate::new(id, policy, count, span, async move {
            let result = join_all::collect_ordered(launched, &separator).await;
            finish(&result);
            result
        }))
    }
}

fn broadcast(workers: &[SharedWorker], message: &str) -> Vec<Task> {
    workers
        .iter()
        .enumerate()
        .map(|(index, worker)| Task::new(index, Arc::clone(worker), message))
        .collect()
}

fn pair<S: AsRef<str>>(
    workers: &[SharedWorker],
    messages: &[S],
) -> Result<Vec<Task>, DispatchError> {
    if workers.len() != messages.len() {
        return Err(DispatchError::InvalidArgument(format!(
            "workers and messages must have the same length (workers={}, messages={})",
            workers.len(),
            messages.len()
        )));
    }
    Ok(workers
        .iter()
        .zip(messages)
        .enumerate()
        .map(|(index, (worker, message))| Task::new(index, Arc::clone(worker), message.as_ref()))
        .collect())
}

fn begin(policy: Policy, tasks: &[Task]) -> (DispatchId, Span) {
    let id = DispatchId::generate();
    let span = info_span!("dispatch", id = %id, policy = %policy, tasks = tasks.len());
    span.in_scope(|| debug!("launching tasks"));
    (id, span)
}

fn finish<T>(result: &Result<T, DispatchError>) {
    match result {
        Ok(_) => debug!("dispatch resolved"),
        Err(err) => debug!(error = %err, "dispatch failed"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use rstest::rstest;

    use super::*;
    use crate::config::FailFastMode;
    use crate::error::WorkerError;
    use crate::sim::{DelayRange, FailingWorker, LabelWorker};
    use crate::worker::Worker;

    fn ok(label: &str) -> SharedWorker {
        Arc::new(LabelWorker::new(label))
    }

    fn ok_after(label: &str, ms: u64) -> SharedWorker {
        Arc::new(LabelWorker::new(label).with_delay(DelayRange::fixed(Duration::from_millis(ms))))
    }

    fn fail(label: &str) -> SharedWorker {
        Arc::new(FailingWorker::new(label))
    }

    /// Counts how often it was invoked.
    struct CountingWorker {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Worker for CountingWorker {
        fn label(&self) -> &str {
            "counting"
        }

        async fn call(&self, input: &str) -> Result<String, WorkerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(input.to_string())
        }
    }

    /// Sleeps, then counts a completed call.
    struct SlowCountingWorker {
        completed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Worker for SlowCountingWorker {
        fn label(&self) -> &str {
            "slow-counting"
        }

        async fn call(&self, input: &str) -> Result<String, WorkerError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(input.to_string())
        }
    }

    fn workers_from(specs: &[&str]) -> Vec<SharedWorker> {
        specs
            .iter()
            .map(|spec| crate::sim::worker_from_spec(spec, DelayRange::default()).unwrap())
            .collect()
    }

    struct PanickingWorker;

    #[async_trait]
    impl Worker for PanickingWorker {
        fn label(&self) -> &str {
            "panics"
        }

        async fn call(&self, _input: &str) -> Result<String, WorkerError> {
            panic!("worker blew up");
        }
    }

    #[tokio::test]
    async fn join_all_keeps_worker_order() {
        let dispatcher = Dispatcher::default();
        // The first worker finishes last.
        let workers = vec![ok_after("Hello", 30), ok_after("World", 0)];

        let result = dispatcher.join_all(&workers, "hi").unwrap().await.unwrap();
        assert_eq!(result, "Hello:HI World:HI");
    }

    #[tokio::test]
    async fn join_all_each_pairs_messages_by_position() {
        let dispatcher = Dispatcher::default();
        let workers = vec![ok("A"), ok("B")];

        let result = dispatcher
            .join_all_each(&workers, &["x", "y"])
            .unwrap()
            .await
            .unwrap();
        assert_eq!(result, "A:X B:Y");
    }

    #[tokio::test]
    async fn join_all_reports_lowest_failing_index() {
        let dispatcher = Dispatcher::default();
        let workers: Vec<SharedWorker> = vec![
            ok("A"),
            Arc::new(FailingWorker::new("F1").with_delay(DelayRange::fixed(Duration::from_millis(30)))),
            fail("F2"),
        ];

        let err = dispatcher.join_all(&workers, "m").unwrap().await.unwrap_err();
        match err {
            DispatchError::WorkerFailure { index, worker, .. } => {
                assert_eq!(index, 1);
                assert_eq!(worker, "F1");
            }
            other => panic!("expected WorkerFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn join_all_on_no_workers_is_empty() {
        let dispatcher = Dispatcher::default();
        let result = dispatcher.join_all(&[], "hi").unwrap().await.unwrap();
        assert_eq!(result, "");
    }

    #[tokio::test]
    async fn separator_comes_from_config() {
        let dispatcher = Dispatcher::new(DispatchConfig::default().with_separator(", "));
        let workers = vec![ok("A"), ok("B")];

        let result = dispatcher.join_all(&workers, "q").unwrap().await.unwrap();
        assert_eq!(result, "A:Q, B:Q");
    }

    #[tokio::test]
    async fn completion_order_has_every_task_once() {
        let dispatcher = Dispatcher::default();
        let workers = vec![ok("A"), ok("B"), ok("C")];

        for _ in 0..20 {
            let order = dispatcher
                .completion_order(&workers, "msg")
                .unwrap()
                .await
                .unwrap();

            assert_eq!(order.len(), 3);
            let seen: HashSet<&str> = order.iter().map(String::as_str).collect();
            assert_eq!(seen, HashSet::from(["A:MSG", "B:MSG", "C:MSG"]));
        }
    }

    #[tokio::test]
    async fn completion_order_follows_arrival() {
        let dispatcher = Dispatcher::default();
        let workers = vec![ok_after("slow", 80), ok_after("fast", 0)];

        let order = dispatcher
            .completion_order(&workers, "x")
            .unwrap()
            .await
            .unwrap();
        assert_eq!(order, vec!["fast:X".to_string(), "slow:X".to_string()]);
    }

    #[tokio::test]
    async fn completion_order_propagates_failure() {
        let dispatcher = Dispatcher::default();
        let workers = vec![ok("A"), fail("B")];

        let err = dispatcher
            .completion_order(&workers, "x")
            .unwrap()
            .await
            .unwrap_err();
        assert_eq!(err.task_index(), Some(1));
    }

    #[rstest]
    #[case(FailFastMode::Early)]
    #[case(FailFastMode::AfterAll)]
    #[tokio::test]
    async fn fail_fast_never_returns_partial_success(#[case] mode: FailFastMode) {
        let dispatcher = Dispatcher::new(DispatchConfig::default().with_fail_fast(mode));
        let workers = vec![ok("OK1"), fail("FAIL"), ok("OK2")];

        let err = dispatcher
            .fail_fast(&workers, &["m1", "m2", "m3"])
            .unwrap()
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::WorkerFailure { index: 1, .. }));
        assert!(err.to_string().contains("FAIL"));
    }

    #[tokio::test]
    async fn fail_fast_early_resolves_before_stragglers() {
        let dispatcher = Dispatcher::default();
        let workers = vec![ok_after("slow", 2_000), fail("FAIL")];

        let result = tokio::time::timeout(
            Duration::from_millis(500),
            dispatcher.fail_fast(&workers, &["a", "b"]).unwrap(),
        )
        .await
        .expect("early failure should not wait for the slow worker");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fail_fast_success_matches_join_all() {
        let dispatcher = Dispatcher::default();
        let workers = vec![ok_after("A", 20), ok("B"), ok_after("C", 5)];

        let fast = dispatcher
            .fail_fast(&workers, &["m", "m", "m"])
            .unwrap()
            .await
            .unwrap();
        let joined = dispatcher.join_all(&workers, "m").unwrap().await.unwrap();
        assert_eq!(fast, joined);
        assert_eq!(fast, "A:M B:M C:M");
    }

    #[tokio::test]
    async fn fail_partial_drops_failures_in_order() {
        let dispatcher = Dispatcher::default();
        let workers = vec![ok_after("OK1", 20), fail("FAIL"), ok("OK2")];

        let values = dispatcher
            .fail_partial(&workers, &["m1", "m2", "m3"])
            .unwrap()
            .await
            .unwrap();
        assert_eq!(values, vec!["OK1:M1".to_string(), "OK2:M3".to_string()]);
    }

    #[tokio::test]
    async fn fail_partial_all_failing_is_empty() {
        let dispatcher = Dispatcher::default();
        let workers = vec![fail("F1"), fail("F2")];

        let values = dispatcher
            .fail_partial(&workers, &["a", "b"])
            .unwrap()
            .await
            .unwrap();
        assert!(values.is_empty());
    }

    #[tokio::test]
    async fn fail_soft_substitutes_fallback() {
        let dispatcher = Dispatcher::default();
        let workers = vec![ok("OK1"), fail("FAIL"), ok("OK2")];

        let result = dispatcher
            .fail_soft(&workers, &["m1", "m2", "m3"], "FALLBACK")
            .unwrap()
            .await
            .unwrap();
        assert_eq!(result, "OK1:M1 FALLBACK OK2:M3");
    }

    #[tokio::test]
    async fn fail_soft_all_failing_is_all_fallback() {
        let dispatcher = Dispatcher::default();
        let workers = vec![fail("F1"), fail("F2")];

        let result = dispatcher
            .fail_soft(&workers, &["a", "b"], "X")
            .unwrap()
            .await
            .unwrap();
        assert_eq!(result, "X X");
    }

    #[tokio::test]
    async fn panicking_worker_is_absorbed_by_absorbing_policies() {
        let dispatcher = Dispatcher::default();
        let workers: Vec<SharedWorker> = vec![ok("A"), Arc::new(PanickingWorker)];

        let partial = dispatcher
            .fail_partial(&workers, &["a", "b"])
            .unwrap()
            .await
            .unwrap();
        assert_eq!(partial, vec!["A:A".to_string()]);

        let soft = dispatcher
            .fail_soft(&workers, &["a", "b"], "X")
            .unwrap()
            .await
            .unwrap();
        assert_eq!(soft, "A:A X");
    }

    #[tokio::test]
    async fn panicking_worker_fails_join_all() {
        let dispatcher = Dispatcher::default();
        let workers: Vec<SharedWorker> = vec![ok("A"), Arc::new(PanickingWorker)];

        let err = dispatcher.join_all(&workers, "a").unwrap().await.unwrap_err();
        assert!(matches!(err, DispatchError::TaskPanicked { index: 1, .. }));
    }

    #[rstest]
    #[case(Policy::JoinAll)]
    #[case(Policy::FailFast)]
    #[case(Policy::FailPartial)]
    #[case(Policy::FailSoft)]
    #[tokio::test]
    async fn mismatched_lengths_fail_before_any_call(#[case] policy: Policy) {
        let dispatcher = Dispatcher::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let workers: Vec<SharedWorker> = vec![
            Arc::new(CountingWorker { calls: Arc::clone(&calls) }),
            Arc::new(CountingWorker { calls: Arc::clone(&calls) }),
        ];
        let messages = ["only one"];

        let err = match policy {
            Policy::JoinAll => dispatcher.join_all_each(&workers, &messages).unwrap_err(),
            Policy::FailFast => dispatcher.fail_fast(&workers, &messages).unwrap_err(),
            Policy::FailPartial => dispatcher.fail_partial(&workers, &messages).unwrap_err(),
            Policy::FailSoft => dispatcher.fail_soft(&workers, &messages, "X").unwrap_err(),
            Policy::CompletionOrder => unreachable!("broadcast only"),
        };
        assert!(matches!(err, DispatchError::InvalidArgument(_)));

        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn every_worker_is_called_exactly_once() {
        let dispatcher = Dispatcher::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let workers: Vec<SharedWorker> = (0..5)
            .map(|_| Arc::new(CountingWorker { calls: Arc::clone(&calls) }) as SharedWorker)
            .collect();

        let result = dispatcher.join_all(&workers, "z").unwrap().await.unwrap();
        assert_eq!(result, "z z z z z");
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn workers_run_concurrently() {
        let dispatcher = Dispatcher::default();
        let workers: Vec<SharedWorker> = (0..5).map(|i| ok_after(&format!("W{i}"), 100)).collect();

        let started = std::time::Instant::now();
        dispatcher.join_all(&workers, "x").unwrap().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn aggregate_reports_its_shape() {
        let dispatcher = Dispatcher::default();
        let workers = vec![ok("A"), ok("B")];

        let aggregate = dispatcher.fail_soft(&workers, &["a", "b"], "X").unwrap();
        assert_eq!(aggregate.policy(), Policy::FailSoft);
        assert_eq!(aggregate.tasks(), 2);
        assert!(aggregate.id().to_string().starts_with("dispatch-"));
        aggregate.await.unwrap();
    }

    #[rstest]
    #[case(Policy::JoinAll)]
    #[case(Policy::CompletionOrder)]
    #[case(Policy::FailFast)]
    #[case(Policy::FailPartial)]
    #[case(Policy::FailSoft)]
    #[tokio::test]
    async fn caller_timeout_does_not_cancel_workers(#[case] policy: Policy) {
        let dispatcher = Dispatcher::default();
        let completed = Arc::new(AtomicUsize::new(0));
        let workers: Vec<SharedWorker> = (0..3)
            .map(|_| Arc::new(SlowCountingWorker { completed: Arc::clone(&completed) }) as SharedWorker)
            .collect();
        let messages = ["a", "b", "c"];
        let limit = Duration::from_millis(10);

        let timed_out = match policy {
            Policy::JoinAll => tokio::time::timeout(limit, dispatcher.join_all(&workers, "a").unwrap())
                .await
                .is_err(),
            Policy::CompletionOrder => {
                tokio::time::timeout(limit, dispatcher.completion_order(&workers, "a").unwrap())
                    .await
                    .is_err()
            }
            Policy::FailFast => tokio::time::timeout(limit, dispatcher.fail_fast(&workers, &messages).unwrap())
                .await
                .is_err(),
            Policy::FailPartial => {
                tokio::time::timeout(limit, dispatcher.fail_partial(&workers, &messages).unwrap())
                    .await
                    .is_err()
            }
            Policy::FailSoft => {
                tokio::time::timeout(limit, dispatcher.fail_soft(&workers, &messages, "X").unwrap())
                    .await
                    .is_err()
            }
        };
        assert!(timed_out);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 3);
    }

    #[rstest]
    #[case::all_succeed(&["A", "B"], &["x", "y"], &["A:X", "B:Y"], "A:X B:Y")]
    #[case::mixed(&["A", "F:fail", "C"], &["x", "y", "z"], &["A:X", "C:Z"], "A:X FB C:Z")]
    #[case::all_fail(&["F1:fail", "F2:fail"], &["x", "y"], &[], "FB FB")]
    #[case::no_workers(&[], &[], &[], "")]
    #[tokio::test]
    async fn absorbing_policies_shape_output(
        #[case] specs: &[&str],
        #[case] messages: &[&str],
        #[case] partial: &[&str],
        #[case] soft: &str,
    ) {
        let dispatcher = Dispatcher::default();
        let workers = workers_from(specs);

        let values = dispatcher
            .fail_partial(&workers, messages)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(values, partial);

        let joined = dispatcher
            .fail_soft(&workers, messages, "FB")
            .unwrap()
            .await
            .unwrap();
        assert_eq!(joined, soft);
        if !workers.is_empty() {
            assert_eq!(joined.split(' ').count(), workers.len());
        }
    }

    #[tokio::test]
    async fn fail_soft_keeps_task_order() {
        let dispatcher = Dispatcher::default();
        // The first worker finishes last.
        let workers: Vec<SharedWorker> = vec![ok_after("OK1", 40), fail("FAIL"), ok_after("OK2", 0)];

        let result = dispatcher
            .fail_soft(&workers, &["m1", "m2", "m3"], "FALLBACK")
            .unwrap()
            .await
            .unwrap();
        assert_eq!(result, "OK1:M1 FALLBACK OK2:M3");
    }
}
