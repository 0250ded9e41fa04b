mod metrics;

use futures::FutureExt;
use futures::channel::mpsc::Sender;
use futures::future::{Future, Shared};
use std::sync::Arc;
use tracing::debug;

pub use tokio::runtime::Handle;

/// Provides a reason when the node is being shut down.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ShutdownReason {
    /// The node shut down successfully.
    Success(&'static str),
    /// The node shut down due to an error condition.
    Failure(&'static str),
}

impl ShutdownReason {
    pub fn message(&self) -> &'static str {
        match self {
            ShutdownReason::Success(msg) => msg,
            ShutdownReason::Failure(msg) => msg,
        }
    }
}

/// A one-shot signal fired on shutdown; all clones of the paired [`Exit`] resolve once fired or
/// once the signal is dropped.
pub struct Signal(futures::channel::oneshot::Sender<()>);

impl Signal {
    pub fn fire(self) {
        let _ = self.0.send(());
    }
}

/// A cloneable future that resolves when the node is shutting down.
#[derive(Clone)]
pub struct Exit(Shared<futures::channel::oneshot::Receiver<()>>);

impl Exit {
    pub fn channel() -> (Signal, Exit) {
        let (tx, rx) = futures::channel::oneshot::channel();
        (Signal(tx), Exit(rx.shared()))
    }

    /// Resolves when the exit signal has fired (or its sender was dropped).
    pub async fn wait(self) {
        let _ = self.0.await;
    }
}

/// A wrapper over a runtime handle which can spawn async and blocking tasks.
///
/// Long-lived tasks race the executor's exit signal so that node shutdown detaches them at their
/// next await point (spec: in-flight work completes to the next suspension, then unwinds).
#[derive(Clone)]
pub struct TaskExecutor {
    /// The handle to the runtime on which tasks are spawned.
    handle: Handle,
    /// The receiver exit future which on receiving shuts down the task.
    exit: Exit,
    /// Sender given to tasks, so that if they encounter a state in which execution cannot
    /// continue they can request that everything shuts down.
    signal_tx: Sender<ShutdownReason>,
}

impl TaskExecutor {
    pub fn new(handle: Handle, exit: Exit, signal_tx: Sender<ShutdownReason>) -> Self {
        Self {
            handle,
            exit,
            signal_tx,
        }
    }

    /// Spawn a future on the tokio runtime.
    ///
    /// The future is wrapped in an `exit` future which cancels the task once the executor is
    /// shutting down. The task is monitored via a gauge labelled with `name`.
    pub fn spawn(&self, task: impl Future<Output = ()> + Send + 'static, name: &'static str) {
        if let Some(int_gauge) = metrics::get_int_gauge(&metrics::ASYNC_TASKS_COUNT, &[name]) {
            let int_gauge_1 = int_gauge.clone();
            int_gauge.inc();
            let exit = self.exit.clone();
            let future = async move {
                futures::pin_mut!(task);
                match futures::future::select(task, Box::pin(exit.wait())).await {
                    futures::future::Either::Left(_) => debug!(task = name, "Async task completed"),
                    futures::future::Either::Right(_) => {
                        debug!(task = name, "Async task shutdown, exit received")
                    }
                }
                int_gauge_1.dec();
            };
            self.handle.spawn(future);
        }
    }

    /// Spawn a future on the tokio runtime ignoring the exit signal.
    pub fn spawn_without_exit(
        &self,
        task: impl Future<Output = ()> + Send + 'static,
        name: &'static str,
    ) {
        if let Some(int_gauge) = metrics::get_int_gauge(&metrics::ASYNC_TASKS_COUNT, &[name]) {
            int_gauge.inc();
            let future = task.then(move |_| async move { int_gauge.dec() });
            self.handle.spawn(future);
        }
    }

    /// Spawn a future on the tokio runtime, returning a join handle to its result.
    ///
    /// The task is cancelled at the executor's exit signal, in which case the handle resolves to
    /// `None`.
    pub fn spawn_handle<R: Send + 'static>(
        &self,
        task: impl Future<Output = R> + Send + 'static,
        name: &'static str,
    ) -> impl Future<Output = Option<R>> {
        let exit = self.exit.clone();
        let int_gauge = metrics::get_int_gauge(&metrics::ASYNC_TASKS_COUNT, &[name]);
        if let Some(int_gauge) = &int_gauge {
            int_gauge.inc();
        }

        let join_handle = self.handle.spawn(async move {
            futures::pin_mut!(task);
            match futures::future::select(task, Box::pin(exit.wait())).await {
                futures::future::Either::Left((value, _)) => Some(value),
                futures::future::Either::Right(_) => {
                    debug!(task = name, "Async task shutdown, exit received");
                    None
                }
            }
        });

        async move {
            let result = match join_handle.await {
                Ok(result) => result,
                Err(e) => {
                    debug!(error = %e, "Join handle dropped or panicked");
                    None
                }
            };
            if let Some(int_gauge) = int_gauge {
                int_gauge.dec();
            }
            result
        }
    }

    /// Spawn a blocking (CPU-heavy) task onto the dedicated blocking pool, returning a handle to
    /// its result. Used for BLS verification and KZG computation.
    pub fn spawn_blocking_handle<F, R>(
        &self,
        task: F,
        name: &'static str,
    ) -> impl Future<Output = Result<R, tokio::task::JoinError>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let int_gauge = metrics::get_int_gauge(&metrics::BLOCKING_TASKS_COUNT, &[name]);
        if let Some(int_gauge) = &int_gauge {
            int_gauge.inc();
        }
        let timer = metrics::start_timer_vec(&metrics::BLOCKING_TASKS_HISTOGRAM, &[name]);

        let join_handle = self.handle.spawn_blocking(task);

        async move {
            let result = join_handle.await;
            metrics::stop_timer(timer);
            if let Some(int_gauge) = int_gauge {
                int_gauge.dec();
            }
            result
        }
    }

    /// Returns a `Sender` which can report a reason to trigger node shutdown.
    pub fn shutdown_sender(&self) -> Sender<ShutdownReason> {
        self.signal_tx.clone()
    }

    /// Returns a copy of the `exit` future which resolves at shutdown.
    pub fn exit(&self) -> Exit {
        self.exit.clone()
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

/// A convenience for tests: a self-contained runtime + executor that fires its exit signal on
/// drop.
pub struct TestRuntime {
    runtime: Option<Arc<tokio::runtime::Runtime>>,
    _signal: Option<Signal>,
    pub task_executor: TaskExecutor,
}

impl Default for TestRuntime {
    fn default() -> Self {
        let runtime = Arc::new(
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .expect("runtime should start"),
        );
        let (signal, exit) = Exit::channel();
        let (shutdown_tx, _shutdown_rx) = futures::channel::mpsc::channel(1);
        let task_executor = TaskExecutor::new(runtime.handle().clone(), exit, shutdown_tx);

        Self {
            runtime: Some(runtime),
            _signal: Some(signal),
            task_executor,
        }
    }
}

impl Drop for TestRuntime {
    fn drop(&mut self) {
        if let Some(signal) = self._signal.take() {
            signal.fire();
        }
        if let Some(runtime) = self.runtime.take() {
            // Dropping a runtime inside async context panics, shut it down in the background.
            std::thread::spawn(move || drop(runtime));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawned_task_runs_to_completion() {
        let test_runtime = TestRuntime::default();
        let (tx, rx) = futures::channel::oneshot::channel();
        test_runtime.task_executor.spawn(
            async move {
                let _ = tx.send(42u64);
            },
            "test_task",
        );
        let value = test_runtime
            .runtime
            .as_ref()
            .unwrap()
            .block_on(rx)
            .expect("task should send");
        assert_eq!(value, 42);
    }

    #[test]
    fn blocking_task_returns_result() {
        let test_runtime = TestRuntime::default();
        let handle = test_runtime
            .task_executor
            .spawn_blocking_handle(|| 1 + 1, "blocking_task");
        let result = test_runtime
            .runtime
            .as_ref()
            .unwrap()
            .block_on(handle)
            .expect("blocking task should join");
        assert_eq!(result, 2);
    }

    #[test]
    fn exit_signal_cancels_task() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let (signal, exit) = Exit::channel();
        let (shutdown_tx, _shutdown_rx) = futures::channel::mpsc::channel(1);
        let executor = TaskExecutor::new(runtime.handle().clone(), exit, shutdown_tx);

        let handle = executor.spawn_handle(
            async {
                futures::future::pending::<()>().await;
            },
            "pending_task",
        );
        signal.fire();

        let result = runtime.block_on(handle);
        assert_eq!(result, None);
    }
}
