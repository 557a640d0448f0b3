//! Supervised task — keeps one worker session alive under the restart policy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::worker::{Worker, WorkerSpec};

/// Lifecycle state of one supervised task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Idle,
    Running,
    Crashed,
    Stopping,
    Stopped,
}

/// State shared between the restart loop and the supervisor.
struct TaskShared {
    status: watch::Sender<TaskStatus>,
    attempt: AtomicU64,
    /// The worker instance currently executing `run()`, if any. The
    /// supervisor reads this during shutdown to deliver `request_stop`.
    current: Mutex<Option<Arc<dyn Worker>>>,
}

impl TaskShared {
    fn set_status(&self, status: TaskStatus) {
        self.status.send_replace(status);
    }
}

/// One worker under supervision: status machine, attempt counter, and the
/// spawned restart loop.
pub struct SupervisedTask {
    spec: WorkerSpec,
    shared: Arc<TaskShared>,
    status_rx: watch::Receiver<TaskStatus>,
    handle: Option<JoinHandle<()>>,
}

impl SupervisedTask {
    pub(crate) fn new(spec: WorkerSpec) -> Self {
        let (status_tx, status_rx) = watch::channel(TaskStatus::Idle);
        Self {
            spec,
            shared: Arc::new(TaskShared {
                status: status_tx,
                attempt: AtomicU64::new(0),
                current: Mutex::new(None),
            }),
            status_rx,
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn status(&self) -> TaskStatus {
        *self.status_rx.borrow()
    }

    /// Restart attempts so far: 0 on the first run, incremented per restart.
    pub fn attempt(&self) -> u64 {
        self.shared.attempt.load(Ordering::SeqCst)
    }

    /// Watch status transitions as they happen.
    pub fn subscribe(&self) -> watch::Receiver<TaskStatus> {
        self.status_rx.clone()
    }

    /// Spawn the restart loop. Called exactly once per task, by the
    /// supervisor's `start()`.
    pub(crate) fn spawn(
        &mut self,
        running: Arc<AtomicBool>,
        cancel: CancellationToken,
        cooldown: Duration,
    ) {
        let fut = run_supervised(
            self.spec.clone(),
            Arc::clone(&self.shared),
            running,
            cancel,
            cooldown,
        );
        self.handle = Some(tokio::spawn(fut));
    }

    pub(crate) fn take_handle(&mut self) -> Option<JoinHandle<()>> {
        self.handle.take()
    }

    pub(crate) async fn live_worker(&self) -> Option<Arc<dyn Worker>> {
        self.shared.current.lock().await.clone()
    }
}

/// The restart loop for one worker.
///
/// Each iteration builds a fresh worker from the spec's factory, runs it,
/// and classifies the exit: cancellation unwinds without restarting, a
/// crash (or a voluntary return while the supervisor is still running)
/// schedules a restart after the cool-down. Faults never escape this
/// function; sibling tasks are unaffected.
async fn run_supervised(
    spec: WorkerSpec,
    shared: Arc<TaskShared>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    cooldown: Duration,
) {
    loop {
        if cancel.is_cancelled() {
            shared.set_status(TaskStatus::Stopped);
            return;
        }

        let worker = (spec.factory)();
        *shared.current.lock().await = Some(Arc::clone(&worker));
        let attempt = shared.attempt.load(Ordering::SeqCst);
        shared.set_status(TaskStatus::Running);
        info!(bot = %spec.name, attempt, "Bot session starting");

        let outcome = tokio::select! {
            res = worker.run() => Some(res),
            _ = cancel.cancelled() => None,
        };
        shared.current.lock().await.take();

        match outcome {
            // Supervisor shutdown: unwind without restarting.
            None => {
                shared.set_status(TaskStatus::Stopping);
                info!(bot = %spec.name, "Bot session cancelled");
                shared.set_status(TaskStatus::Stopped);
                return;
            }
            Some(Ok(())) => {
                if !running.load(Ordering::SeqCst) {
                    info!(bot = %spec.name, "Bot session stopped");
                    shared.set_status(TaskStatus::Stopped);
                    return;
                }
                // A healthy session never returns on its own, so a
                // voluntary exit is handled like a crash.
                warn!(bot = %spec.name, attempt, "Bot session exited unexpectedly");
                shared.set_status(TaskStatus::Crashed);
            }
            Some(Err(e)) => {
                error!(bot = %spec.name, attempt, error = %e, "Bot session crashed");
                shared.set_status(TaskStatus::Crashed);
            }
        }

        if !running.load(Ordering::SeqCst) {
            return;
        }

        info!(
            bot = %spec.name,
            cooldown_secs = cooldown.as_secs(),
            "Restarting bot after cool-down"
        );
        tokio::select! {
            _ = tokio::time::sleep(cooldown) => {}
            _ = cancel.cancelled() => {
                shared.set_status(TaskStatus::Stopped);
                return;
            }
        }

        // Shutdown may have begun while we were cooling down.
        if !running.load(Ordering::SeqCst) {
            return;
        }

        shared.attempt.fetch_add(1, Ordering::SeqCst);
        shared.set_status(TaskStatus::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StopError, WorkerError};
    use async_trait::async_trait;

    /// Worker that crashes while the shared budget is non-zero, then
    /// blocks until a stop request arrives. Fresh instances share the
    /// budget so restarts keep consuming it.
    struct ScriptedWorker {
        crashes: Arc<AtomicU64>,
        stop_tx: watch::Sender<bool>,
    }

    #[async_trait]
    impl Worker for ScriptedWorker {
        async fn run(&self) -> Result<(), WorkerError> {
            let remaining = self.crashes.load(Ordering::SeqCst);
            if remaining > 0 {
                if remaining != u64::MAX {
                    self.crashes.fetch_sub(1, Ordering::SeqCst);
                }
                return Err(WorkerError::SessionLost {
                    worker: "scripted".into(),
                    reason: "network down".into(),
                });
            }
            let mut rx = self.stop_tx.subscribe();
            let _ = rx.wait_for(|stopped| *stopped).await;
            Ok(())
        }

        async fn request_stop(&self) -> Result<(), StopError> {
            self.stop_tx.send_replace(true);
            Ok(())
        }
    }

    fn scripted_spec(crashes: Arc<AtomicU64>) -> WorkerSpec {
        WorkerSpec::new(
            "scripted",
            true,
            Arc::new(move || {
                let (stop_tx, _) = watch::channel(false);
                Arc::new(ScriptedWorker {
                    crashes: Arc::clone(&crashes),
                    stop_tx,
                }) as Arc<dyn Worker>
            }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn crash_once_then_recover_restarts_exactly_once() {
        let crash_budget = Arc::new(AtomicU64::new(1));
        let mut task = SupervisedTask::new(scripted_spec(crash_budget));
        let running = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let mut rx = task.subscribe();

        task.spawn(
            Arc::clone(&running),
            cancel.clone(),
            Duration::from_secs(30),
        );

        rx.wait_for(|s| *s == TaskStatus::Crashed).await.unwrap();
        assert_eq!(task.attempt(), 0);

        // Paused clock: the cool-down elapses as soon as the runtime idles.
        rx.wait_for(|s| *s == TaskStatus::Running).await.unwrap();
        assert_eq!(task.attempt(), 1);

        cancel.cancel();
        rx.wait_for(|s| *s == TaskStatus::Stopped).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_crasher_keeps_restarting() {
        let crash_budget = Arc::new(AtomicU64::new(u64::MAX));
        let mut task = SupervisedTask::new(scripted_spec(crash_budget));
        let running = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let mut rx = task.subscribe();

        task.spawn(
            Arc::clone(&running),
            cancel.clone(),
            Duration::from_secs(30),
        );

        // Running is transient for a persistent crasher, so gate on the
        // attempt counter instead of a specific status.
        rx.wait_for(|_| task.attempt() >= 5).await.unwrap();

        cancel.cancel();
        rx.wait_for(|s| *s == TaskStatus::Stopped).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_cooldown_prevents_restart() {
        let crash_budget = Arc::new(AtomicU64::new(u64::MAX));
        let mut task = SupervisedTask::new(scripted_spec(crash_budget));
        let running = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let mut rx = task.subscribe();

        task.spawn(
            Arc::clone(&running),
            cancel.clone(),
            Duration::from_secs(3600),
        );

        rx.wait_for(|s| *s == TaskStatus::Crashed).await.unwrap();
        // No await between observing the crash and cancelling, so the
        // paused clock cannot advance past the cool-down first.
        cancel.cancel();

        let status = rx.wait_for(|s| *s == TaskStatus::Stopped).await.unwrap();
        assert_eq!(*status, TaskStatus::Stopped);
        assert_eq!(task.attempt(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn voluntary_exit_while_running_is_crash_equivalent() {
        struct QuitsOnce {
            first: AtomicBool,
            stop_tx: watch::Sender<bool>,
        }

        #[async_trait]
        impl Worker for QuitsOnce {
            async fn run(&self) -> Result<(), WorkerError> {
                if self.first.swap(false, Ordering::SeqCst) {
                    return Ok(());
                }
                let mut rx = self.stop_tx.subscribe();
                let _ = rx.wait_for(|stopped| *stopped).await;
                Ok(())
            }

            async fn request_stop(&self) -> Result<(), StopError> {
                self.stop_tx.send_replace(true);
                Ok(())
            }
        }

        let quit = Arc::new(AtomicBool::new(true));
        let spec = WorkerSpec::new(
            "quitter",
            true,
            Arc::new(move || {
                let (stop_tx, _) = watch::channel(false);
                Arc::new(QuitsOnce {
                    first: AtomicBool::new(quit.swap(false, Ordering::SeqCst)),
                    stop_tx,
                }) as Arc<dyn Worker>
            }),
        );

        let mut task = SupervisedTask::new(spec);
        let running = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let mut rx = task.subscribe();

        task.spawn(
            Arc::clone(&running),
            cancel.clone(),
            Duration::from_secs(30),
        );

        rx.wait_for(|s| *s == TaskStatus::Crashed).await.unwrap();
        rx.wait_for(|s| *s == TaskStatus::Running && task.attempt() == 1)
            .await
            .unwrap();

        cancel.cancel();
        rx.wait_for(|s| *s == TaskStatus::Stopped).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_run_stops_without_restart() {
        let crash_budget = Arc::new(AtomicU64::new(0));
        let mut task = SupervisedTask::new(scripted_spec(crash_budget));
        let running = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let mut rx = task.subscribe();

        task.spawn(
            Arc::clone(&running),
            cancel.clone(),
            Duration::from_secs(30),
        );

        rx.wait_for(|s| *s == TaskStatus::Running).await.unwrap();
        cancel.cancel();
        rx.wait_for(|s| *s == TaskStatus::Stopped).await.unwrap();
        assert_eq!(task.attempt(), 0);
    }
}
