//! Supervisor — owns the supervised tasks and the shutdown sequence.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::RunnerConfig;
use crate::error::{ConfigError, Error};
use crate::signals;
use crate::supervisor::task::{SupervisedTask, TaskStatus};
use crate::worker::{Worker, WorkerSpec};

/// Point-in-time view of one supervised task.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub name: String,
    pub status: TaskStatus,
    pub attempt: u64,
}

/// Runs an arbitrary set of named bot workers for the lifetime of the
/// process: starts every enabled worker, restarts crashed ones, and tears
/// everything down on a termination signal or an explicit [`stop`].
///
/// One instance per process entry point; a supervisor is never restarted
/// after [`stop`].
///
/// [`stop`]: Supervisor::stop
pub struct Supervisor {
    config: RunnerConfig,
    tasks: Mutex<Vec<SupervisedTask>>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Supervisor {
    pub fn new(config: RunnerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            tasks: Mutex::new(Vec::new()),
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Whether the supervisor intends its workers to keep running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start every enabled worker and block until all of them have settled.
    ///
    /// Spawns one supervised task per enabled spec in registration order,
    /// then listens for SIGINT/SIGTERM and triggers [`stop`](Self::stop)
    /// when one arrives. Individual task failures are logged, never
    /// re-raised: the process outlives any single worker.
    ///
    /// Returns [`ConfigError::NoWorkersEnabled`] without spawning anything
    /// when the filtered set is empty, and [`Error::AlreadyStarted`] on any
    /// call after the first — a supervisor runs one start/stop cycle, and
    /// `running` never flips back to true once [`stop`](Self::stop) has
    /// cleared it.
    pub async fn start(self: Arc<Self>, specs: Vec<WorkerSpec>) -> Result<(), Error> {
        if self.stopped.load(Ordering::SeqCst) || self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }

        let mut enabled = Vec::new();
        for spec in specs {
            if spec.enabled {
                enabled.push(spec);
            } else {
                info!(bot = %spec.name, "Bot disabled");
            }
        }

        if enabled.is_empty() {
            error!("No bots are enabled; nothing to supervise");
            return Err(ConfigError::NoWorkersEnabled.into());
        }

        self.running.store(true, Ordering::SeqCst);

        let mut handles = Vec::with_capacity(enabled.len());
        {
            let mut tasks = self.tasks.lock().await;
            for spec in enabled {
                info!(bot = %spec.name, "Starting bot");
                let mut task = SupervisedTask::new(spec);
                task.spawn(
                    Arc::clone(&self.running),
                    self.cancel.child_token(),
                    self.config.restart_cooldown,
                );
                tasks.push(task);
            }
            for task in tasks.iter_mut() {
                if let Some(handle) = task.take_handle() {
                    handles.push(handle);
                }
            }
        }

        // Signal listener; exits once the supervisor stops. Later signals
        // route into the idempotent stop(): tokio keeps its process-level
        // signal handler installed for the lifetime of the process, so the
        // default kill disposition never comes back.
        let supervisor = Arc::clone(&self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    res = signals::wait_for_termination() => match res {
                        Ok(()) => {
                            info!("Termination signal received; shutting down");
                            supervisor.stop().await;
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to listen for termination signals");
                            return;
                        }
                    },
                }
            }
        });

        info!(bots = handles.len(), "All bots started");

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Supervised task aborted abnormally");
            }
        }
        Ok(())
    }

    /// Shut every worker down. Idempotent: repeated or concurrent calls
    /// after the first are no-ops.
    ///
    /// Flips the running flag first so in-flight restart decisions observe
    /// it, cancels every supervised task, then delivers `request_stop` to
    /// each worker that is still live — a failing stop on one worker never
    /// blocks the others.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Stopping bot runner");
        self.running.store(false, Ordering::SeqCst);

        // Snapshot live workers before cancellation tears the runs down,
        // so every one of them still receives its graceful stop signal.
        let mut live: Vec<(String, Arc<dyn Worker>)> = Vec::new();
        {
            let tasks = self.tasks.lock().await;
            for task in tasks.iter() {
                if let Some(worker) = task.live_worker().await {
                    live.push((task.name().to_string(), worker));
                }
            }
        }

        self.cancel.cancel();

        for (name, worker) in live {
            if let Err(e) = worker.request_stop().await {
                warn!(bot = %name, error = %e, "Graceful stop failed");
            }
        }

        info!("Bot runner stopped");
    }

    /// Point-in-time view of every supervised task.
    pub async fn snapshot(&self) -> Vec<TaskSnapshot> {
        let tasks = self.tasks.lock().await;
        tasks
            .iter()
            .map(|t| TaskSnapshot {
                name: t.name().to_string(),
                status: t.status(),
                attempt: t.attempt(),
            })
            .collect()
    }

    /// Watch one task's status transitions, by worker name.
    pub async fn status_watch(&self, name: &str) -> Option<watch::Receiver<TaskStatus>> {
        let tasks = self.tasks.lock().await;
        tasks.iter().find(|t| t.name() == name).map(|t| t.subscribe())
    }
}
