//! Timer-driven execution of standing background tasks.
//!
//! Every invocation runs in its own tokio task behind a containment wrapper:
//! an `Err` or a panic is logged and counted, and the timer keeps going.
//! A firing that finds the previous invocation of the same task still
//! running is skipped.

pub mod cadence;
pub mod standing;

pub use cadence::{delay_until_daily, delay_until_weekly, Cadence};
pub use standing::{standing_tasks, HealthProbe, StandingServices};

use crate::clock::Clock;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type TaskHandler = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

pub struct TaskSpec {
    pub name: String,
    pub cadence: Cadence,
    /// Also fire once as soon as the scheduler starts
    pub run_on_start: bool,
    handler: TaskHandler,
}

impl TaskSpec {
    pub fn new<F, Fut>(name: impl Into<String>, cadence: Cadence, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            cadence,
            run_on_start: false,
            handler: Arc::new(move || handler().boxed()),
        }
    }

    pub fn run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    /// Runs the handler directly, without containment.
    pub async fn invoke(&self) -> anyhow::Result<()> {
        (self.handler)().await
    }
}

impl std::fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("cadence", &self.cadence)
            .field("run_on_start", &self.run_on_start)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub name: String,
    pub runs: u64,
    pub failures: u64,
    pub skipped: u64,
    pub running: bool,
}

struct TaskState {
    spec: TaskSpec,
    running: AtomicBool,
    runs: AtomicU64,
    failures: AtomicU64,
    skipped: AtomicU64,
}

impl TaskState {
    fn new(spec: TaskSpec) -> Self {
        Self {
            spec,
            running: AtomicBool::new(false),
            runs: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    fn stats(&self) -> TaskStats {
        TaskStats {
            name: self.spec.name.clone(),
            runs: self.runs.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            running: self.running.load(Ordering::SeqCst),
        }
    }
}

#[derive(Default)]
struct Timers {
    token: Option<CancellationToken>,
    handles: Vec<JoinHandle<()>>,
}

pub struct Scheduler {
    clock: Arc<dyn Clock>,
    tasks: Mutex<Vec<Arc<TaskState>>>,
    timers: Mutex<Timers>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tasks: Mutex::new(Vec::new()),
            timers: Mutex::new(Timers::default()),
        }
    }

    /// Adds a task. If the scheduler is running it is armed right away.
    pub fn register(&self, spec: TaskSpec) {
        tracing::info!(task = %spec.name, cadence = %spec.cadence, "Task registered");
        let state = Arc::new(TaskState::new(spec));
        lock(&self.tasks).push(state.clone());

        let mut timers = lock(&self.timers);
        if let Some(token) = timers.token.clone() {
            let handle = self.arm(state, token);
            timers.handles.push(handle);
        }
    }

    /// Runs `handler` now and then every `interval`.
    pub fn add_task<F, Fut>(&self, name: impl Into<String>, interval: Duration, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(TaskSpec::new(name, Cadence::Every(interval), handler).run_on_start(true));
    }

    /// Arms every registered task. Calling it while running does nothing.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut timers = lock(&self.timers);
        if timers.token.is_some() {
            tracing::warn!("Scheduler already running");
            return;
        }

        let token = CancellationToken::new();
        let tasks = lock(&self.tasks).clone();
        for state in &tasks {
            timers.handles.push(self.arm(state.clone(), token.clone()));
        }
        timers.token = Some(token);

        tracing::info!(tasks = tasks.len(), "Scheduler started");
    }

    /// Disarms every timer. In-flight invocations run to completion.
    pub fn stop(&self) {
        let mut timers = lock(&self.timers);
        let Some(token) = timers.token.take() else {
            return;
        };
        token.cancel();
        for handle in timers.handles.drain(..) {
            handle.abort();
        }
        tracing::info!("Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.timers).token.is_some()
    }

    pub fn armed_count(&self) -> usize {
        lock(&self.timers)
            .handles
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    pub fn stats(&self) -> Vec<TaskStats> {
        lock(&self.tasks).iter().map(|t| t.stats()).collect()
    }

    fn arm(&self, state: Arc<TaskState>, token: CancellationToken) -> JoinHandle<()> {
        let first_delay = state.spec.cadence.first_delay(self.clock.local_now());
        tracing::debug!(
            task = %state.spec.name,
            first_delay_secs = first_delay.as_secs(),
            "Task armed"
        );

        tokio::spawn(async move {
            if state.spec.run_on_start {
                fire(&state);
            }

            let period = state.spec.cadence.period();
            let mut delay = first_delay;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => fire(&state),
                }
                delay = period;
            }
        })
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Starts one contained invocation unless the previous one is still running.
fn fire(state: &Arc<TaskState>) {
    if state.running.swap(true, Ordering::SeqCst) {
        state.skipped.fetch_add(1, Ordering::SeqCst);
        tracing::warn!(task = %state.spec.name, "Skipping run: previous run still in progress");
        return;
    }
    state.runs.fetch_add(1, Ordering::SeqCst);

    let state = state.clone();
    tokio::spawn(async move {
        let task = state.spec.name.clone();
        let started = tokio::time::Instant::now();
        tracing::debug!(task = %task, "Task started");

        let handler = state.spec.handler.clone();
        match tokio::spawn(async move { handler().await }).await {
            Ok(Ok(())) => {
                tracing::debug!(
                    task = %task,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Task finished"
                );
            }
            Ok(Err(e)) => {
                state.failures.fetch_add(1, Ordering::SeqCst);
                tracing::error!(task = %task, error = %format!("{e:#}"), "Scheduled task failed");
            }
            Err(e) => {
                state.failures.fetch_add(1, Ordering::SeqCst);
                tracing::error!(task = %task, error = %e, "Scheduled task panicked");
            }
        }

        state.running.store(false, Ordering::SeqCst);
    });
}
