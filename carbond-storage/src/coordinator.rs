//! # Concurrency Coordinator
//!
//! Runs background workers on their own threads and lets the main thread swap
//! the runtime configuration only while every worker is parked at a checkpoint.
//!
//! ```text
//!            pause_all()              worker checkpoint
//!  Running ──────────────> PauseRequested ──────────────> Paused
//!     ▲                                                      │
//!     │      worker wakes           resume_all()             │
//!     └──────────────────── Resuming <───────────────────────┘
//! ```
//!
//! Workers capture the current snapshot once per iteration, after the
//! checkpoint, so a unit of work never sees two configurations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info};

use carbond_core::{error::{Error, Result}, RuntimeConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    PauseRequested,
    Paused,
    Resuming,
    Stopped,
}

/// What a worker wants after one unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    Continue,
    Idle(Duration),
}

/// A background loop body. One call is one unit of work between checkpoints.
pub trait Worker: Send + 'static {
    fn name(&self) -> &str;

    fn run_once(&mut self, config: &Arc<RuntimeConfig>) -> Pace;
}

struct WorkerControl {
    state: Mutex<WorkerState>,
    cond: Condvar,
}

impl WorkerControl {
    fn new() -> Self {
        Self {
            state: Mutex::new(WorkerState::Running),
            cond: Condvar::new(),
        }
    }

    fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    fn set(&self, next: WorkerState) {
        *self.state.lock() = next;
        self.cond.notify_all();
    }

    /// Park here if a pause was requested, until resumed
    fn checkpoint(&self) {
        let mut state = self.state.lock();
        if *state != WorkerState::PauseRequested {
            return;
        }
        *state = WorkerState::Paused;
        self.cond.notify_all();
        while *state == WorkerState::Paused {
            self.cond.wait(&mut state);
        }
        *state = WorkerState::Running;
        self.cond.notify_all();
    }

    /// Sleep up to `duration`, cut short by a pause request or shutdown
    fn idle(&self, duration: Duration, running: &AtomicBool) {
        let mut state = self.state.lock();
        if *state != WorkerState::Running || !running.load(Ordering::Acquire) {
            return;
        }
        self.cond.wait_for(&mut state, duration);
    }
}

/// Marks the worker stopped however its thread ends
struct StopGuard(Arc<WorkerControl>);

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.0.set(WorkerState::Stopped);
    }
}

struct WorkerHandle {
    name: String,
    control: Arc<WorkerControl>,
    thread: Option<JoinHandle<()>>,
}

pub struct Coordinator {
    config: Arc<RwLock<Arc<RuntimeConfig>>>,
    running: Arc<AtomicBool>,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl Coordinator {
    pub fn new(config: Arc<RuntimeConfig>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            running: Arc::new(AtomicBool::new(true)),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// The snapshot a unit of work started now would see
    pub fn current(&self) -> Arc<RuntimeConfig> {
        self.config.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn spawn<W: Worker>(&self, mut worker: W) -> Result<()> {
        if !self.is_running() {
            return Err(Error::Internal {
                message: format!("cannot spawn {} after shutdown", worker.name()),
            });
        }

        let name = worker.name().to_string();
        let control = Arc::new(WorkerControl::new());
        let config = self.config.clone();
        let running = self.running.clone();
        let thread_control = control.clone();

        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let control = thread_control;
                let _guard = StopGuard(control.clone());
                debug!(worker = worker.name(), "worker started");

                while running.load(Ordering::Acquire) {
                    control.checkpoint();
                    if !running.load(Ordering::Acquire) {
                        break;
                    }

                    let snapshot = config.read().clone();
                    match worker.run_once(&snapshot) {
                        Pace::Continue => {}
                        Pace::Idle(duration) => control.idle(duration, &running),
                    }
                }

                debug!(worker = worker.name(), "worker stopped");
            })
            .map_err(|e| Error::Internal {
                message: format!("failed to spawn worker {}: {}", name, e),
            })?;

        self.workers.lock().push(WorkerHandle {
            name,
            control,
            thread: Some(thread),
        });
        Ok(())
    }

    pub fn worker_states(&self) -> Vec<(String, WorkerState)> {
        self.workers
            .lock()
            .iter()
            .map(|w| (w.name.clone(), w.control.state()))
            .collect()
    }

    fn pause(workers: &[WorkerHandle]) {
        for worker in workers {
            let mut state = worker.control.state.lock();
            if *state == WorkerState::Running {
                *state = WorkerState::PauseRequested;
                worker.control.cond.notify_all();
            }
        }

        // The request is only answered once the worker itself parks
        for worker in workers {
            let mut state = worker.control.state.lock();
            while *state == WorkerState::PauseRequested {
                worker.control.cond.wait(&mut state);
            }
            debug!(worker = %worker.name, state = ?*state, "worker quiescent");
        }
    }

    fn resume(workers: &[WorkerHandle]) {
        for worker in workers {
            let mut state = worker.control.state.lock();
            if *state == WorkerState::Paused {
                *state = WorkerState::Resuming;
                worker.control.cond.notify_all();
            }
        }

        for worker in workers {
            let mut state = worker.control.state.lock();
            while *state == WorkerState::Resuming {
                worker.control.cond.wait(&mut state);
            }
        }
    }

    /// Park every worker at its checkpoint. Returns once all are paused or stopped.
    pub fn pause_all(&self) -> PauseGuard<'_> {
        let workers = self.workers.lock();
        Self::pause(&workers);
        PauseGuard {
            coordinator: self,
            workers: Some(workers),
        }
    }

    /// Swap in a new configuration while every worker is paused
    pub fn reconfigure(&self, next: Arc<RuntimeConfig>) {
        let guard = self.pause_all();
        let previous = std::mem::replace(&mut *self.config.write(), next);
        info!(
            from = previous.version,
            to = self.config.read().version,
            "configuration swapped"
        );
        guard.resume_all();
    }

    /// Clear the run flag, wake everyone and join all worker threads
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);

        let mut workers = self.workers.lock();
        for worker in workers.iter() {
            let mut state = worker.control.state.lock();
            if *state == WorkerState::Paused {
                *state = WorkerState::Resuming;
            }
            worker.control.cond.notify_all();
        }

        for worker in workers.iter_mut() {
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    error!(worker = %worker.name, "worker panicked");
                }
            }
        }
        info!(workers = workers.len(), "all workers stopped");
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if self.is_running() {
            self.shutdown();
        }
    }
}

/// Holds every worker paused. Dropping it resumes them.
pub struct PauseGuard<'a> {
    coordinator: &'a Coordinator,
    workers: Option<parking_lot::MutexGuard<'a, Vec<WorkerHandle>>>,
}

impl PauseGuard<'_> {
    pub fn worker_states(&self) -> Vec<(String, WorkerState)> {
        self.workers
            .iter()
            .flat_map(|workers| workers.iter())
            .map(|w| (w.name.clone(), w.control.state()))
            .collect()
    }

    pub fn resume_all(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(workers) = self.workers.take() {
            Coordinator::resume(&workers);
            debug!(running = self.coordinator.is_running(), "workers resumed");
        }
    }
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
