//! Worker identity, with a stack of named frames standing in for a call stack.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

use crate::error::DiagnosticError;

tokio::task_local! {
    static CURRENT_WORKER: WorkerHandle;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// `module_path!()` of the code that pushed the frame.
    pub module: &'static str,
    pub label: String,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {} ({})", self.label, self.module)
    }
}

struct WorkerState {
    name: String,
    frames: Mutex<Vec<Frame>>,
    finished: AtomicBool,
}

#[derive(Clone)]
pub struct WorkerHandle {
    state: Arc<WorkerState>,
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("name", &self.state.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl WorkerHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            state: Arc::new(WorkerState {
                name: name.into(),
                frames: Mutex::new(Vec::new()),
                finished: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// The handle of the worker scope the calling task runs in, if any.
    pub fn current() -> Option<WorkerHandle> {
        CURRENT_WORKER.try_with(|worker| worker.clone()).ok()
    }

    /// Runs `future` with this handle as the current worker.
    pub async fn scope<F: Future>(&self, future: F) -> F::Output {
        CURRENT_WORKER.scope(self.clone(), future).await
    }

    pub fn is_same(&self, other: &WorkerHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    pub fn enter(&self, module: &'static str, label: impl Into<String>) -> FrameGuard {
        let frame = Frame {
            module,
            label: label.into(),
        };
        match self.state.frames.lock() {
            Ok(mut frames) => frames.push(frame),
            Err(poisoned) => poisoned.into_inner().push(frame),
        }
        FrameGuard {
            state: self.state.clone(),
        }
    }

    /// Marks the worker as done. Later samples fail with `WorkerFinished`.
    pub fn finish(&self) {
        self.state.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::Acquire)
    }

    /// Best-effort snapshot of the worker's frames, innermost first.
    ///
    /// Never waits for the worker: if the frame stack is being modified at this
    /// very moment the sample is reported as unavailable.
    pub fn stack_sample(&self) -> Result<Vec<Frame>, DiagnosticError> {
        if self.is_finished() {
            return Err(DiagnosticError::WorkerFinished(self.state.name.clone()));
        }
        let frames = match self.state.frames.try_lock() {
            Ok(frames) => frames,
            Err(TryLockError::WouldBlock) | Err(TryLockError::Poisoned(_)) => {
                return Err(DiagnosticError::Unavailable(self.state.name.clone()));
            }
        };
        Ok(frames.iter().rev().cloned().collect())
    }

    /// Like [`Self::stack_sample`], keeping only frames pushed from modules
    /// under `module_prefix`.
    pub fn stack_sample_within(&self, module_prefix: &str) -> Result<Vec<Frame>, DiagnosticError> {
        Ok(self
            .stack_sample()?
            .into_iter()
            .filter(|frame| frame.module.starts_with(module_prefix))
            .collect())
    }
}

/// Pushes a frame on the current worker, if the caller runs inside one.
pub fn enter_current(module: &'static str, label: impl Into<String>) -> Option<FrameGuard> {
    WorkerHandle::current().map(|worker| worker.enter(module, label))
}

pub struct FrameGuard {
    state: Arc<WorkerState>,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        match self.state.frames.lock() {
            Ok(mut frames) => {
                frames.pop();
            }
            Err(poisoned) => {
                poisoned.into_inner().pop();
            }
        }
    }
}
