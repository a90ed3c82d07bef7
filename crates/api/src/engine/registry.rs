//! Live worker processes and the jobs they serve.

use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use labelbench_core::types::JobId;
use tokio::process::Child;
use tokio::task::JoinHandle;

use super::launcher::LaunchError;

/// Interval between liveness checks while waiting out a grace period.
const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ProcessExit {
    /// Exit status could not be collected.
    pub const UNKNOWN: ProcessExit = ProcessExit {
        code: None,
        signal: None,
    };

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn describe(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("exit code {code}"),
            (None, Some(signal)) => format!("signal {signal}"),
            (None, None) => "unknown exit status".to_string(),
        }
    }
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

/// One spawned worker process.
///
/// The child is only reaped while its lock is held, and signals are only
/// sent under the same lock after confirming it has not been reaped, so a
/// recycled pid is never signalled.
pub struct ProcessHandle {
    pid: u32,
    job_ids: Vec<JobId>,
    child: tokio::sync::Mutex<Child>,
    exit: Mutex<Option<ProcessExit>>,
    cancel_requested: AtomicBool,
}

impl ProcessHandle {
    pub fn new(child: Child, job_ids: Vec<JobId>) -> Result<Self, LaunchError> {
        let pid = child.id().ok_or(LaunchError::NoPid)?;
        Ok(Self {
            pid,
            job_ids,
            child: tokio::sync::Mutex::new(child),
            exit: Mutex::new(None),
            cancel_requested: AtomicBool::new(false),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn job_ids(&self) -> &[JobId] {
        &self.job_ids
    }

    /// Exit status if the process has ended, without blocking.
    pub async fn poll_exit(&self) -> Option<ProcessExit> {
        if let Some(exit) = self.recorded_exit() {
            return Some(exit);
        }
        let mut child = self.child.lock().await;
        self.reap(&mut child)
    }

    pub async fn is_alive(&self) -> bool {
        self.poll_exit().await.is_none()
    }

    pub fn mark_cancel_requested(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Send SIGTERM, wait up to `grace` for the process to exit, then
    /// SIGKILL and wait for it. Returns the final exit status.
    pub async fn terminate(&self, grace: Duration) -> ProcessExit {
        {
            let mut child = self.child.lock().await;
            if let Some(exit) = self.reap(&mut child) {
                return exit;
            }
            // SAFETY: the child has not been reaped, so `pid` still refers to it.
            let rc = unsafe { libc::kill(self.pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                tracing::warn!(
                    pid = self.pid,
                    error = %std::io::Error::last_os_error(),
                    "Failed to send SIGTERM to worker",
                );
            }
        }

        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if let Some(exit) = self.poll_exit().await {
                return exit;
            }
            tokio::time::sleep(TERMINATE_POLL_INTERVAL).await;
        }

        tracing::warn!(
            pid = self.pid,
            grace_ms = grace.as_millis() as u64,
            "Worker ignored SIGTERM, killing",
        );
        let mut child = self.child.lock().await;
        if let Some(exit) = self.reap(&mut child) {
            return exit;
        }
        if let Err(e) = child.start_kill() {
            tracing::warn!(pid = self.pid, error = %e, "Failed to kill worker");
        }
        let exit = match child.wait().await {
            Ok(status) => ProcessExit::from(status),
            Err(e) => {
                tracing::warn!(pid = self.pid, error = %e, "Failed to collect worker exit");
                ProcessExit::UNKNOWN
            }
        };
        self.record_exit(exit);
        exit
    }

    fn recorded_exit(&self) -> Option<ProcessExit> {
        self.exit.lock().ok().and_then(|exit| *exit)
    }

    fn record_exit(&self, exit: ProcessExit) {
        if let Ok(mut slot) = self.exit.lock() {
            slot.get_or_insert(exit);
        }
    }

    fn reap(&self, child: &mut Child) -> Option<ProcessExit> {
        if let Some(exit) = self.recorded_exit() {
            return Some(exit);
        }
        let exit = match child.try_wait() {
            Ok(Some(status)) => ProcessExit::from(status),
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(pid = self.pid, error = %e, "Failed to poll worker");
                ProcessExit::UNKNOWN
            }
        };
        self.record_exit(exit);
        Some(exit)
    }
}

#[derive(Default)]
struct RegistryInner {
    by_pid: HashMap<u32, Arc<ProcessHandle>>,
    by_job: HashMap<JobId, u32>,
    watchdogs: HashMap<u32, JoinHandle<()>>,
}

/// Registered worker processes, indexed by pid and by job.
///
/// A process stays registered until its watchdog has reconciled every job
/// it served, so it keeps counting against the concurrency limit until then.
#[derive(Default)]
pub struct ProcessRegistry {
    inner: Mutex<RegistryInner>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: Arc<ProcessHandle>) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        for job_id in handle.job_ids() {
            inner.by_job.insert(*job_id, handle.pid());
        }
        inner.by_pid.insert(handle.pid(), handle);
    }

    pub fn deregister(&self, pid: u32) -> Option<Arc<ProcessHandle>> {
        let mut inner = self.inner.lock().ok()?;
        inner.watchdogs.remove(&pid);
        let handle = inner.by_pid.remove(&pid)?;
        for job_id in handle.job_ids() {
            if inner.by_job.get(job_id) == Some(&pid) {
                inner.by_job.remove(job_id);
            }
        }
        Some(handle)
    }

    /// Keep the watchdog task for `pid` so shutdown can wait for it. A
    /// watchdog that already deregistered its process is dropped.
    pub fn attach_watchdog(&self, pid: u32, watchdog: JoinHandle<()>) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.by_pid.contains_key(&pid) {
                inner.watchdogs.insert(pid, watchdog);
            }
        }
    }

    pub fn take_watchdogs(&self) -> Vec<JoinHandle<()>> {
        self.inner
            .lock()
            .map(|mut inner| inner.watchdogs.drain().map(|(_, h)| h).collect())
            .unwrap_or_default()
    }

    pub fn handle_for_job(&self, job_id: JobId) -> Option<Arc<ProcessHandle>> {
        let inner = self.inner.lock().ok()?;
        let pid = inner.by_job.get(&job_id)?;
        inner.by_pid.get(pid).cloned()
    }

    pub fn contains_job(&self, job_id: JobId) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.by_job.contains_key(&job_id))
            .unwrap_or(false)
    }

    pub fn live_process_count(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.by_pid.len())
            .unwrap_or(0)
    }

    pub fn handles(&self) -> Vec<Arc<ProcessHandle>> {
        self.inner
            .lock()
            .map(|inner| inner.by_pid.values().cloned().collect())
            .unwrap_or_default()
    }
}
