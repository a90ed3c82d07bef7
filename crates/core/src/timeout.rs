//! Wall-clock deadlines for units of work.
//!
//! A [`TimeoutGuard`] captures its own deadline instant when started, so
//! guards nest: an inner guard finishing or timing out never moves the
//! outer deadline. Each guard is an independent countdown.
//!
//! Async work is interrupted by dropping its future at the deadline.
//! Blocking work cannot be interrupted: [`TimeoutGuard::run_blocking`]
//! reports the timeout and abandons the thread, and
//! [`TimeoutGuard::run_sync`] (for callers outside a runtime) only checks
//! the deadline after the closure returns.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum TimeoutError {
    #[error("{label} timed out after {}ms", elapsed.as_millis())]
    Elapsed { label: String, elapsed: Duration },

    #[error("{label} panicked")]
    Panicked { label: String },
}

#[derive(Debug, Clone)]
pub struct TimeoutGuard {
    label: String,
    started: Instant,
    deadline: Option<Instant>,
}

impl TimeoutGuard {
    /// Start a countdown of `deadline_secs` seconds.
    ///
    /// `None`, zero, negative or non-finite values produce an unbounded
    /// guard.
    pub fn start(label: impl Into<String>, deadline_secs: Option<f64>) -> Self {
        let budget = deadline_secs
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64);
        Self::start_with(label, budget)
    }

    /// Start a countdown from an optional duration. Zero means unbounded.
    pub fn start_with(label: impl Into<String>, budget: Option<Duration>) -> Self {
        let started = Instant::now();
        Self {
            label: label.into(),
            started,
            deadline: budget.filter(|d| !d.is_zero()).map(|d| started + d),
        }
    }

    pub fn unbounded(label: impl Into<String>) -> Self {
        Self::start_with(label, None)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_bounded(&self) -> bool {
        self.deadline.is_some()
    }

    /// Budget left before this guard fires. `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Drive `fut` until it completes or the deadline passes.
    ///
    /// On timeout the future is dropped, cancelling it at its current
    /// suspension point.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, TimeoutError> {
        match self.deadline {
            None => Ok(fut.await),
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| self.elapsed_error()),
        }
    }

    /// Run a blocking closure on the blocking pool under this deadline.
    ///
    /// On timeout the closure keeps running to completion on its thread and
    /// its result is discarded.
    pub async fn run_blocking<F, T>(&self, f: F) -> Result<T, TimeoutError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let handle = tokio::task::spawn_blocking(f);
        match self.run(handle).await? {
            Ok(value) => Ok(value),
            Err(_) => Err(TimeoutError::Panicked {
                label: self.label.clone(),
            }),
        }
    }

    /// Run `f` inline with no interruption, then check the deadline.
    ///
    /// For synchronous work that cannot be suspended, with or without a
    /// Tokio runtime. The bound is advisory: a closure that overruns still
    /// completes, and its result is replaced by a timeout error.
    pub fn run_sync<F, T>(&self, f: F) -> Result<T, TimeoutError>
    where
        F: FnOnce() -> T,
    {
        if self.is_bounded() && tokio::runtime::Handle::try_current().is_err() {
            tracing::debug!(label = %self.label, "No runtime: deadline checked after completion");
        }
        let value = f();
        match self.deadline {
            Some(deadline) if Instant::now() > deadline => Err(self.elapsed_error()),
            _ => Ok(value),
        }
    }

    fn elapsed_error(&self) -> TimeoutError {
        TimeoutError::Elapsed {
            label: self.label.clone(),
            elapsed: self.started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn non_positive_deadlines_are_unbounded() {
        assert!(!TimeoutGuard::start("a", None).is_bounded());
        assert!(!TimeoutGuard::start("b", Some(0.0)).is_bounded());
        assert!(!TimeoutGuard::start("c", Some(-3.0)).is_bounded());
        assert!(!TimeoutGuard::start("d", Some(f64::NAN)).is_bounded());
        assert!(TimeoutGuard::start("e", Some(0.5)).is_bounded());
    }

    #[tokio::test]
    async fn completes_within_deadline() {
        let guard = TimeoutGuard::start("fast", Some(1.0));
        let value = guard.run(async { 42 }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn times_out_with_label() {
        let guard = TimeoutGuard::start("image_001.jpg", Some(0.05));
        let err = guard
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_matches!(&err, TimeoutError::Elapsed { label, .. } if label == "image_001.jpg");
        assert!(err.to_string().starts_with("image_001.jpg timed out after"));
    }

    #[tokio::test]
    async fn inner_timeout_leaves_outer_budget_intact() {
        let outer = TimeoutGuard::start("unit", Some(2.0));

        let remaining = outer
            .run(async {
                let inner = TimeoutGuard::start("detect", Some(0.1));
                let inner_result = inner.run(tokio::time::sleep(Duration::from_secs(5))).await;
                assert!(inner_result.is_err());
                outer.remaining().unwrap()
            })
            .await
            .unwrap();

        assert!(remaining <= Duration::from_millis(1900), "{remaining:?}");
        assert!(remaining >= Duration::from_millis(1500), "{remaining:?}");
    }

    #[tokio::test]
    async fn inner_completion_does_not_extend_or_reset_outer() {
        let outer = TimeoutGuard::start("unit", Some(0.3));

        let result = outer
            .run(async {
                let inner = TimeoutGuard::start("crop", Some(10.0));
                inner.run(async {}).await.unwrap();
                tokio::time::sleep(Duration::from_secs(5)).await;
            })
            .await;

        assert!(result.is_err());
        assert!(outer.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn longer_inner_deadline_cannot_outlive_outer() {
        let outer = TimeoutGuard::start("unit", Some(0.1));
        let result = outer
            .run(async {
                let inner = TimeoutGuard::start("recognize", Some(30.0));
                inner.run(tokio::time::sleep(Duration::from_secs(5))).await
            })
            .await;

        assert_matches!(result, Err(TimeoutError::Elapsed { label, .. }) if label == "unit");
    }

    #[tokio::test]
    async fn blocking_work_is_bounded_but_not_interrupted() {
        let guard = TimeoutGuard::start("decode", Some(0.05));
        let result = guard
            .run_blocking(|| std::thread::sleep(Duration::from_millis(300)))
            .await;
        assert_matches!(result, Err(TimeoutError::Elapsed { .. }));
    }

    #[test]
    fn sync_run_checks_deadline_after_completion() {
        let guard = TimeoutGuard::start_with("sync", Some(Duration::from_millis(10)));
        let result = guard.run_sync(|| std::thread::sleep(Duration::from_millis(50)));
        assert_matches!(result, Err(TimeoutError::Elapsed { .. }));

        let unbounded = TimeoutGuard::unbounded("sync");
        assert_eq!(unbounded.run_sync(|| 7).unwrap(), 7);
    }
}
