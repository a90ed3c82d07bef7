//! In-memory FIFO of work waiting for a worker process.
//!
//! Not persisted. After a restart the dispatcher recovers work by scanning
//! pending job rows instead.

use std::collections::VecDeque;
use std::sync::Mutex;

use labelbench_core::types::JobId;
use tokio::sync::Notify;

/// Jobs to run in one worker process, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub job_ids: Vec<JobId>,
}

impl WorkItem {
    pub fn single(job_id: JobId) -> Self {
        Self {
            job_ids: vec![job_id],
        }
    }

    pub fn batch(job_ids: Vec<JobId>) -> Self {
        Self { job_ids }
    }
}

#[derive(Default)]
pub struct SubmissionQueue {
    items: Mutex<VecDeque<WorkItem>>,
    notify: Notify,
}

impl SubmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item and wake the dispatcher.
    pub fn push(&self, item: WorkItem) {
        if item.job_ids.is_empty() {
            return;
        }
        if let Ok(mut items) = self.items.lock() {
            items.push_back(item);
        }
        self.notify.notify_one();
    }

    pub fn pop(&self) -> Option<WorkItem> {
        self.items.lock().ok()?.pop_front()
    }

    /// Drop `job_id` from every queued item, discarding items left empty.
    /// Returns whether the job was queued.
    pub fn remove_job(&self, job_id: JobId) -> bool {
        let Ok(mut items) = self.items.lock() else {
            return false;
        };
        let mut found = false;
        for item in items.iter_mut() {
            let before = item.job_ids.len();
            item.job_ids.retain(|id| *id != job_id);
            found |= item.job_ids.len() != before;
        }
        items.retain(|item| !item.job_ids.is_empty());
        found
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.items
            .lock()
            .map(|items| items.iter().any(|item| item.job_ids.contains(&job_id)))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves after the next [`push`](Self::push), or immediately if one
    /// happened since the last wait.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}
