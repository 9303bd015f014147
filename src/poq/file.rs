//! File-property upload/download state machine (§4.4.5).
//!
//! A small bounded FIFO of file transfers. The head entry drives actions;
//! failures back off exponentially (15s doubling to a 300s cap) before
//! retrying, up to a configurable attempt count.

use std::{collections::VecDeque, time::Duration};

pub const DEFAULT_CAPACITY: usize = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
const BACKOFF_START: Duration = Duration::from_secs(15);
const BACKOFF_CAP: Duration = Duration::from_secs(300);

/// File-op state (§4.4.5).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileOpState {
    RdyFetch,
    Fetching,
    Fetched,
    FetchIndicated,
    RdyCreate,
    Creating,
    RdySend,
    Sending,
    TimerStart,
    TimerWait,
}

/// What to do with the FIFO when a hard connection failure occurs (§4.4.5,
/// §9): purge everything, or keep retrying. Exposed as a runtime option
/// rather than the source's compile-time switch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnFailurePolicy {
    Purge,
    Retry,
}

pub struct FileOp {
    pub prop: crate::poq::PropRef,
    pub path: String,
    pub state: FileOpState,
    pub retries: u32,
    backoff: Duration,
    pub ready_at: Option<std::time::Instant>,
    pub on_confirm: Option<Box<dyn FnOnce(bool) + Send>>,
}

impl FileOp {
    pub fn new_upload(prop: crate::poq::PropRef, path: impl Into<String>) -> Self {
        Self {
            prop,
            path: path.into(),
            state: FileOpState::RdyCreate,
            retries: 0,
            backoff: BACKOFF_START,
            ready_at: None,
            on_confirm: None,
        }
    }

    pub fn new_download(prop: crate::poq::PropRef, path: impl Into<String>) -> Self {
        Self {
            prop,
            path: path.into(),
            state: FileOpState::RdyFetch,
            retries: 0,
            backoff: BACKOFF_START,
            ready_at: None,
            on_confirm: None,
        }
    }

    fn reset_backoff(&mut self) {
        self.backoff = BACKOFF_START;
    }

    fn next_backoff(&mut self) -> Duration {
        let cur = self.backoff;
        self.backoff = (self.backoff * 2).min(BACKOFF_CAP);
        cur
    }
}

/// Bounded FIFO of file transfers plus the retry/backoff policy.
pub struct FileQueue {
    capacity: usize,
    max_retries: u32,
    policy: ConnFailurePolicy,
    ops: VecDeque<FileOp>,
}

impl FileQueue {
    pub fn new(capacity: usize, max_retries: u32, policy: ConnFailurePolicy) -> Self {
        Self { capacity, max_retries, policy, ops: VecDeque::new() }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Enqueues a transfer; fails if the FIFO is at capacity (§8: the
    /// (capacity+1)-th concurrent enqueue fails with `MEM`).
    pub fn enqueue(&mut self, op: FileOp) -> Result<(), crate::error::Error> {
        if self.ops.len() >= self.capacity {
            return Err(crate::error::Error::new(crate::error::ErrorKind::QueueFull));
        }
        self.ops.push_back(op);
        Ok(())
    }

    pub fn head(&self) -> Option<&FileOp> {
        self.ops.front()
    }

    pub fn head_mut(&mut self) -> Option<&mut FileOp> {
        self.ops.front_mut()
    }

    /// Records a transport-level error on the head entry: arms the backoff
    /// timer and resets it to `TimerWait`/`TimerStart`, unless it is a hard
    /// connection failure and the policy says to purge.
    pub fn on_error(&mut self, now: std::time::Instant, is_conn_failure: bool) {
        if is_conn_failure && self.policy == ConnFailurePolicy::Purge {
            self.ops.clear();
            return;
        }
        let Some(op) = self.ops.front_mut() else { return };
        op.retries += 1;
        if op.retries > self.max_retries {
            self.ops.pop_front();
            return;
        }
        let wait = op.next_backoff();
        op.state = FileOpState::TimerStart;
        op.ready_at = Some(now + wait);
    }

    /// Called once the armed timer fires: clears the deadline and marks the
    /// entry as having finished waiting. The caller (which knows the
    /// transfer's direction) follows up with [`Self::retry_ready_state`].
    pub fn on_timer_fire(&mut self) {
        if let Some(op) = self.ops.front_mut() {
            op.ready_at = None;
            op.state = FileOpState::TimerWait;
        }
    }

    /// Resolves the head entry's ready state back to its original
    /// fetch/create path after a backoff, and resets the backoff on success.
    pub fn retry_ready_state(&mut self, is_download: bool) {
        if let Some(op) = self.ops.front_mut() {
            op.state = if is_download { FileOpState::RdyFetch } else { FileOpState::RdyCreate };
        }
    }

    /// Marks terminal success: resets backoff, invokes the confirm callback,
    /// and dequeues the entry so the next one becomes head.
    pub fn complete(&mut self) {
        if let Some(mut op) = self.ops.pop_front() {
            op.reset_backoff();
            if let Some(cb) = op.on_confirm.take() {
                cb(true);
            }
        }
    }

    pub fn is_ready(&self, now: std::time::Instant) -> bool {
        match self.ops.front() {
            Some(op) => op.ready_at.map(|at| now >= at).unwrap_or(true),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn prop() -> crate::poq::PropRef {
        crate::poq::PropRef { address: "a".into(), subdevice: "00".into(), template: "t".into(), name: "f".into() }
    }

    #[test]
    fn capacity_plus_one_enqueue_fails() {
        let mut q = FileQueue::new(2, DEFAULT_MAX_RETRIES, ConnFailurePolicy::Retry);
        q.enqueue(FileOp::new_upload(prop(), "/tmp/a")).unwrap();
        q.enqueue(FileOp::new_upload(prop(), "/tmp/b")).unwrap();
        let err = q.enqueue(FileOp::new_upload(prop(), "/tmp/c")).unwrap_err();
        assert!(matches!(err.kind, crate::error::ErrorKind::QueueFull));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut q = FileQueue::new(DEFAULT_CAPACITY, 10, ConnFailurePolicy::Retry);
        q.enqueue(FileOp::new_upload(prop(), "/tmp/a")).unwrap();
        let now = Instant::now();
        q.on_error(now, false);
        let first_wait = q.head().unwrap().ready_at.unwrap() - now;
        assert_eq!(first_wait, Duration::from_secs(15));

        q.retry_ready_state(false);
        q.on_error(now, false);
        let second_wait = q.head().unwrap().ready_at.unwrap() - now;
        assert_eq!(second_wait, Duration::from_secs(30));
    }

    #[test]
    fn retry_cap_drops_entry() {
        let mut q = FileQueue::new(DEFAULT_CAPACITY, 1, ConnFailurePolicy::Retry);
        q.enqueue(FileOp::new_upload(prop(), "/tmp/a")).unwrap();
        let now = Instant::now();
        q.on_error(now, false); // retries = 1, still <= max
        assert_eq!(q.len(), 1);
        q.on_error(now, false); // retries = 2, exceeds max(1)
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn purge_policy_clears_fifo_on_conn_failure() {
        let mut q = FileQueue::new(DEFAULT_CAPACITY, 10, ConnFailurePolicy::Purge);
        q.enqueue(FileOp::new_upload(prop(), "/tmp/a")).unwrap();
        q.enqueue(FileOp::new_upload(prop(), "/tmp/b")).unwrap();
        q.on_error(Instant::now(), true);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn complete_dequeues_and_resets_backoff() {
        let mut q = FileQueue::new(DEFAULT_CAPACITY, 10, ConnFailurePolicy::Retry);
        q.enqueue(FileOp::new_upload(prop(), "/tmp/a")).unwrap();
        q.enqueue(FileOp::new_upload(prop(), "/tmp/b")).unwrap();
        q.complete();
        assert_eq!(q.len(), 1);
    }
}
