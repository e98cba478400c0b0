//! Deferred and recurring capture timers.
//!
//! The scheduler only decides *when* an action runs. It never touches machine
//! state: actions post a message back to the owning machine, which checks the
//! [`TaskId`] against its current pending task before acting. A timer that
//! loses the race against a cancel therefore has no effect.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    repeating: bool,
    cancelled: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_repeating(&self) -> bool {
        self.repeating
    }

    /// Stops the task. Safe to call any number of times, before or after the
    /// task has fired.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.join.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

#[derive(Debug, Default)]
pub struct Scheduler {
    next_id: AtomicU64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Runs `action` once after `delay`.
    pub fn schedule<F>(&self, delay: Duration, action: F) -> TaskHandle
    where
        F: FnOnce(TaskId) + Send + 'static,
    {
        let id = self.allocate();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();

        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::SeqCst) {
                tracing::debug!("[Scheduler] {} fired", id);
                action(id);
            }
        });

        TaskHandle {
            id,
            repeating: false,
            cancelled,
            join,
        }
    }

    /// Runs `action` every `period`, first after one full period. The task
    /// keeps the same id for every tick until it is cancelled.
    pub fn schedule_repeating<F>(&self, period: Duration, action: F) -> TaskHandle
    where
        F: Fn(TaskId) + Send + 'static,
    {
        let id = self.allocate();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();

        let join = tokio::spawn(async move {
            let Some(first) = Instant::now().checked_add(period) else {
                tracing::warn!(
                    "[Scheduler] {} period {:?} is out of range, never ticks",
                    id,
                    period
                );
                return;
            };
            let mut ticker = tokio::time::interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                tracing::debug!("[Scheduler] {} tick", id);
                action(id);
            }
        });

        TaskHandle {
            id,
            repeating: true,
            cancelled,
            join,
        }
    }
}
