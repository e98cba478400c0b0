//! Step state machine.
//!
//! Every step value is mapped to a [`StrategyKind`] through the
//! [`StrategyTable`], and the machine decides which captures to issue and
//! which timers to arm. The machine runs as a single task that owns all of
//! its state: notifications, timer ticks and snapshot requests arrive
//! through one mailbox and are handled strictly one at a time, so a timer can
//! never act on state that a newer notification has already replaced.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use stepcam_core::{CaptureReport, CaptureRequest, StepKey, StrategyKind, important};

use crate::config::{StrategyEntry, StrategyTable};
use crate::dispatch::CaptureDispatcher;
use crate::scheduler::{Scheduler, TaskHandle, TaskId};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepMachineState {
    pub last_value: Option<f64>,
    pub last_strategy_kind: Option<StrategyKind>,
    pub has_seen_first_value: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTask {
    pub id: TaskId,
    pub step: StepKey,
    pub repeating: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepSnapshot {
    pub state: StepMachineState,
    pub pending: Option<PendingTask>,
}

#[derive(Debug)]
pub enum StepEvent {
    Value(f64),
    Fire(TaskId),
    Snapshot(oneshot::Sender<StepSnapshot>),
}

struct Pending {
    handle: TaskHandle,
    step: StepKey,
    /// Latest batch of a continuous capture; a tick is skipped while it runs.
    batch: Option<JoinHandle<CaptureReport>>,
}

pub struct StepMachine {
    table: Arc<StrategyTable>,
    dispatcher: CaptureDispatcher,
    scheduler: Scheduler,
    mailbox: mpsc::WeakUnboundedSender<StepEvent>,
    state: StepMachineState,
    pending: Option<Pending>,
}

impl StepMachine {
    /// Timer ticks are posted to `mailbox`; the machine holds it weakly so
    /// that dropping every handle stops the machine.
    pub fn new(
        table: Arc<StrategyTable>,
        dispatcher: CaptureDispatcher,
        mailbox: mpsc::WeakUnboundedSender<StepEvent>,
    ) -> Self {
        Self {
            table,
            dispatcher,
            scheduler: Scheduler::new(),
            mailbox,
            state: StepMachineState::default(),
            pending: None,
        }
    }

    pub fn state(&self) -> &StepMachineState {
        &self.state
    }

    pub fn snapshot(&self) -> StepSnapshot {
        StepSnapshot {
            state: self.state,
            pending: self.pending.as_ref().map(|p| PendingTask {
                id: p.handle.id(),
                step: p.step.clone(),
                repeating: p.handle.is_repeating(),
            }),
        }
    }

    pub fn handle_event(&mut self, event: StepEvent) {
        match event {
            StepEvent::Value(value) => self.on_value(value),
            StepEvent::Fire(id) => self.on_fire(id),
            StepEvent::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    pub fn on_value(&mut self, raw_value: f64) {
        let key = StepKey::from_value(raw_value);
        self.cancel_pending();

        let step_info = self.table.get(&key).copied();
        debug!("[StepMachine] {} -> {:?}", key, step_info);

        if !self.state.has_seen_first_value {
            self.state.has_seen_first_value = true;
            self.remember(raw_value, step_info);
            debug!("[StepMachine] baseline step {}", key);
            return;
        }

        if let Some(left) = self.left_dwell_step(&key, step_info.as_ref()) {
            self.dispatcher.dispatch(CaptureRequest::dwell_exit(&left));
        }

        if let Some(entry) = step_info {
            self.enter(key, entry);
        }

        self.remember(raw_value, step_info);
    }

    /// Handles a timer tick. Ticks from anything but the current pending
    /// task are stale and ignored.
    pub fn on_fire(&mut self, id: TaskId) {
        let Some(pending) = &mut self.pending else {
            debug!("[StepMachine] stale tick {} with nothing pending", id);
            return;
        };
        if pending.handle.id() != id || pending.handle.is_cancelled() {
            debug!("[StepMachine] stale tick {}", id);
            return;
        }

        let request = CaptureRequest::step(&pending.step);
        if !pending.handle.is_repeating() {
            self.pending = None;
            self.dispatcher.dispatch(request);
            return;
        }

        if pending.batch.as_ref().is_some_and(|batch| !batch.is_finished()) {
            debug!(
                "[StepMachine] {} skipped, previous batch for {} still running",
                id, pending.step
            );
            return;
        }
        pending.batch = Some(self.dispatcher.dispatch(request));
    }

    /// The step being left, when leaving an extended-dwell step for anything
    /// other than the same extended-dwell step.
    fn left_dwell_step(
        &self,
        key: &StepKey,
        step_info: Option<&StrategyEntry>,
    ) -> Option<StepKey> {
        if self.state.last_strategy_kind != Some(StrategyKind::ExtendedDwell) {
            return None;
        }
        let left = StepKey::from_value(self.state.last_value?);
        match step_info {
            Some(entry) if entry.kind == StrategyKind::ExtendedDwell && left == *key => None,
            _ => Some(left),
        }
    }

    fn enter(&mut self, key: StepKey, entry: StrategyEntry) {
        match entry.kind {
            StrategyKind::Immediate => {
                self.dispatcher.dispatch(CaptureRequest::step(&key));
            }
            StrategyKind::Delayed => {
                let handle = self.scheduler.schedule(entry.delay, self.tick_sender());
                debug!(
                    "[StepMachine] {} armed for {} in {:?}",
                    handle.id(),
                    key,
                    entry.delay
                );
                self.pending = Some(Pending {
                    handle,
                    step: key,
                    batch: None,
                });
            }
            StrategyKind::ExtendedDwell => {}
            StrategyKind::Continuous => {
                let batch = self.dispatcher.dispatch(CaptureRequest::step(&key));
                let handle = self
                    .scheduler
                    .schedule_repeating(entry.delay, self.tick_sender());
                debug!(
                    "[StepMachine] {} repeating for {} every {:?}",
                    handle.id(),
                    key,
                    entry.delay
                );
                self.pending = Some(Pending {
                    handle,
                    step: key,
                    batch: Some(batch),
                });
            }
        }
    }

    fn tick_sender(&self) -> impl Fn(TaskId) + Send + 'static {
        let mailbox = self.mailbox.clone();
        move |id| {
            if let Some(mailbox) = mailbox.upgrade() {
                let _ = mailbox.send(StepEvent::Fire(id));
            }
        }
    }

    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.handle.cancel();
            important!(
                "Cancelled pending capture for step {} due to new value",
                pending.step
            );
        }
    }

    fn remember(&mut self, raw_value: f64, step_info: Option<StrategyEntry>) {
        self.state.last_value = Some(raw_value);
        self.state.last_strategy_kind = step_info.map(|entry| entry.kind);
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<StepEvent>) {
        while let Some(event) = inbox.recv().await {
            self.handle_event(event);
        }
    }
}

impl Drop for StepMachine {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.handle.cancel();
        }
    }
}

/// Owning handle of a running step machine. Dropping it stops the machine
/// and cancels its pending capture.
#[derive(Debug)]
pub struct StepMachineHandle {
    mailbox: mpsc::UnboundedSender<StepEvent>,
    join: Option<JoinHandle<()>>,
}

impl StepMachineHandle {
    /// Queues a step value. Returns `false` once the machine has stopped.
    pub fn send(&self, value: f64) -> bool {
        self.mailbox.send(StepEvent::Value(value)).is_ok()
    }

    /// State after every previously sent value has been handled.
    pub async fn snapshot(&self) -> Option<StepSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.mailbox.send(StepEvent::Snapshot(tx)).ok()?;
        rx.await.ok()
    }

    /// Handles every queued value, then stops the machine. A pending
    /// capture is cancelled once the queue is drained.
    pub async fn close(mut self) {
        let join = self.join.take();
        drop(self);
        if let Some(join) = join {
            let _ = join.await;
        }
    }
}

impl Drop for StepMachineHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

pub fn spawn_step_machine(
    table: Arc<StrategyTable>,
    dispatcher: CaptureDispatcher,
) -> StepMachineHandle {
    let (mailbox, inbox) = mpsc::unbounded_channel();
    let machine = StepMachine::new(table, dispatcher, mailbox.downgrade());
    let join = tokio::spawn(machine.run(inbox));
    StepMachineHandle {
        mailbox,
        join: Some(join),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSink, settle};
    use std::time::Duration;
    use stepcam_core::CaptureReason;

    fn start(definition: &str) -> (StepMachineHandle, Arc<RecordingSink>) {
        let table = Arc::new(StrategyTable::parse(definition).unwrap());
        let sink = Arc::new(RecordingSink::new());
        let handle = spawn_step_machine(table, CaptureDispatcher::new(sink.clone()));
        (handle, sink)
    }

    async fn feed(handle: &StepMachineHandle, values: &[f64]) -> StepSnapshot {
        for value in values {
            assert!(handle.send(*value));
        }
        let snapshot = handle.snapshot().await.unwrap();
        settle().await;
        snapshot
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_value_is_baseline_only() {
        for definition in ["1;0;1", "1;5;1", "1;2;3", "1;30;2"] {
            let (handle, sink) = start(definition);
            let snapshot = feed(&handle, &[1.0]).await;

            assert!(snapshot.state.has_seen_first_value);
            assert_eq!(snapshot.state.last_value, Some(1.0));
            assert!(snapshot.pending.is_none());

            tokio::time::sleep(Duration::from_secs(60)).await;
            assert_eq!(sink.count(), 0, "table {}", definition);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_immediate_step_captures_on_second_value() {
        let (handle, sink) = start("1;0;1");
        let snapshot = feed(&handle, &[1.0, 1.0]).await;

        assert_eq!(sink.labels(), vec!["1.0"]);
        assert_eq!(sink.requests()[0].reason, CaptureReason::Step);
        assert!(snapshot.pending.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_capture_on_step_change() {
        let (handle, sink) = start("1;0;1,5;0;1");
        feed(&handle, &[1.0, 5.0]).await;
        assert_eq!(sink.labels(), vec!["5.0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmapped_step_captures_nothing() {
        let (handle, sink) = start("1;0;1");
        let snapshot = feed(&handle, &[1.0, 7.0, 8.0]).await;

        assert_eq!(sink.count(), 0);
        assert_eq!(snapshot.state.last_value, Some(8.0));
        assert_eq!(snapshot.state.last_strategy_kind, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_extended_dwell_captures_left_step() {
        let (handle, sink) = start("1;0;1,12;30;2");
        feed(&handle, &[1.0, 12.0]).await;

        // nothing while the dwell step is occupied
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(sink.count(), 0);

        feed(&handle, &[7.0]).await;
        let requests = sink.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].label, "12.0");
        assert_eq!(requests[0].reason, CaptureReason::ExitExtendedDwell);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extended_dwell_baseline_exit() {
        let (handle, sink) = start("12;30;2");
        feed(&handle, &[12.0, 7.0]).await;
        assert_eq!(
            sink.requests(),
            vec![CaptureRequest::dwell_exit(&StepKey::from_value(12.0))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_dwell_step_again_is_not_an_exit() {
        let (handle, sink) = start("12;30;2");
        feed(&handle, &[7.0, 12.0, 12.0, 12.0]).await;
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_moving_between_dwell_steps_captures_each_exit() {
        let (handle, sink) = start("12;30;2,13;30;2,5;0;1");
        feed(&handle, &[1.0, 12.0, 13.0, 5.0]).await;

        let requests = sink.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(
            requests[0],
            CaptureRequest::dwell_exit(&StepKey::from_value(12.0))
        );
        assert_eq!(
            requests[1],
            CaptureRequest::dwell_exit(&StepKey::from_value(13.0))
        );
        assert_eq!(requests[2], CaptureRequest::step(&StepKey::from_value(5.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_capture_fires_once() {
        let (handle, sink) = start("4;10;1");
        let snapshot = feed(&handle, &[1.0, 4.0]).await;

        let pending = snapshot.pending.unwrap();
        assert_eq!(pending.step.as_str(), "4.0");
        assert!(!pending.repeating);
        assert_eq!(sink.count(), 0);

        tokio::time::sleep(Duration::from_millis(9900)).await;
        assert_eq!(sink.count(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(sink.labels(), vec!["4.0"]);

        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.pending.is_none());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_value_cancels_delayed_capture() {
        let (handle, sink) = start("4;10;1");
        feed(&handle, &[1.0, 4.0]).await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        let snapshot = feed(&handle, &[7.0]).await;
        assert!(snapshot.pending.is_none());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reentering_delayed_step_keeps_latest_schedule_only() {
        let (handle, sink) = start("4;10;1");
        let first = feed(&handle, &[1.0, 4.0]).await.pending.unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        let second = feed(&handle, &[4.0]).await.pending.unwrap();
        assert_ne!(first.id, second.id);

        // the first schedule would have fired at t=10s
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(sink.count(), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sink.labels(), vec!["4.0"]);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_capture_repeats_until_left() {
        let (handle, sink) = start("6;2;3");
        let snapshot = feed(&handle, &[0.0, 6.0]).await;
        assert!(snapshot.pending.unwrap().repeating);
        assert_eq!(sink.count(), 1);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(sink.count(), 2);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(sink.count(), 3);
        assert!(sink.labels().iter().all(|label| label == "6.0"));

        let snapshot = feed(&handle, &[7.0]).await;
        assert!(snapshot.pending.is_none());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sink.count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_tick_waits_for_running_batch() {
        let table = Arc::new(StrategyTable::parse("6;2;3").unwrap());
        let sink = Arc::new(RecordingSink::with_latency(Duration::from_secs(5)));
        let handle = spawn_step_machine(table, CaptureDispatcher::new(sink.clone()));
        feed(&handle, &[0.0, 6.0]).await;
        assert_eq!(sink.count(), 1);

        // ticks at 2s and 4s fall inside the first batch
        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(sink.count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.count(), 2);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(sink.count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_tick_is_ignored() {
        let table = Arc::new(StrategyTable::parse("4;10;1").unwrap());
        let sink = Arc::new(RecordingSink::new());
        let (mailbox, _inbox) = mpsc::unbounded_channel();
        let mut machine =
            StepMachine::new(table, CaptureDispatcher::new(sink.clone()), mailbox.downgrade());

        machine.on_value(1.0);
        machine.on_value(4.0);
        let old = machine.snapshot().pending.unwrap().id;
        machine.on_value(4.0);

        machine.on_fire(old);
        settle().await;
        assert_eq!(sink.count(), 0);
        assert!(machine.snapshot().pending.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_cancels_pending_work() {
        let (handle, sink) = start("6;2;3");
        feed(&handle, &[0.0, 6.0]).await;
        assert_eq!(sink.count(), 1);

        drop(handle);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_drains_queued_values() {
        let (handle, sink) = start("1;0;1,5;0;1,6;2;3");
        handle.send(1.0);
        handle.send(5.0);
        handle.send(6.0);
        handle.close().await;
        settle().await;
        let mut labels = sink.labels();
        labels.sort();
        assert_eq!(labels, vec!["5.0", "6.0"]);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sink.count(), 2);
    }
}
