//! Product indicator edge trigger: one capture whenever the indicator goes
//! from negative to non-negative.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use stepcam_core::CaptureRequest;

use crate::dispatch::CaptureDispatcher;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProductMachineState {
    pub last_product_value: Option<f64>,
    pub has_seen_first_value: bool,
}

#[derive(Debug)]
enum ProductEvent {
    Value(f64),
    Snapshot(oneshot::Sender<ProductMachineState>),
}

#[derive(Debug)]
pub struct ProductMachine {
    dispatcher: CaptureDispatcher,
    state: ProductMachineState,
}

impl ProductMachine {
    pub fn new(dispatcher: CaptureDispatcher) -> Self {
        Self {
            dispatcher,
            state: ProductMachineState::default(),
        }
    }

    pub fn state(&self) -> &ProductMachineState {
        &self.state
    }

    /// Returns `true` when the value completed a negative to non-negative
    /// edge and a capture was issued.
    pub fn on_product_value(&mut self, raw_value: f64) -> bool {
        if !self.state.has_seen_first_value {
            self.state.has_seen_first_value = true;
            self.state.last_product_value = Some(raw_value);
            debug!("[ProductMachine] baseline {}", raw_value);
            return false;
        }

        let rising = matches!(self.state.last_product_value, Some(last) if last < 0.0)
            && raw_value >= 0.0;
        if rising {
            self.dispatcher.dispatch(CaptureRequest::product_change());
        }

        self.state.last_product_value = Some(raw_value);
        rising
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<ProductEvent>) {
        while let Some(event) = inbox.recv().await {
            match event {
                ProductEvent::Value(value) => {
                    self.on_product_value(value);
                }
                ProductEvent::Snapshot(reply) => {
                    let _ = reply.send(self.state);
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct ProductMachineHandle {
    mailbox: mpsc::UnboundedSender<ProductEvent>,
    join: Option<JoinHandle<()>>,
}

impl ProductMachineHandle {
    pub fn send(&self, value: f64) -> bool {
        self.mailbox.send(ProductEvent::Value(value)).is_ok()
    }

    pub async fn snapshot(&self) -> Option<ProductMachineState> {
        let (tx, rx) = oneshot::channel();
        self.mailbox.send(ProductEvent::Snapshot(tx)).ok()?;
        rx.await.ok()
    }

    pub async fn close(mut self) {
        let join = self.join.take();
        drop(self);
        if let Some(join) = join {
            let _ = join.await;
        }
    }
}

impl Drop for ProductMachineHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

pub fn spawn_product_machine(dispatcher: CaptureDispatcher) -> ProductMachineHandle {
    let (mailbox, inbox) = mpsc::unbounded_channel();
    let join = tokio::spawn(ProductMachine::new(dispatcher).run(inbox));
    ProductMachineHandle {
        mailbox,
        join: Some(join),
    }
}
