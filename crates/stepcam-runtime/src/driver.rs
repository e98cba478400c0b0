//! Connectivity driver.
//!
//! Owns the session to the controller, subscribes to the step and product
//! variables and routes every data change to its state machine. Any link
//! error ends the session; the reconnect loop then waits out the backoff and
//! starts over with freshly built machines, so nothing scheduled by an old
//! session survives into the next one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::debug;

use stepcam_core::{
    CaptureSink, ControllerConnector, ControllerSession, LinkError, Notification, VariableId,
    important, quantize,
};
use stepcam_recovery::{ReconnectConfig, ReconnectManager, RecoveryError};
use stepcam_state::{
    CaptureDispatcher, ProductMachineHandle, StepMachineHandle, StrategyTable,
    spawn_product_machine, spawn_step_machine,
};

use crate::config::AppConfig;
use crate::gateway::LineGatewayConnector;

/// Routes notifications of one session to that session's machines.
pub struct NotificationRouter {
    step_variable: VariableId,
    product_variable: VariableId,
    step: StepMachineHandle,
    product: ProductMachineHandle,
}

impl NotificationRouter {
    pub fn new(
        step_variable: VariableId,
        product_variable: VariableId,
        table: Arc<StrategyTable>,
        dispatcher: CaptureDispatcher,
    ) -> Self {
        Self {
            step_variable,
            product_variable,
            step: spawn_step_machine(table, dispatcher.clone()),
            product: spawn_product_machine(dispatcher),
        }
    }

    pub fn route(&self, notification: Notification) {
        let value = quantize(notification.value);

        if notification.variable == self.product_variable {
            debug!(
                "[Driver] product value {} at {}",
                value, notification.timestamp
            );
            self.product.send(value);
        } else if notification.variable == self.step_variable {
            important!(
                "Data change on {}: New value = {}",
                notification.variable,
                value
            );
            debug!("[Driver] step value {} at {}", value, notification.timestamp);
            self.step.send(value);
        } else {
            debug!(
                "[Driver] ignoring change on unknown variable {} at {}",
                notification.variable, notification.timestamp
            );
        }
    }

    pub fn step(&self) -> &StepMachineHandle {
        &self.step
    }

    pub fn product(&self) -> &ProductMachineHandle {
        &self.product
    }

    /// Lets both machines handle what was already routed, then stops them.
    pub async fn close(self) {
        self.step.close().await;
        self.product.close().await;
    }
}

pub struct Driver {
    connector: Arc<dyn ControllerConnector>,
    table: Arc<StrategyTable>,
    dispatcher: CaptureDispatcher,
    step_variable: VariableId,
    product_variable: VariableId,
    probe_interval: Duration,
    recovery: ReconnectManager,
}

impl Driver {
    pub fn new(
        config: &AppConfig,
        table: Arc<StrategyTable>,
        sink: Arc<dyn CaptureSink>,
        connector: Arc<dyn ControllerConnector>,
    ) -> Self {
        Self {
            connector,
            table,
            dispatcher: CaptureDispatcher::new(sink),
            step_variable: config.step_variable_id(),
            product_variable: config.product_variable_id(),
            probe_interval: config.probe_interval(),
            recovery: ReconnectManager::new(config.reconnect.clone()),
        }
    }

    /// Driver wired to a file capture sink and a line-gateway session at
    /// `controller_url`. A probe gets one probe interval to be answered.
    pub fn from_config(config: &AppConfig) -> stepcam_core::Result<Self> {
        let table = Arc::new(config.build_strategy_table()?);
        let sink = Arc::new(config.build_capture_sink()?);
        let connector = Arc::new(
            LineGatewayConnector::new(&config.controller_url)?
                .with_reply_timeout(config.probe_interval()),
        );
        Ok(Self::new(config, table, sink, connector))
    }

    pub fn table(&self) -> &StrategyTable {
        &self.table
    }

    pub fn endpoint(&self) -> &str {
        self.connector.endpoint()
    }

    pub fn with_reconnect(mut self, config: ReconnectConfig) -> Self {
        self.recovery = ReconnectManager::new(config);
        self
    }

    /// Runs sessions until `shutdown` turns `true` (or its sender is
    /// dropped), reconnecting after every link error.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), RecoveryError> {
        let endpoint = self.connector.endpoint().to_string();
        self.recovery
            .run(&endpoint, |_| self.run_session(shutdown.clone()))
            .await
    }

    async fn run_session(&self, shutdown: watch::Receiver<bool>) -> Result<(), LinkError> {
        if *shutdown.borrow() {
            return Ok(());
        }

        let mut session = self.connector.connect().await?;
        important!("Connected to {}", self.connector.endpoint());

        let result = self.serve(session.as_mut(), shutdown).await;

        match session.disconnect().await {
            Ok(()) => important!("Client disconnected."),
            Err(e) => debug!("[Driver] disconnect failed: {}", e),
        }
        result
    }

    async fn serve(
        &self,
        session: &mut dyn ControllerSession,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), LinkError> {
        let variables = [self.step_variable.clone(), self.product_variable.clone()];
        let mut notifications = session.subscribe(&variables).await?;
        important!("Subscription created, waiting for events...");

        let router = NotificationRouter::new(
            self.step_variable.clone(),
            self.product_variable.clone(),
            self.table.clone(),
            self.dispatcher.clone(),
        );

        let result = self
            .pump(session, &mut notifications, &router, shutdown)
            .await;
        router.close().await;
        result
    }

    async fn pump(
        &self,
        session: &mut dyn ControllerSession,
        notifications: &mut mpsc::Receiver<Notification>,
        router: &NotificationRouter,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), LinkError> {
        let mut probe = tokio::time::interval(self.probe_interval);
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);
        probe.tick().await;

        loop {
            tokio::select! {
                notification = notifications.recv() => match notification {
                    Some(notification) => router.route(notification),
                    None => return Err(LinkError::Closed),
                },
                _ = probe.tick() => session.probe().await?,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("[Driver] shutdown requested");
                        return Ok(());
                    }
                }
            }
        }
    }
}
