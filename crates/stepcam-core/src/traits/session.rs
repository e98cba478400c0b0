use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::LinkError;
use crate::types::{Notification, VariableId};

/// Opens sessions to the controller. One connector lives for the whole
/// process; a new session is opened after every link loss.
#[async_trait]
pub trait ControllerConnector: Send + Sync {
    fn endpoint(&self) -> &str;

    async fn connect(&self) -> Result<Box<dyn ControllerSession>, LinkError>;
}

#[async_trait]
pub trait ControllerSession: Send {
    /// Subscribes to value changes of `variables`. The returned channel
    /// closes when the session is lost.
    async fn subscribe(
        &mut self,
        variables: &[VariableId],
    ) -> Result<mpsc::Receiver<Notification>, LinkError>;

    /// Cheap round trip used to detect a dead link.
    async fn probe(&mut self) -> Result<(), LinkError>;

    async fn disconnect(&mut self) -> Result<(), LinkError>;
}
