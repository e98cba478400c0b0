//! Runtime for stepcam: configuration, controller sessions and the
//! connectivity driver that feeds the capture state machines.

mod config;
mod driver;
mod gateway;

pub use config::{AppConfig, env_names};
pub use driver::{Driver, NotificationRouter};
pub use gateway::{LineGatewayConnector, LineGatewaySession, parse_line};
