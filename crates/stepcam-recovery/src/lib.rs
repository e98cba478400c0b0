//! Reconnect and backoff handling for controller sessions

mod config;
mod error;
mod manager;

pub use config::*;
pub use error::*;
pub use manager::*;
