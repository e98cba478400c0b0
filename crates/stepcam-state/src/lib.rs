//! Capture state machines for stepcam

mod config;
mod dispatch;
mod machine;
mod product;
mod scheduler;

#[cfg(test)]
mod testing;

pub use config::{StrategyEntry, StrategyTable};
pub use dispatch::CaptureDispatcher;
pub use machine::{
    PendingTask, StepEvent, StepMachine, StepMachineHandle, StepMachineState, StepSnapshot,
    spawn_step_machine,
};
pub use product::{ProductMachine, ProductMachineHandle, ProductMachineState, spawn_product_machine};
pub use scheduler::{Scheduler, TaskHandle, TaskId};
