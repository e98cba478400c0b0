//! Operator-facing log severity.
//!
//! Operators run the service with everything below warnings filtered out,
//! except for events emitted on the [`IMPORTANT_TARGET`] target. Saved and
//! failed pictures, connection changes and step changes go through
//! [`important!`](crate::important) so they stay visible under that filter.

/// Tracing target used for operator-facing events.
pub const IMPORTANT_TARGET: &str = "important";

/// Emits an INFO event on the `important` target.
#[macro_export]
macro_rules! important {
    ($($arg:tt)+) => {
        $crate::__tracing::info!(target: "important", $($arg)+)
    };
}
