//! Recovery error types

use stepcam_core::LinkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("Gave up after {attempts} consecutive failed attempt(s): {last_error}")]
    MaxAttemptsExceeded { attempts: u32, last_error: LinkError },
}

/// Whether a link error happened before the session was established.
pub fn is_connect_failure(error: &LinkError) -> bool {
    matches!(
        error,
        LinkError::Connect { .. } | LinkError::Endpoint(_) | LinkError::Subscribe(_)
    )
}
