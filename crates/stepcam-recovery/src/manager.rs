//! Reconnect loop with backoff

use std::future::Future;

use stepcam_core::LinkError;

use super::{ReconnectConfig, RecoveryError, is_connect_failure};

#[derive(Debug, Clone, Default)]
pub struct ReconnectManager {
    config: ReconnectConfig,
}

impl ReconnectManager {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    /// Runs `session` until it returns `Ok`, waiting out the backoff after
    /// every [`LinkError`]. `session` receives the 1-based attempt number.
    ///
    /// Only consecutive connect failures count towards `max_attempts`; a
    /// session that was established and then lost starts the count over.
    pub async fn run<F, Fut>(&self, name: &str, mut session: F) -> Result<(), RecoveryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<(), LinkError>>,
    {
        let mut attempt = 0u32;
        let mut failures = 0u32;

        loop {
            attempt += 1;

            let error = match session(attempt).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            failures = if is_connect_failure(&error) {
                failures + 1
            } else {
                1
            };

            if let Some(max) = self.config.max_attempts {
                if failures >= max {
                    return Err(RecoveryError::MaxAttemptsExceeded {
                        attempts: failures,
                        last_error: error,
                    });
                }
            }

            let wait = self.config.backoff.delay_for(failures);
            tracing::error!(
                "[Recovery] {} failed (attempt {}): {}. Reconnecting in {:?}",
                name,
                attempt,
                error,
                wait
            );

            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BackoffConfig;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    fn refused() -> LinkError {
        LinkError::Connect {
            endpoint: "tcp://plc:4840".into(),
            reason: "connection refused".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_fixed_backoff() {
        let manager = ReconnectManager::default();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let started = Instant::now();

        let result = manager
            .run("controller", |_| {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(refused())
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(started.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let manager = ReconnectManager::new(ReconnectConfig {
            backoff: BackoffConfig::fixed(Duration::from_secs(1)),
            max_attempts: Some(3),
        });

        let result = manager
            .run("controller", |_| async { Err(refused()) })
            .await;

        match result {
            Err(RecoveryError::MaxAttemptsExceeded { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_sessions_reset_the_failure_count() {
        let manager = ReconnectManager::new(ReconnectConfig {
            backoff: BackoffConfig::fixed(Duration::from_secs(1)),
            max_attempts: Some(2),
        });

        let result = manager
            .run("controller", |attempt| async move {
                match attempt {
                    1 => Err(refused()),
                    2..=4 => Err(LinkError::Closed),
                    _ => Ok(()),
                }
            })
            .await;

        assert!(result.is_ok());
    }
}
