use crate::error::{ServeError, SupervisorError};
use log::{error, info, warn};
use std::any::Any;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Restarts the serving entry point after a panic
///
/// Each attempt runs in its own task. A panic is logged and the entry point
/// is started again after an exponential backoff. Once more than
/// `max_restarts` panics happen without a stable run in between, the
/// supervisor gives up. An error returned by the entry point (such as a bind
/// failure) is fatal and never retried.
#[derive(Debug, Clone)]
pub struct Supervisor {
    max_restarts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    stable_after: Duration,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(5)
    }
}

impl Supervisor {
    /// Create a supervisor with the default backoff schedule
    ///
    /// # Arguments
    ///
    /// * `max_restarts` - Panics tolerated without a stable run in between
    ///
    /// # Returns
    ///
    /// A supervisor backing off from 1 s to 60 s that resets after five
    /// minutes of stable running.
    pub fn new(max_restarts: u32) -> Self {
        Self {
            max_restarts,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            stable_after: Duration::from_secs(300),
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// An attempt running at least this long resets the restart count
    pub fn with_stable_after(mut self, stable_after: Duration) -> Self {
        self.stable_after = stable_after;
        self
    }

    /// Run `entry` until it returns, restarting it when it panics
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError::Serve` if the entry point fails, and
    /// `SupervisorError::RestartLimitExceeded` once the restart budget is spent.
    pub async fn run<F, Fut>(&self, mut entry: F) -> Result<(), SupervisorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), ServeError>> + Send + 'static,
    {
        let mut restarts = 0u32;
        let mut backoff = self.initial_backoff;

        loop {
            let started = Instant::now();

            match tokio::spawn(entry()).await {
                Ok(Ok(())) => {
                    info!("Server stopped");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    error!("Server failed: {}", e);
                    return Err(SupervisorError::Serve(e));
                }
                Err(join_error) if join_error.is_panic() => {
                    let message = panic_message(join_error.into_panic());
                    error!("Server panicked: {}", message);

                    if started.elapsed() >= self.stable_after {
                        restarts = 0;
                        backoff = self.initial_backoff;
                    }

                    if restarts >= self.max_restarts {
                        error!("Restart limit of {} reached, giving up", self.max_restarts);
                        return Err(SupervisorError::RestartLimitExceeded { restarts });
                    }
                    restarts += 1;

                    warn!(
                        "Restarting server in {:?} (restart {}/{})",
                        backoff, restarts, self.max_restarts
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff, self.max_backoff);
                }
                Err(_) => return Err(SupervisorError::Cancelled),
            }
        }
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    std::cmp::min(current.saturating_mul(2), max)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
