use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Run-wide cancellation flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Raises the flag once `after` has elapsed.
    pub fn cancel_after(&self, after: Duration) {
        let token = self.clone();
        let spawned = thread::Builder::new()
            .name("dump-deadline".to_string())
            .spawn(move || {
                thread::sleep(after);
                if !token.is_cancelled() {
                    warn!(after_secs = after.as_secs_f64(), "Run deadline reached, cancelling");
                    token.cancel();
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "Failed to start deadline timer");
        }
    }
}
