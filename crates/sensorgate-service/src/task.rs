//! Cancellable background task handle.

use std::fmt;
use std::future::Future;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

/// A spawned service loop that can be stopped and joined once.
pub struct ServiceTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ServiceTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceTask")
            .field("name", &self.name)
            .field("stopped", &self.cancel.is_cancelled())
            .finish()
    }
}

impl ServiceTask {
    /// Spawn `make(cancel)` under a span named after the task.
    pub fn spawn<F, Fut>(name: &'static str, make: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let future = make(cancel.clone());
        let handle = tokio::spawn(future.instrument(info_span!("service", task = name)));
        Self {
            name,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Task name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the loop has exited.
    pub async fn is_finished(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_none_or(JoinHandle::is_finished)
    }

    /// Signal the loop and wait for it. Later calls return immediately.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("{} task ended abnormally: {}", self.name, e);
            }
            info!("{} stopped", self.name);
        }
    }
}
