use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::warn;

/// Suite wide interrupt flag, shared by the scheduler, every supervised trial and the
/// signal handler
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// cancel on SIGINT/ SIGTERM, in-flight solvers are terminated by their workers
    pub fn install_handler(&self) -> Result<(), ctrlc::Error> {
        let cancellation = self.clone();

        ctrlc::set_handler(move || {
            if !cancellation.is_cancelled() {
                warn!("Interrupted, terminating running solvers");
            }
            cancellation.cancel();
        })
    }
}
