//! Coarse cancellation for in-flight ranking calls.
//!
//! A ranking call checks its token between stages (extraction, embedding,
//! indexing, querying). Cancelling does not interrupt a stage that is
//! already running; the call stops at the next boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
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

    /// Cancel this token on Ctrl+C.
    pub fn cancel_on_ctrlc(&self) -> Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            log::warn!("Received interrupt, cancelling at the next stage");
            token.cancel();
        })
    }
}
