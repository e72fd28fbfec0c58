use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use crate::core::error::{Error, Result};

/// Cooperative cancellation flag, checked between files
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::cancelled());
        }
        Ok(())
    }
}

pub(crate) fn check_cancelled(token: Option<&CancellationToken>) -> Result<()> {
    match token {
        Some(token) => token.check(),
        None => Ok(()),
    }
}
