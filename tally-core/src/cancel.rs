//! Cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag for a run. Cheap to clone; long-running
/// stages check it between chunks, combinations, and file sections.
#[derive(Debug, Clone, Default)]
pub struct RunCancellation {
    flag: Arc<AtomicBool>,
}

impl RunCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the flag. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn as_atomic(&self) -> &AtomicBool {
        &self.flag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let c = RunCancellation::new();
        let c2 = c.clone();
        assert!(!c2.is_cancelled());
        c.cancel();
        assert!(c2.is_cancelled());
    }
}
