//! Cooperative cancellation shared between the Ctrl-C handler and workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Route Ctrl-C to `token`. A second Ctrl-C while the first is still being
/// honoured exits immediately.
pub fn install_interrupt_handler(token: &CancelToken) -> Result<(), ctrlc::Error> {
    let token = token.clone();
    ctrlc::set_handler(move || {
        if token.is_cancelled() {
            eprintln!("\nForced exit.");
            std::process::exit(130);
        }
        eprintln!("\n  == Operation was interrupted by the user. ==");
        token.cancel();
    })
}

/// Swallow Ctrl-C entirely. Child workers use this so that the file they are
/// writing is always committed; the parent decides when to stop.
pub fn ignore_interrupts() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(|| {})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
