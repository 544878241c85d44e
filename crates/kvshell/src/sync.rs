//! One-shot guard used for the server's run-once and stop-once transitions
//! and for pool shutdown.

use core::sync::atomic::{AtomicBool, Ordering};

/// Executes an action at most once across all callers.
///
/// Unlike [`std::sync::Once`], [`fire`](OnceTrigger::fire) reports whether
/// *this* call was the one that ran the action, and losers never block on the
/// winner.
#[derive(Debug, Default)]
pub struct OnceTrigger {
    fired: AtomicBool,
}

impl OnceTrigger {
    pub const fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
        }
    }

    /// Runs `action` if no earlier call has. Returns `true` if it ran.
    pub fn fire(&self, action: impl FnOnce()) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            action();
            true
        } else {
            false
        }
    }
}
