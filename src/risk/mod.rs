pub mod asset_class;
pub mod circuit_breaker;
pub mod cooldowns;
pub mod daily_stats;
pub mod intelligence;
pub mod rejections;

pub use asset_class::*;
pub use circuit_breaker::*;
pub use cooldowns::*;
pub use daily_stats::*;
pub use intelligence::*;
pub use rejections::*;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::warn;

/// Manual process-wide halt. Flipping it on blocks all new orders until an
/// operator clears it; the reason travels with the state snapshot.
#[derive(Debug, Default)]
pub struct KillSwitch {
    engaged: AtomicBool,
    reason: Mutex<String>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engage(&self, reason: &str) {
        self.engaged.store(true, Ordering::SeqCst);
        *self.reason.lock().unwrap_or_else(|p| p.into_inner()) = reason.to_string();
        warn!("[KILL] Kill switch engaged: {}", reason);
    }

    pub fn release(&self) {
        self.engaged.store(false, Ordering::SeqCst);
        self.reason.lock().unwrap_or_else(|p| p.into_inner()).clear();
        warn!("[KILL] Kill switch released");
    }

    /// Toggle and return the new state.
    pub fn toggle(&self, reason: &str) -> bool {
        if self.is_engaged() {
            self.release();
            false
        } else {
            self.engage(reason);
            true
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> String {
        self.reason
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kill_switch_toggle() {
        let kill = KillSwitch::new();
        assert!(!kill.is_engaged());
        assert!(kill.toggle("manual"));
        assert!(kill.is_engaged());
        assert_eq!(kill.reason(), "manual");
        assert!(!kill.toggle(""));
        assert!(!kill.is_engaged());
        assert_eq!(kill.reason(), "");
    }
}
