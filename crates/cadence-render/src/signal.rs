// SPDX-License-Identifier: CEPL-1.0
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Resize notification shared between the windowing layer and the frame
/// loop. Cloning yields another handle to the same flag.
#[derive(Clone, Debug, Default)]
pub struct ResizeSignal {
    flag: Arc<AtomicBool>,
}

impl ResizeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Clears the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let signal = ResizeSignal::new();
        let window_side = signal.clone();
        assert!(!signal.is_raised());

        window_side.notify();
        assert!(signal.is_raised());
        assert!(signal.take());
        assert!(!signal.take());
        assert!(!window_side.is_raised());
    }
}
