//! Host connectivity signals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use catalog_core::traits::Connectivity;

/// Reports online unconditionally. Used when the host has no signal.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Connectivity flag the host flips from its own network listener.
///
/// Clones share the same flag.
#[derive(Clone, Debug)]
pub struct ConnectivityFlag {
    online: Arc<AtomicBool>,
}

impl ConnectivityFlag {
    /// Creates a flag in the given state.
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    /// Updates the flag.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for ConnectivityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for ConnectivityFlag {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_online() {
        assert!(AlwaysOnline.is_online());
    }

    #[test]
    fn test_flag_clones_share_state() {
        let flag = ConnectivityFlag::default();
        let observer = flag.clone();
        assert!(observer.is_online());

        flag.set_online(false);
        assert!(!observer.is_online());
    }
}
