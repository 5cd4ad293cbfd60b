//! Cooperative run flag.
//!
//! Every long-poll loop checks the flag between polls and exits cleanly
//! after finishing any in-flight work once the flag is lowered. The binary
//! lowers it on an OS termination signal.

use std::sync::Arc;

use tokio::sync::watch;

/// Shared green/red flag for graceful shutdown.
#[derive(Clone)]
pub struct RunFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl RunFlag {
    /// A new flag, initially green.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    /// Whether loops should keep running.
    pub fn green(&self) -> bool {
        *self.tx.borrow()
    }

    /// Lower the flag; loops exit after their current iteration.
    pub fn lower(&self) {
        // send_replace updates the value even with no live receivers.
        self.tx.send_replace(false);
    }

    /// A receiver for select-style waiting on the flag changing.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_green_and_lowers() {
        let flag = RunFlag::new();
        assert!(flag.green());

        let clone = flag.clone();
        clone.lower();
        assert!(!flag.green());
    }

    #[tokio::test]
    async fn subscribers_observe_the_change() {
        let flag = RunFlag::new();
        let mut rx = flag.subscribe();

        flag.lower();
        rx.changed().await.unwrap();
        assert!(!*rx.borrow());
    }
}
