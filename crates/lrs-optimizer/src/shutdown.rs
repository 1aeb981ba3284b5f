//! Cancellation for the poll wait.

use std::time::Duration;
use tokio::sync::watch;

/// Sending half: flips the sweep into cancelled state.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiving half, held by whatever waits between polls.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
    /// Set once the trigger has been dropped without cancelling.
    detached: bool,
}

impl ShutdownSignal {
    pub fn new() -> (ShutdownTrigger, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (
            ShutdownTrigger { tx },
            ShutdownSignal {
                rx,
                detached: false,
            },
        )
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        let (_trigger, signal) = Self::new();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `period` unless cancelled first. Returns `true` when the
    /// wait ended because of cancellation.
    pub async fn wait(&mut self, period: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let sleep = tokio::time::sleep(period);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                changed = self.rx.changed(), if !self.detached => match changed {
                    Ok(()) => {
                        if *self.rx.borrow() {
                            return true;
                        }
                    }
                    Err(_) => self.detached = true,
                },
                _ = &mut sleep => return false,
            }
        }
    }
}
