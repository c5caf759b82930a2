//! Task notification for the main loop
//!
//! Producers (driver interrupts, the local stack thread, the CLI) signal
//! that mesh work is pending; the main loop blocks until signalled.
//! Notifications coalesce: any number of signals before a wait wake the
//! loop once.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

/// Sending half, cloned into every producer
#[derive(Clone)]
pub struct TaskNotifier {
    tx: Sender<()>,
}

/// Receiving half, owned by the main loop
pub struct TaskWaiter {
    rx: Receiver<()>,
}

/// Create a connected notifier/waiter pair
pub fn task_notification() -> (TaskNotifier, TaskWaiter) {
    let (tx, rx) = bounded(1);
    (TaskNotifier { tx }, TaskWaiter { rx })
}

impl TaskNotifier {
    pub fn notify(&self) {
        let _ = self.tx.try_send(());
    }

    /// Interrupt-context variant; returns whether this call raised a new notification
    pub fn notify_from_isr(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) | Err(TrySendError::Disconnected(())) => false,
        }
    }
}

impl TaskWaiter {
    /// Block until notified. Returns false once every notifier is gone.
    pub fn wait(&self) -> bool {
        self.rx.recv().is_ok()
    }

    /// Consume a pending notification without blocking
    pub fn take_pending(&self) -> bool {
        self.rx.try_recv().is_ok()
    }
}
