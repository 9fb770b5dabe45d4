//! Cancellable delayed task
//!
//! A timer thread waits on a channel with a timeout: a timeout runs the task,
//! a disconnect (the handle was cancelled or dropped) abandons it.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Handle to a scheduled task. Dropping it cancels the task.
#[derive(Debug)]
pub struct DelayedTask {
    cancel: Option<Sender<()>>,
    fired: Arc<AtomicBool>,
    delay: Duration,
}

impl DelayedTask {
    pub fn schedule<F>(name: &str, delay: Duration, task: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = bounded::<()>(0);
        let fired = Arc::new(AtomicBool::new(false));
        let thread_fired = fired.clone();
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || match cancel_rx.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => {
                    thread_fired.store(true, Ordering::SeqCst);
                    task();
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            })?;
        Ok(Self {
            cancel: Some(cancel_tx),
            fired,
            delay,
        })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Not yet fired and not cancelled
    pub fn is_pending(&self) -> bool {
        self.cancel.is_some() && !self.fired.load(Ordering::SeqCst)
    }

    /// Abandon the task if it has not started yet. Safe to call from the task itself.
    pub fn cancel(&mut self) {
        self.cancel.take();
    }
}

impl Drop for DelayedTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_fires_after_delay() {
        let (tx, rx) = unbounded();
        let task = DelayedTask::schedule("test-timer", Duration::from_millis(20), move || {
            let _ = tx.send(());
        })
        .unwrap();
        assert!(task.is_pending());
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(!task.is_pending());
    }

    #[test]
    fn test_cancel_prevents_run() {
        let (tx, rx) = unbounded();
        let mut task = DelayedTask::schedule("test-timer", Duration::from_millis(50), move || {
            let _ = tx.send(());
        })
        .unwrap();
        task.cancel();
        assert!(!task.is_pending());
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_drop_cancels() {
        let (tx, rx) = unbounded();
        drop(
            DelayedTask::schedule("test-timer", Duration::from_millis(50), move || {
                let _ = tx.send(());
            })
            .unwrap(),
        );
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
