use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

/// Process-wide stop flag that blocked receivers can also select on.
///
/// Nothing is ever sent on the inner channel. Triggering drops the only
/// sender, so every `recv` on [`ShutdownSignal::listener`] wakes up with a
/// disconnection error at the same moment.
#[derive(Debug)]
pub struct ShutdownSignal {
    triggered: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    listener: Receiver<()>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, receiver) = bounded::<()>(0);
        Self {
            triggered: AtomicBool::new(false),
            trigger: Mutex::new(Some(sender)),
            listener: receiver,
        }
    }

    /// Returns `true` only for the call that actually flipped the signal.
    pub fn trigger(&self) -> bool {
        let sender = self
            .trigger
            .lock()
            .expect("shutdown trigger mutex poisoned")
            .take();
        self.triggered.store(true, Ordering::SeqCst);
        sender.is_some()
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Channel to place in a `select!`; it only ever yields a disconnection.
    pub fn listener(&self) -> &Receiver<()> {
        &self.listener
    }

    /// Sleeps for `duration` unless shutdown arrives first.
    ///
    /// Returns `false` when the sleep was cut short.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }
        matches!(
            self.listener.recv_timeout(duration),
            Err(RecvTimeoutError::Timeout)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn trigger_is_reported_once() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());
        assert!(signal.trigger());
        assert!(!signal.trigger());
        assert!(signal.is_triggered());
    }

    #[test]
    fn sleep_completes_without_trigger() {
        let signal = ShutdownSignal::new();
        assert!(signal.sleep(Duration::from_millis(5)));
    }

    #[test]
    fn trigger_wakes_sleeping_thread() {
        let signal = Arc::new(ShutdownSignal::new());
        let sleeper = Arc::clone(&signal);
        let started = Instant::now();
        let handle = thread::spawn(move || sleeper.sleep(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        signal.trigger();
        let completed = handle.join().expect("sleeper thread panicked");
        assert!(!completed);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
