use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{select, Receiver, Sender, TrySendError};
use tracing::{debug, trace};

use crate::config::{PacerConfig, PacerMode};
use crate::shutdown::ShutdownSignal;
use crate::turn::{TurnError, TurnProcess};

/// Capacity of the completed-turn event channel. Events past it are dropped.
pub const TURN_EVENT_CAPACITY: usize = 64;

/// Sets the turn cadence from inside the write step.
pub struct TurnPacer {
    cadence: Cadence,
    shutdown: Arc<ShutdownSignal>,
    events: Sender<u64>,
    turn: u64,
}

enum Cadence {
    Interval(Duration),
    Triggered(Receiver<()>),
}

impl TurnPacer {
    /// Fixed wall-clock cadence.
    pub fn automatic(interval: Duration, shutdown: Arc<ShutdownSignal>, events: Sender<u64>) -> Self {
        Self {
            cadence: Cadence::Interval(interval),
            shutdown,
            events,
            turn: 0,
        }
    }

    /// One turn per message received on `advance`.
    pub fn manual(advance: Receiver<()>, shutdown: Arc<ShutdownSignal>, events: Sender<u64>) -> Self {
        Self {
            cadence: Cadence::Triggered(advance),
            shutdown,
            events,
            turn: 0,
        }
    }

    /// Builds the pacer selected by `config`; `advance` is only consulted in
    /// manual mode.
    pub fn from_config(
        config: &PacerConfig,
        advance: Receiver<()>,
        shutdown: Arc<ShutdownSignal>,
        events: Sender<u64>,
    ) -> Self {
        match config.mode {
            PacerMode::Auto => Self::automatic(config.interval(), shutdown, events),
            PacerMode::Manual => Self::manual(advance, shutdown, events),
        }
    }

    pub fn mode(&self) -> PacerMode {
        match self.cadence {
            Cadence::Interval(_) => PacerMode::Auto,
            Cadence::Triggered(_) => PacerMode::Manual,
        }
    }

    fn publish(&self, completed: u64) {
        match self.events.try_send(completed) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                trace!(target: "power_market::turn", turn = completed, "turn_event.dropped");
            }
        }
    }
}

impl TurnProcess for TurnPacer {
    fn name(&self) -> &'static str {
        "pacer"
    }

    /// Every peer passed the last write barrier, so the previous turn is done.
    fn compute(&mut self) -> Result<(), TurnError> {
        if self.turn > 0 {
            let completed = self.turn - 1;
            debug!(target: "power_market::turn", turn = completed, "turn.completed");
            self.publish(completed);
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), TurnError> {
        match &self.cadence {
            Cadence::Interval(interval) => {
                if !self.shutdown.sleep(*interval) {
                    return Err(TurnError::Interrupted);
                }
            }
            Cadence::Triggered(advance) => {
                select! {
                    recv(advance) -> trigger => {
                        if trigger.is_err() {
                            return Err(TurnError::Interrupted);
                        }
                    }
                    recv(self.shutdown.listener()) -> _ => return Err(TurnError::Interrupted),
                }
            }
        }
        self.turn += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, unbounded};
    use std::time::Instant;

    #[test]
    fn manual_pacer_waits_for_trigger() {
        let shutdown = Arc::new(ShutdownSignal::new());
        let (advance_tx, advance_rx) = unbounded();
        let (events_tx, events_rx) = bounded(4);
        let mut pacer = TurnPacer::manual(advance_rx, Arc::clone(&shutdown), events_tx);
        assert_eq!(pacer.mode(), PacerMode::Manual);

        pacer.compute().expect("compute");
        assert!(events_rx.try_recv().is_err());

        advance_tx.send(()).expect("advance");
        pacer.commit().expect("commit");
        pacer.compute().expect("compute");
        assert_eq!(events_rx.try_recv(), Ok(0));

        shutdown.trigger();
        assert!(matches!(pacer.commit(), Err(TurnError::Interrupted)));
    }

    #[test]
    fn automatic_pacer_sleeps_its_interval() {
        let shutdown = Arc::new(ShutdownSignal::new());
        let (events_tx, _events_rx) = bounded(1);
        let mut pacer =
            TurnPacer::automatic(Duration::from_millis(30), Arc::clone(&shutdown), events_tx);
        let started = Instant::now();
        pacer.commit().expect("commit");
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn shutdown_cuts_the_interval_short() {
        let shutdown = Arc::new(ShutdownSignal::new());
        let (events_tx, _events_rx) = bounded(1);
        let mut pacer =
            TurnPacer::automatic(Duration::from_secs(60), Arc::clone(&shutdown), events_tx);
        shutdown.trigger();
        assert!(matches!(pacer.commit(), Err(TurnError::Interrupted)));
    }

    #[test]
    fn full_event_channel_drops_instead_of_blocking() {
        let shutdown = Arc::new(ShutdownSignal::new());
        let (events_tx, events_rx) = bounded(1);
        let mut pacer = TurnPacer::automatic(Duration::from_millis(1), shutdown, events_tx);
        for _ in 0..3 {
            pacer.commit().expect("commit");
            pacer.compute().expect("compute");
        }
        assert_eq!(events_rx.try_recv(), Ok(0));
        assert!(events_rx.try_recv().is_err());
    }
}
