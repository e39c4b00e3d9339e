use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::shutdown::ShutdownSignal;

/// Which sentiment score a shock degrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShockKind {
    Politics,
    Economy,
}

impl ShockKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ShockKind::Politics => "politics",
            ShockKind::Economy => "economy",
        }
    }
}

impl fmt::Display for ShockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Background emitter of degradation events, outside the turn protocol.
///
/// Sleeps a random duration in `(0, max_delay]`, then sends one event to the
/// market. Stops as soon as shutdown is signalled or the market stops listening.
pub struct ShockGenerator {
    kind: ShockKind,
    max_delay: Duration,
    sink: Sender<ShockKind>,
    rng: ChaCha8Rng,
}

impl ShockGenerator {
    pub fn new(kind: ShockKind, max_delay: Duration, sink: Sender<ShockKind>, seed: u64) -> Self {
        Self {
            kind,
            max_delay,
            sink,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn kind(&self) -> ShockKind {
        self.kind
    }

    /// Draws the wait before the next shock, uniformly from `(0, max_delay]`.
    pub fn next_delay(&mut self) -> Duration {
        let max_nanos = self.max_delay.as_nanos().clamp(1, u128::from(u64::MAX)) as u64;
        Duration::from_nanos(self.rng.gen_range(1..=max_nanos))
    }

    pub fn run(&mut self, shutdown: &ShutdownSignal) {
        info!(
            target: "power_market::shock",
            kind = %self.kind,
            max_delay_ms = self.max_delay.as_millis() as u64,
            "shock_generator.started"
        );
        let mut delivered = 0u64;
        loop {
            let delay = self.next_delay();
            if !shutdown.sleep(delay) {
                break;
            }
            if self.sink.send(self.kind).is_err() {
                debug!(
                    target: "power_market::shock",
                    kind = %self.kind,
                    "shock_generator.market_gone"
                );
                break;
            }
            delivered += 1;
            debug!(
                target: "power_market::shock",
                kind = %self.kind,
                delay_ms = delay.as_millis() as u64,
                "shock.delivered"
            );
        }
        info!(
            target: "power_market::shock",
            kind = %self.kind,
            delivered,
            "shock_generator.stopped"
        );
    }

    pub fn spawn(mut self, shutdown: Arc<ShutdownSignal>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("shock-{}", self.kind))
            .spawn(move || self.run(&shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn delays_stay_within_bounds() {
        let (sender, _receiver) = unbounded();
        let mut generator =
            ShockGenerator::new(ShockKind::Politics, Duration::from_millis(50), sender, 1);
        for _ in 0..1_000 {
            let delay = generator.next_delay();
            assert!(delay > Duration::ZERO);
            assert!(delay <= Duration::from_millis(50));
        }
    }

    #[test]
    fn emits_its_kind_until_shutdown() {
        let (sender, receiver) = unbounded();
        let shutdown = Arc::new(ShutdownSignal::new());
        let handle = ShockGenerator::new(ShockKind::Economy, Duration::from_millis(2), sender, 9)
            .spawn(Arc::clone(&shutdown))
            .expect("spawn shock generator");

        for _ in 0..3 {
            let kind = receiver
                .recv_timeout(Duration::from_secs(5))
                .expect("shock delivered");
            assert_eq!(kind, ShockKind::Economy);
        }
        shutdown.trigger();
        handle.join().expect("shock generator panicked");
    }

    #[test]
    fn stops_when_the_market_is_gone() {
        let (sender, receiver) = unbounded();
        drop(receiver);
        let shutdown = Arc::new(ShutdownSignal::new());
        let handle = ShockGenerator::new(ShockKind::Politics, Duration::from_millis(1), sender, 2)
            .spawn(shutdown)
            .expect("spawn shock generator");
        handle.join().expect("shock generator panicked");
    }
}
