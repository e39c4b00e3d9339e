//! Wires every entity together and owns their threads.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;
use tracing::{error, info};

use crate::bus::SettlementBus;
use crate::city::CityManager;
use crate::config::{PacerMode, SimulationConfig, SimulationConfigError};
use crate::market::{MarketEngine, MarketLinks};
use crate::metrics::{MarketMetrics, MetricsHandle, SettlementSummary};
use crate::pacer::{TurnPacer, TURN_EVENT_CAPACITY};
use crate::shared::{SharedState, WeatherConditions};
use crate::shock::{ShockGenerator, ShockKind};
use crate::shutdown::ShutdownSignal;
use crate::turn::{spawn_turn_process, TurnError, TurnProcess};
use crate::weather::WeatherGenerator;

const WEATHER_SEED_SALT: u64 = 0x5745_4154_4845_5221;
const SHOCK_SEED_SALT: u64 = 0x5348_4f43_4b53_2121;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] SimulationConfigError),
    #[error("failed to spawn simulation thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to build settlement worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    #[error("household setup failed: {0}")]
    Household(#[from] TurnError),
    #[error("turns advance on their own in auto pacing mode")]
    AutoPaced,
    #[error("simulation has been shut down")]
    Stopped,
}

/// A running simulation. Dropping it shuts everything down.
pub struct Simulation {
    config: SimulationConfig,
    shared: Arc<SharedState>,
    shutdown: Arc<ShutdownSignal>,
    metrics: MetricsHandle,
    advance: Sender<()>,
    turn_events: Receiver<u64>,
    city: Option<JoinHandle<()>>,
    weather: Option<JoinHandle<()>>,
    pacer: Option<JoinHandle<()>>,
    market: Option<JoinHandle<()>>,
    shock_generators: Vec<JoinHandle<()>>,
    stopped: bool,
}

impl Simulation {
    /// Validates `config` and starts every entity thread.
    pub fn start(config: SimulationConfig) -> Result<Self, SimulationError> {
        config.validate()?;

        let shared = Arc::new(SharedState::new(
            config.market.price,
            WeatherConditions {
                temperature: config.weather.temperature,
                cloud_cover: config.weather.cloud_cover,
            },
        ));
        let shutdown = Arc::new(ShutdownSignal::new());
        let metrics = MarketMetrics::handle(config.metrics_history_limit);
        let (advance, advance_rx) = unbounded();
        let (events_tx, turn_events) = bounded(TURN_EVENT_CAPACITY);

        let mut simulation = Self {
            config,
            shared,
            shutdown,
            metrics,
            advance,
            turn_events,
            city: None,
            weather: None,
            pacer: None,
            market: None,
            shock_generators: Vec::new(),
            stopped: false,
        };
        // On error the partially started simulation is dropped, which stops
        // whatever already runs.
        simulation.launch(advance_rx, events_tx)?;

        info!(
            target: "power_market::simulation",
            households = simulation.config.city.house_count,
            workers = simulation.config.market.workers,
            pacer = ?simulation.config.pacer.mode,
            seed = simulation.config.seed,
            "simulation.started"
        );
        Ok(simulation)
    }

    fn launch(&mut self, advance: Receiver<()>, events: Sender<u64>) -> Result<(), SimulationError> {
        let config = self.config.clone();
        let bus = Arc::new(SettlementBus::new());
        let (shock_tx, shock_rx) = unbounded();

        let market = MarketEngine::new(
            &config,
            MarketLinks {
                shared: Arc::clone(&self.shared),
                bus: Arc::clone(&bus),
                shutdown: Arc::clone(&self.shutdown),
                shocks: shock_rx,
                metrics: Arc::clone(&self.metrics),
            },
        )?;

        let shock_delays = [
            (ShockKind::Politics, config.shocks.politics_max_delay_ms),
            (ShockKind::Economy, config.shocks.economy_max_delay_ms),
        ];
        for (index, (kind, max_delay_ms)) in shock_delays.into_iter().enumerate() {
            let generator = ShockGenerator::new(
                kind,
                Duration::from_millis(max_delay_ms),
                shock_tx.clone(),
                config.seed ^ SHOCK_SEED_SALT ^ index as u64,
            );
            let handle = generator
                .spawn(Arc::clone(&self.shutdown))
                .map_err(SimulationError::Spawn)?;
            self.shock_generators.push(handle);
        }
        drop(shock_tx);

        let city = CityManager::spawn(
            &config.city,
            config.seed,
            Arc::clone(&self.shared),
            bus,
            Arc::clone(&self.shutdown),
        )?;
        self.city = Some(self.spawn_process(city)?);

        let weather = WeatherGenerator::new(Arc::clone(&self.shared), config.seed ^ WEATHER_SEED_SALT);
        self.weather = Some(self.spawn_process(weather)?);

        let pacer = TurnPacer::from_config(&config.pacer, advance, Arc::clone(&self.shutdown), events);
        self.pacer = Some(self.spawn_process(pacer)?);

        self.market = Some(self.spawn_process(market)?);
        Ok(())
    }

    fn spawn_process<P: TurnProcess>(
        &self,
        process: P,
    ) -> Result<JoinHandle<()>, SimulationError> {
        spawn_turn_process(process, Arc::clone(&self.shared), Arc::clone(&self.shutdown))
            .map_err(SimulationError::Spawn)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn price(&self) -> f64 {
        self.shared.price()
    }

    pub fn weather(&self) -> WeatherConditions {
        self.shared.weather()
    }

    /// `price;temperature;cloudCover`, price rounded to two decimals.
    pub fn report(&self) -> String {
        format_report(self.shared.price(), self.shared.weather())
    }

    /// Lets one more turn complete in manual pacing mode.
    pub fn advance(&self) -> Result<(), SimulationError> {
        if self.config.pacer.mode == PacerMode::Auto {
            return Err(SimulationError::AutoPaced);
        }
        if self.stopped || self.shutdown.is_triggered() {
            return Err(SimulationError::Stopped);
        }
        self.advance.send(()).map_err(|_| SimulationError::Stopped)
    }

    /// Numbers of completed turns, oldest first. Bounded; late readers miss
    /// events rather than stall the pacer.
    pub fn turn_events(&self) -> &Receiver<u64> {
        &self.turn_events
    }

    /// Blocks until turn `turn` has completed or `timeout` elapses.
    pub fn wait_for_turn(&self, turn: u64, timeout: Duration) -> Option<u64> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.turn_events.recv_timeout(remaining) {
                Ok(completed) if completed >= turn => return Some(completed),
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None
                }
            }
        }
    }

    pub fn metrics(&self) -> MetricsHandle {
        Arc::clone(&self.metrics)
    }

    pub fn latest_summary(&self) -> Option<SettlementSummary> {
        self.metrics
            .lock()
            .expect("market metrics mutex poisoned")
            .latest()
            .copied()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Stops every entity: households before their city, the market before
    /// the shock generators. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.shutdown.trigger();
        self.shared.release_barriers();

        for (name, handle) in [
            ("city", self.city.take()),
            ("weather", self.weather.take()),
            ("pacer", self.pacer.take()),
            ("market", self.market.take()),
        ] {
            if let Some(handle) = handle {
                join_entity(name, handle);
            }
        }
        for handle in self.shock_generators.drain(..) {
            join_entity("shock", handle);
        }
        info!(target: "power_market::simulation", "simulation.stopped");
    }
}

pub fn format_report(price: f64, weather: WeatherConditions) -> String {
    format!(
        "{:.2};{};{}",
        price, weather.temperature, weather.cloud_cover
    )
}

fn join_entity(name: &'static str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!(target: "power_market::simulation", entity = name, "entity.panicked");
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PacerConfig;

    fn manual_config(house_count: u32) -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.city.house_count = house_count;
        config.pacer = PacerConfig {
            mode: PacerMode::Manual,
            interval_ms: 0,
        };
        config.shocks.politics_max_delay_ms = 60_000;
        config.shocks.economy_max_delay_ms = 60_000;
        config
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = manual_config(0);
        config.city.house_count = 0;
        assert!(matches!(
            Simulation::start(config),
            Err(SimulationError::Config(_))
        ));
    }

    #[test]
    fn manual_turns_advance_on_demand() {
        let mut simulation = Simulation::start(manual_config(4)).expect("simulation starts");
        simulation.advance().expect("advance");
        assert_eq!(simulation.wait_for_turn(0, Duration::from_secs(10)), Some(0));

        let metrics = simulation.metrics();
        let summary = metrics
            .lock()
            .unwrap()
            .turn(0)
            .copied()
            .expect("turn summarized");
        assert_eq!(summary.tally.requests, 4);

        simulation.shutdown();
        assert!(simulation.is_stopped());
        assert!(matches!(simulation.advance(), Err(SimulationError::Stopped)));
        simulation.shutdown();
    }

    #[test]
    fn advance_is_refused_in_auto_mode() {
        let mut config = manual_config(2);
        config.pacer = PacerConfig {
            mode: PacerMode::Auto,
            interval_ms: 5,
        };
        let simulation = Simulation::start(config).expect("simulation starts");
        assert!(matches!(simulation.advance(), Err(SimulationError::AutoPaced)));
        assert!(simulation.wait_for_turn(2, Duration::from_secs(10)).is_some());
    }

    #[test]
    fn report_formats_price_and_weather() {
        let weather = WeatherConditions {
            temperature: -3,
            cloud_cover: 42,
        };
        insta::assert_snapshot!(format_report(0.156, weather), @"0.16;-3;42");
        assert_eq!(format_report(2.0, weather), "2.00;-3;42");
    }

    #[test]
    fn live_report_has_three_fields() {
        let simulation = Simulation::start(manual_config(1)).expect("simulation starts");
        let report = simulation.report();
        let fields: Vec<&str> = report.split(';').collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].split('.').nth(1).map(str::len), Some(2));
        assert!(fields[1].parse::<i32>().is_ok());
        assert!(fields[2].parse::<u32>().is_ok());
    }
}
