//! Threaded core of the power market simulation: the lockstep turn protocol,
//! the entities that run it, and the market's concurrent settlement engine.

pub mod barrier;
pub mod bus;
pub mod city;
pub mod config;
pub mod control;
pub mod household;
pub mod market;
pub mod metrics;
pub mod network;
pub mod pacer;
pub mod shared;
pub mod shock;
pub mod shutdown;
pub mod simulation;
pub mod turn;
pub mod weather;

pub use barrier::{BarrierError, TurnBarrier};
pub use bus::{BusError, Envelope, SettlementBus};
pub use city::CityManager;
pub use config::{
    load_simulation_config_from_env, PacerMode, SimulationConfig, SimulationConfigError,
    BUILTIN_SIMULATION_CONFIG, SIMULATION_CONFIG_ENV,
};
pub use control::{dispatch, handle_line, ControlOutcome};
pub use household::{HouseholdAgent, HouseholdProfile};
pub use market::{MarketEngine, PricingModel, Sentiment, SettlementBook, SettlementTally};
pub use metrics::{MarketMetrics, MetricsHandle, SettlementSummary};
pub use network::{ControlListener, ControlRequest};
pub use pacer::TurnPacer;
pub use shared::{SharedState, WeatherConditions};
pub use shock::{ShockGenerator, ShockKind};
pub use shutdown::ShutdownSignal;
pub use simulation::{format_report, Simulation, SimulationError};
pub use turn::{run_turn_loop, spawn_turn_process, TurnError, TurnProcess};
pub use weather::WeatherGenerator;
