use std::sync::Mutex;

use crate::barrier::TurnBarrier;

/// Number of top-level entities running the turn protocol:
/// weather, market, city and pacer.
pub const TURN_PARTICIPANTS: usize = 4;

pub const MIN_TEMPERATURE: i32 = -15;
pub const MAX_TEMPERATURE: i32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeatherConditions {
    /// Degrees Celsius, kept within [`MIN_TEMPERATURE`]..=[`MAX_TEMPERATURE`].
    pub temperature: i32,
    /// Percentage of sky covered, 1..=100.
    pub cloud_cover: u32,
}

/// State visible to every participant of the turn protocol.
///
/// `price` is written only by the market's commit step and `weather` only by the
/// weather's commit step; both run strictly between the compute and write
/// barriers, so readers during a compute step see values that are stable for
/// the whole step.
#[derive(Debug)]
pub struct SharedState {
    price: Mutex<f64>,
    weather: Mutex<WeatherConditions>,
    compute_barrier: TurnBarrier,
    write_barrier: TurnBarrier,
}

impl SharedState {
    pub fn new(price: f64, weather: WeatherConditions) -> Self {
        Self::with_participants(price, weather, TURN_PARTICIPANTS)
    }

    /// Builds state whose barriers expect `participants` parties; used to run a
    /// subset of the entities in isolation.
    pub fn with_participants(price: f64, weather: WeatherConditions, participants: usize) -> Self {
        Self {
            price: Mutex::new(price),
            weather: Mutex::new(WeatherConditions {
                temperature: weather.temperature.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE),
                cloud_cover: weather.cloud_cover.clamp(1, 100),
            }),
            compute_barrier: TurnBarrier::new("compute", participants),
            write_barrier: TurnBarrier::new("write", participants),
        }
    }

    pub fn price(&self) -> f64 {
        *self.price.lock().expect("price mutex poisoned")
    }

    /// Applies `update` to the price under its lock and returns the new value.
    pub fn update_price(&self, update: impl FnOnce(f64) -> f64) -> f64 {
        let mut guard = self.price.lock().expect("price mutex poisoned");
        *guard = update(*guard);
        *guard
    }

    pub fn weather(&self) -> WeatherConditions {
        *self.weather.lock().expect("weather mutex poisoned")
    }

    pub fn update_weather(
        &self,
        update: impl FnOnce(WeatherConditions) -> WeatherConditions,
    ) -> WeatherConditions {
        let mut guard = self.weather.lock().expect("weather mutex poisoned");
        *guard = update(*guard);
        *guard
    }

    pub fn compute_barrier(&self) -> &TurnBarrier {
        &self.compute_barrier
    }

    pub fn write_barrier(&self) -> &TurnBarrier {
        &self.write_barrier
    }

    /// Releases both turn barriers so no participant stays blocked on them.
    pub fn release_barriers(&self) {
        self.compute_barrier.release();
        self.write_barrier.release();
    }
}
