use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::shared::{SharedState, WeatherConditions, MAX_TEMPERATURE, MIN_TEMPERATURE};
use crate::turn::{TurnError, TurnProcess};

/// Largest temperature swing between two turns, in degrees.
pub const MAX_TEMPERATURE_STEP: i32 = 5;

/// Mutates the shared weather once per turn in its write step.
pub struct WeatherGenerator {
    shared: Arc<SharedState>,
    rng: ChaCha8Rng,
}

impl WeatherGenerator {
    pub fn new(shared: Arc<SharedState>, seed: u64) -> Self {
        Self {
            shared,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Next turn's weather: a bounded temperature drift and fresh cloud cover.
    pub fn next_conditions<R: Rng>(current: WeatherConditions, rng: &mut R) -> WeatherConditions {
        let delta = rng.gen_range(-MAX_TEMPERATURE_STEP..=MAX_TEMPERATURE_STEP);
        WeatherConditions {
            temperature: (current.temperature + delta).clamp(MIN_TEMPERATURE, MAX_TEMPERATURE),
            cloud_cover: rng.gen_range(1..=100),
        }
    }
}

impl TurnProcess for WeatherGenerator {
    fn name(&self) -> &'static str {
        "weather"
    }

    fn compute(&mut self) -> Result<(), TurnError> {
        Ok(())
    }

    fn commit(&mut self) -> Result<(), TurnError> {
        let rng = &mut self.rng;
        let weather = self
            .shared
            .update_weather(|current| Self::next_conditions(current, rng));
        tracing::info!(
            target: "power_market::weather",
            temperature = weather.temperature,
            cloud_cover = weather.cloud_cover,
            "weather.updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hot_weather_stays_within_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..500 {
            let next = WeatherGenerator::next_conditions(
                WeatherConditions {
                    temperature: 39,
                    cloud_cover: 50,
                },
                &mut rng,
            );
            assert!(next.temperature <= MAX_TEMPERATURE);
            assert!(next.temperature >= 34);
            assert!((1..=100).contains(&next.cloud_cover));
        }
    }

    #[test]
    fn cold_weather_stays_within_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut weather = WeatherConditions {
            temperature: MIN_TEMPERATURE,
            cloud_cover: 1,
        };
        for _ in 0..500 {
            weather = WeatherGenerator::next_conditions(weather, &mut rng);
            assert!((MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&weather.temperature));
        }
    }

    #[test]
    fn commit_writes_shared_weather() {
        let shared = Arc::new(SharedState::new(
            0.5,
            WeatherConditions {
                temperature: 39,
                cloud_cover: 50,
            },
        ));
        let mut generator = WeatherGenerator::new(Arc::clone(&shared), 3);
        for _ in 0..50 {
            generator.commit().expect("commit succeeds");
            let weather = shared.weather();
            assert!((MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&weather.temperature));
            assert!((1..=100).contains(&weather.cloud_cover));
        }
    }
}
