use std::sync::Arc;
use std::thread::JoinHandle;

use market_runtime::{Behavior, HouseholdId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{error, info};

use crate::barrier::TurnBarrier;
use crate::bus::SettlementBus;
use crate::config::CityConfig;
use crate::household::{HouseholdAgent, HouseholdContext, HouseholdProfile};
use crate::shared::SharedState;
use crate::shutdown::ShutdownSignal;
use crate::simulation::SimulationError;
use crate::turn::{TurnError, TurnProcess};

/// Seed offset separating household RNG streams from the other entities.
const HOUSEHOLD_SEED_SALT: u64 = 0x484f_5553_4548_4f4c;

/// Draws the static traits of every household in the city.
pub fn household_profiles(config: &CityConfig, seed: u64) -> Vec<HouseholdProfile> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (1..=config.house_count)
        .filter_map(HouseholdId::new)
        .map(|id| {
            let behavior = config
                .behavior_mix
                .unwrap_or_else(|| Behavior::VARIANTS[rng.gen_range(0..Behavior::VARIANTS.len())]);
            HouseholdProfile {
                id,
                behavior,
                average_consumption: config.average_consumption,
                average_production: config.max_production * rng.gen::<f64>(),
            }
        })
        .collect()
}

/// Owns the household threads and stands in for them at the turn barriers.
pub struct CityManager {
    barrier: Arc<TurnBarrier>,
    households: Vec<(HouseholdId, JoinHandle<()>)>,
}

impl CityManager {
    /// Starts one thread per household. On a spawn failure the households
    /// already started are stopped before the error is returned.
    pub fn spawn(
        config: &CityConfig,
        seed: u64,
        shared: Arc<SharedState>,
        bus: Arc<SettlementBus>,
        shutdown: Arc<ShutdownSignal>,
    ) -> Result<Self, SimulationError> {
        let profiles = household_profiles(config, seed);
        // Every household plus the city itself.
        let barrier = Arc::new(TurnBarrier::new("households", profiles.len() + 1));
        let context = HouseholdContext {
            shared,
            bus,
            barrier: Arc::clone(&barrier),
            shutdown,
        };

        let mut city = Self {
            barrier,
            households: Vec::with_capacity(profiles.len()),
        };
        for profile in profiles {
            let household_seed = seed ^ HOUSEHOLD_SEED_SALT ^ u64::from(profile.id.get());
            let started = HouseholdAgent::new(profile, context.clone(), household_seed)
                .map_err(SimulationError::from)
                .and_then(|agent| agent.spawn().map_err(SimulationError::Spawn));
            match started {
                Ok(handle) => city.households.push((profile.id, handle)),
                Err(err) => {
                    city.stop_households();
                    return Err(err);
                }
            }
        }

        info!(
            target: "power_market::city",
            households = city.households.len(),
            "city.started"
        );
        Ok(city)
    }

    pub fn household_count(&self) -> usize {
        self.households.len()
    }

    fn stop_households(&mut self) {
        self.barrier.release();
        for (id, handle) in self.households.drain(..) {
            if handle.join().is_err() {
                error!(
                    target: "power_market::city",
                    household = %id,
                    "household.panicked"
                );
            }
        }
    }
}

impl TurnProcess for CityManager {
    fn name(&self) -> &'static str {
        "city"
    }

    /// Opens the turn for every household, then returns once each has
    /// finished its exchange.
    fn compute(&mut self) -> Result<(), TurnError> {
        self.barrier.wait()?;
        self.barrier.wait()?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), TurnError> {
        Ok(())
    }

    fn finish(&mut self) {
        let count = self.households.len();
        self.stop_households();
        info!(target: "power_market::city", households = count, "city.stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_have_sequential_nonzero_ids() {
        let config = CityConfig {
            house_count: 6,
            ..CityConfig::default()
        };
        let profiles = household_profiles(&config, 42);
        let ids: Vec<u32> = profiles.iter().map(|p| p.id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
        for profile in &profiles {
            assert!(profile.average_production >= 0.0);
            assert!(profile.average_production < config.max_production);
        }
    }

    #[test]
    fn behavior_mix_pins_every_household() {
        let config = CityConfig {
            house_count: 5,
            behavior_mix: Some(Behavior::Sell),
            ..CityConfig::default()
        };
        assert!(household_profiles(&config, 1)
            .iter()
            .all(|p| p.behavior == Behavior::Sell));
    }

    #[test]
    fn profiles_are_reproducible_per_seed() {
        let config = CityConfig::default();
        assert_eq!(household_profiles(&config, 9), household_profiles(&config, 9));
    }
}
