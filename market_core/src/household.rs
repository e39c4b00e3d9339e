use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{select, Receiver};
use market_runtime::{decode_bill, Behavior, HouseholdId, SettlementRequest};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, error, info};

use crate::barrier::TurnBarrier;
use crate::bus::{Envelope, SettlementBus};
use crate::shared::{SharedState, WeatherConditions};
use crate::shutdown::ShutdownSignal;
use crate::turn::TurnError;

pub const HEATING_THRESHOLD: i32 = 0;
pub const HEATING_SURCHARGE: f64 = 15.0;
pub const COOLING_THRESHOLD: i32 = 32;
pub const COOLING_SURCHARGE: f64 = 10.0;
pub const CONSUMPTION_JITTER: i32 = 5;

/// Cloud cover up to which panels produce at full strength.
pub const CLEAR_SKY_LIMIT: u32 = 70;
/// Cloud cover above which panels produce nothing.
pub const OVERCAST_LIMIT: u32 = 90;
/// Temperature above which panels shut down.
pub const PANEL_HEAT_CUTOFF: i32 = 35;

/// Static traits of a household, fixed when the city is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HouseholdProfile {
    pub id: HouseholdId,
    pub behavior: Behavior,
    pub average_consumption: f64,
    pub average_production: f64,
}

/// Consumption for one turn: a jittered base plus heating or cooling load.
pub fn consumption<R: Rng>(average: f64, temperature: i32, rng: &mut R) -> f64 {
    let mut total = average + f64::from(rng.gen_range(-CONSUMPTION_JITTER..=CONSUMPTION_JITTER));
    if temperature <= HEATING_THRESHOLD {
        total += HEATING_SURCHARGE;
    }
    if temperature >= COOLING_THRESHOLD {
        total += COOLING_SURCHARGE;
    }
    total
}

/// Solar production for one turn.
///
/// Extreme heat or heavy overcast stops production entirely; clear-ish skies
/// produce the household average plus a bonus that shrinks as cover rises;
/// the hazy band in between keeps the previous turn's output.
pub fn production<R: Rng>(
    previous: f64,
    average: f64,
    weather: WeatherConditions,
    rng: &mut R,
) -> f64 {
    if weather.cloud_cover > OVERCAST_LIMIT || weather.temperature > PANEL_HEAT_CUTOFF {
        0.0
    } else if weather.cloud_cover <= CLEAR_SKY_LIMIT {
        let cover = f64::from(weather.cloud_cover.max(1));
        average + 10.0 / cover + 2.0 * rng.gen::<f64>()
    } else {
        previous
    }
}

/// Handles shared by every household of a city.
#[derive(Clone)]
pub struct HouseholdContext {
    pub shared: Arc<SharedState>,
    pub bus: Arc<SettlementBus>,
    pub barrier: Arc<TurnBarrier>,
    pub shutdown: Arc<ShutdownSignal>,
}

/// Result of one settlement exchange.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Exchange {
    pub net_load: f64,
    pub bill: f64,
}

pub struct HouseholdAgent {
    profile: HouseholdProfile,
    context: HouseholdContext,
    mailbox: Receiver<Envelope>,
    rng: ChaCha8Rng,
    production: f64,
    turn: u64,
}

impl HouseholdAgent {
    /// Registers the household's reply mailbox on the bus.
    pub fn new(
        profile: HouseholdProfile,
        context: HouseholdContext,
        seed: u64,
    ) -> Result<Self, TurnError> {
        let mailbox = context.bus.register(profile.id)?;
        Ok(Self {
            profile,
            context,
            mailbox,
            rng: ChaCha8Rng::seed_from_u64(seed),
            production: profile.average_production,
            turn: 0,
        })
    }

    pub fn profile(&self) -> &HouseholdProfile {
        &self.profile
    }

    /// Submits this turn's position and blocks until the matching bill arrives.
    pub fn exchange(&mut self) -> Result<Exchange, TurnError> {
        let weather = self.context.shared.weather();
        let consumed = consumption(
            self.profile.average_consumption,
            weather.temperature,
            &mut self.rng,
        );
        self.production = production(
            self.production,
            self.profile.average_production,
            weather,
            &mut self.rng,
        );
        let net_load = consumed - self.production;

        self.context.bus.submit(
            self.profile.id,
            &SettlementRequest {
                behavior: self.profile.behavior,
                net_load,
            },
        )?;

        let envelope = select! {
            recv(self.mailbox) -> envelope => envelope.map_err(|_| TurnError::Interrupted)?,
            recv(self.context.shutdown.listener()) -> _ => return Err(TurnError::Interrupted),
        };
        let bill = decode_bill(&envelope.payload)?;
        Ok(Exchange { net_load, bill })
    }

    pub fn run(&mut self) {
        let id = self.profile.id;
        debug!(
            target: "power_market::household",
            household = %id,
            behavior = %self.profile.behavior,
            average_production = self.profile.average_production,
            "household.started"
        );

        loop {
            if self.context.shutdown.is_triggered() {
                break;
            }
            // Opened by the city's compute step, so the weather read below is
            // the one committed by the previous turn.
            if self.context.barrier.wait().is_err() {
                break;
            }
            match self.exchange() {
                Ok(exchange) => info!(
                    target: "power_market::household",
                    household = %id,
                    turn = self.turn,
                    behavior = %self.profile.behavior,
                    net_load = exchange.net_load,
                    bill = exchange.bill,
                    "household.settled"
                ),
                Err(TurnError::Interrupted) => break,
                Err(TurnError::Decode(err)) => error!(
                    target: "power_market::household",
                    household = %id,
                    error = %err,
                    "household.bill_unreadable"
                ),
                Err(err) => {
                    error!(
                        target: "power_market::household",
                        household = %id,
                        error = %err,
                        "household.exchange_failed"
                    );
                    break;
                }
            }
            if self.context.barrier.wait().is_err() {
                break;
            }
            self.turn += 1;
        }

        // Peers (and the city) may be parked on the pool barrier.
        self.context.barrier.release();
        self.context.bus.unregister(id);
        debug!(
            target: "power_market::household",
            household = %id,
            turns = self.turn,
            "household.stopped"
        );
    }

    pub fn spawn(mut self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("household-{}", self.profile.id))
            .spawn(move || self.run())
    }
}
