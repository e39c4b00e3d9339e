//! The market: settles every household once per turn and reprices energy.

mod clearing;
mod pricing;
mod sentiment;

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{select, Receiver};
use market_runtime::{decode_request, HouseholdId};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, error, info, warn};

pub use clearing::{Bill, SettlementBook, SettlementTally, WaitingGiver};
pub use pricing::{PriceInputs, PricingModel, TEMPERATURE_OFFSET};
pub use sentiment::Sentiment;

use crate::bus::{BusError, Envelope, SettlementBus};
use crate::config::SimulationConfig;
use crate::metrics::{MetricsHandle, SettlementSummary};
use crate::shared::SharedState;
use crate::shock::ShockKind;
use crate::shutdown::ShutdownSignal;
use crate::simulation::SimulationError;
use crate::turn::{TurnError, TurnProcess};

/// Handles the market needs from the rest of the simulation.
pub struct MarketLinks {
    pub shared: Arc<SharedState>,
    pub bus: Arc<SettlementBus>,
    pub shutdown: Arc<ShutdownSignal>,
    pub shocks: Receiver<ShockKind>,
    pub metrics: MetricsHandle,
}

pub struct MarketEngine {
    shared: Arc<SharedState>,
    bus: Arc<SettlementBus>,
    shutdown: Arc<ShutdownSignal>,
    book: SettlementBook,
    sentiment: Arc<Sentiment>,
    pricing: PricingModel,
    workers: ThreadPool,
    house_count: u32,
    turn: u64,
    metrics: MetricsHandle,
    shock_listener: Option<JoinHandle<()>>,
}

impl MarketEngine {
    pub fn new(config: &SimulationConfig, links: MarketLinks) -> Result<Self, SimulationError> {
        let workers = ThreadPoolBuilder::new()
            .num_threads(config.market.workers)
            .thread_name(|index| format!("settlement-{index}"))
            .build()?;
        let sentiment = Arc::new(Sentiment::new(
            config.market.politics,
            config.market.economy,
            config.sentiment,
        ));
        let shock_listener = spawn_shock_listener(
            Arc::clone(&sentiment),
            links.shocks,
            Arc::clone(&links.shutdown),
        )
        .map_err(SimulationError::Spawn)?;

        Ok(Self {
            shared: links.shared,
            bus: links.bus,
            shutdown: links.shutdown,
            book: SettlementBook::new(),
            sentiment,
            pricing: PricingModel::new(config.market.pricing),
            workers,
            house_count: config.city.house_count,
            turn: 0,
            metrics: links.metrics,
            shock_listener: Some(shock_listener),
        })
    }

    pub fn sentiment(&self) -> &Arc<Sentiment> {
        &self.sentiment
    }

    pub fn book(&self) -> &SettlementBook {
        &self.book
    }

    /// Receives exactly one request per household and fans each out to the
    /// worker pool, then sells whatever queued surplus nobody claimed.
    fn settle_turn(&mut self) -> Result<(), TurnError> {
        let shared = &self.shared;
        let bus = &self.bus;
        let book = &self.book;
        let shutdown = &self.shutdown;
        let expected = self.house_count;

        self.workers
            .in_place_scope(|scope| -> Result<(), TurnError> {
                for _ in 0..expected {
                    let envelope = select! {
                        recv(bus.requests()) -> envelope => {
                            envelope.map_err(|_| BusError::RequestsClosed)?
                        }
                        recv(shutdown.listener()) -> _ => return Err(TurnError::Interrupted),
                    };
                    scope.spawn(move |_| settle_envelope(shared, bus, book, envelope));
                }
                Ok(())
            })?;

        let price = shared.price();
        for bill in book.flush(price) {
            debug!(
                target: "power_market::market",
                household = %bill.household,
                bill = bill.amount,
                "settlement.queue_flushed"
            );
            deliver(bus, bill);
        }
        Ok(())
    }
}

fn settle_envelope(shared: &SharedState, bus: &SettlementBus, book: &SettlementBook, envelope: Envelope) {
    let Some(household) = HouseholdId::from_request_tag(envelope.tag) else {
        warn!(
            target: "power_market::market",
            tag = envelope.tag,
            "settlement.rejected=unknown_sender"
        );
        book.record_rejected();
        return;
    };

    let request = match decode_request(&envelope.payload) {
        Ok(request) => request,
        Err(err) => {
            warn!(
                target: "power_market::market",
                %household,
                error = %err,
                "settlement.rejected=malformed"
            );
            book.record_rejected();
            // Never leave the sender blocked on a reply.
            deliver(bus, Bill { household, amount: 0.0 });
            return;
        }
    };

    let price = shared.price();
    let bills = book.settle(household, request, price);
    debug!(
        target: "power_market::market",
        %household,
        behavior = %request.behavior,
        net_load = request.net_load,
        price,
        replies = bills.len(),
        "settlement.cleared"
    );
    for bill in bills {
        deliver(bus, bill);
    }
}

fn deliver(bus: &SettlementBus, bill: Bill) {
    if let Err(err) = bus.reply(bill.household, bill.amount) {
        warn!(
            target: "power_market::market",
            household = %bill.household,
            error = %err,
            "settlement.reply_undeliverable"
        );
    }
}

/// Absorbs shocks into the sentiment scores as they arrive, independently of
/// the turn phases.
fn spawn_shock_listener(
    sentiment: Arc<Sentiment>,
    shocks: Receiver<ShockKind>,
    shutdown: Arc<ShutdownSignal>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("market-shocks".to_string())
        .spawn(move || loop {
            select! {
                recv(shocks) -> shock => match shock {
                    Ok(kind) => {
                        let score = sentiment.degrade(kind);
                        info!(
                            target: "power_market::market",
                            %kind,
                            score,
                            "shock.absorbed"
                        );
                    }
                    Err(_) => break,
                },
                recv(shutdown.listener()) -> _ => break,
            }
        })
}

impl TurnProcess for MarketEngine {
    fn name(&self) -> &'static str {
        "market"
    }

    fn compute(&mut self) -> Result<(), TurnError> {
        self.settle_turn()
    }

    fn commit(&mut self) -> Result<(), TurnError> {
        let inputs = PriceInputs {
            weather: self.shared.weather(),
            aggregate_consumption: self.book.take_aggregate(),
            politics: self.sentiment.politics(),
            economy: self.sentiment.economy(),
        };
        let pricing = self.pricing;
        let price = self
            .shared
            .update_price(|price| pricing.next_price(price, &inputs));
        let (politics, economy) = self.sentiment.recover();

        let summary = SettlementSummary {
            turn: self.turn,
            tally: self.book.take_tally(),
            aggregate_consumption: inputs.aggregate_consumption,
            price,
            politics,
            economy,
        };
        self.metrics
            .lock()
            .expect("market metrics mutex poisoned")
            .record(summary);

        info!(
            target: "power_market::market",
            turn = self.turn,
            price,
            aggregate_consumption = inputs.aggregate_consumption,
            requests = summary.tally.requests,
            givers_flushed = summary.tally.givers_flushed,
            politics,
            economy,
            "market.price_updated"
        );
        self.turn += 1;
        Ok(())
    }

    fn finish(&mut self) {
        if let Some(listener) = self.shock_listener.take() {
            if listener.join().is_err() {
                error!(target: "power_market::market", "shock_listener.panicked");
            }
        }
        info!(target: "power_market::market", turns = self.turn, "market.stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MarketMetrics;
    use crate::shared::WeatherConditions;
    use crossbeam_channel::unbounded;
    use market_runtime::{decode_bill, Behavior, SettlementRequest};
    use std::time::Duration;

    struct Harness {
        market: MarketEngine,
        bus: Arc<SettlementBus>,
        shared: Arc<SharedState>,
        shutdown: Arc<ShutdownSignal>,
        metrics: MetricsHandle,
        shocks: crossbeam_channel::Sender<ShockKind>,
    }

    fn harness(house_count: u32, price: f64) -> Harness {
        let mut config = SimulationConfig::default();
        config.city.house_count = house_count;
        let shared = Arc::new(SharedState::new(
            price,
            WeatherConditions {
                temperature: 20,
                cloud_cover: 40,
            },
        ));
        let bus = Arc::new(SettlementBus::new());
        let shutdown = Arc::new(ShutdownSignal::new());
        let metrics = MarketMetrics::handle(16);
        let (shocks, shock_rx) = unbounded();
        let market = MarketEngine::new(
            &config,
            MarketLinks {
                shared: Arc::clone(&shared),
                bus: Arc::clone(&bus),
                shutdown: Arc::clone(&shutdown),
                shocks: shock_rx,
                metrics: Arc::clone(&metrics),
            },
        )
        .expect("market builds");
        Harness {
            market,
            bus,
            shared,
            shutdown,
            metrics,
            shocks,
        }
    }

    fn id(raw: u32) -> HouseholdId {
        HouseholdId::new(raw).expect("valid household id")
    }

    fn bill_for(mailbox: &Receiver<Envelope>) -> f64 {
        let envelope = mailbox
            .recv_timeout(Duration::from_secs(5))
            .expect("bill delivered");
        decode_bill(&envelope.payload).expect("bill decodes")
    }

    #[test]
    fn single_seller_is_paid_and_pool_untouched() {
        let mut h = harness(1, 0.5);
        let mailbox = h.bus.register(id(1)).expect("register");
        h.bus
            .submit(
                id(1),
                &SettlementRequest {
                    behavior: Behavior::Sell,
                    net_load: -10.0,
                },
            )
            .expect("submit");

        h.market.compute().expect("compute succeeds");
        assert_eq!(bill_for(&mailbox), -5.0);
        assert_eq!(h.market.book().surplus(), 0.0);
        assert_eq!(h.market.book().aggregate_consumption(), -10.0);
    }

    #[test]
    fn unclaimed_queue_is_bought_at_end_of_turn() {
        let mut h = harness(2, 2.0);
        let giver = h.bus.register(id(1)).expect("register");
        let taker = h.bus.register(id(2)).expect("register");
        h.bus
            .submit(
                id(1),
                &SettlementRequest {
                    behavior: Behavior::GiveThenSell,
                    net_load: -3.0,
                },
            )
            .expect("submit");
        h.bus
            .submit(
                id(2),
                &SettlementRequest {
                    behavior: Behavior::Give,
                    net_load: -1.0,
                },
            )
            .expect("submit");

        h.market.compute().expect("compute succeeds");
        assert_eq!(bill_for(&giver), -6.0);
        assert_eq!(bill_for(&taker), 0.0);
        assert!(h.market.book().waiting().is_empty());
        assert_eq!(h.market.book().surplus(), 0.0);
    }

    #[test]
    fn malformed_request_gets_a_zero_bill() {
        let mut h = harness(1, 1.0);
        let mailbox = h.bus.register(id(5)).expect("register");
        h.bus
            .submit_raw(id(5).request_tag(), "garbage".to_string())
            .expect("submit");
        h.market.compute().expect("compute succeeds");
        assert_eq!(bill_for(&mailbox), 0.0);
        h.market.commit().expect("commit succeeds");
        let metrics = h.metrics.lock().unwrap();
        assert_eq!(metrics.latest().map(|s| s.tally.rejected), Some(1));
    }

    #[test]
    fn commit_reprices_and_resets_aggregate() {
        let mut h = harness(1, 0.5);
        let mailbox = h.bus.register(id(1)).expect("register");
        h.bus
            .submit(
                id(1),
                &SettlementRequest {
                    behavior: Behavior::Sell,
                    net_load: 12.0,
                },
            )
            .expect("submit");
        h.market.compute().expect("compute succeeds");
        assert_eq!(bill_for(&mailbox), 6.0);

        h.market.commit().expect("commit succeeds");
        let expected = PricingModel::new(Default::default()).next_price(
            0.5,
            &PriceInputs {
                weather: WeatherConditions {
                    temperature: 20,
                    cloud_cover: 40,
                },
                aggregate_consumption: 12.0,
                politics: 100,
                economy: 100,
            },
        );
        assert!((h.shared.price() - expected).abs() < 1e-12);
        assert_eq!(h.market.book().aggregate_consumption(), 0.0);

        let metrics = h.metrics.lock().unwrap();
        let summary = metrics.latest().expect("summary recorded");
        assert_eq!(summary.turn, 0);
        assert_eq!(summary.aggregate_consumption, 12.0);
        assert_eq!(summary.tally.requests, 1);
    }

    #[test]
    fn compute_is_interrupted_by_shutdown() {
        let mut h = harness(3, 1.0);
        h.shutdown.trigger();
        assert!(matches!(h.market.compute(), Err(TurnError::Interrupted)));
        h.market.finish();
    }

    #[test]
    fn shocks_degrade_sentiment_between_turns() {
        let mut h = harness(1, 1.0);
        h.shocks.send(ShockKind::Politics).expect("send shock");
        h.shocks.send(ShockKind::Economy).expect("send shock");
        h.shocks.send(ShockKind::Economy).expect("send shock");

        let sentiment = Arc::clone(h.market.sentiment());
        for _ in 0..500 {
            if sentiment.politics() == 70 && sentiment.economy() == 40 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sentiment.politics(), 70);
        assert_eq!(sentiment.economy(), 40);

        h.market.commit().expect("commit succeeds");
        assert_eq!(sentiment.politics(), 80);
        assert_eq!(sentiment.economy(), 50);

        h.shutdown.trigger();
        h.market.finish();
    }
}
