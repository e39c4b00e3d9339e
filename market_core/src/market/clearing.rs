//! Tiered clearing of household positions against the shared surplus.
//!
//! A deficit is covered first from the anonymous surplus pool, then from the
//! giveaway queue in FIFO order, and whatever is left is billed at the turn's
//! price. Each structure has its own lock held only for its own tier, so the
//! order in which concurrent workers drain the pool and queue is not fixed;
//! only the aggregate invariants hold across interleavings.

use std::collections::VecDeque;
use std::sync::Mutex;

use market_runtime::{Behavior, HouseholdId, SettlementRequest};

/// A bill owed to (positive) or paid by (negative) the market.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bill {
    pub household: HouseholdId,
    pub amount: f64,
}

impl Bill {
    fn new(household: HouseholdId, amount: f64) -> Self {
        Self { household, amount }
    }
}

/// Surplus offered by a give-then-sell household, not yet claimed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitingGiver {
    pub household: HouseholdId,
    pub remaining: f64,
}

/// Energy and money moved during one turn's settlement.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SettlementTally {
    pub requests: u32,
    pub rejected: u32,
    pub surplus_given: f64,
    pub surplus_drawn: f64,
    pub queue_drawn: f64,
    pub queue_flushed: f64,
    pub givers_flushed: u32,
    /// Sum of positive bills: households buying from the market.
    pub market_sales: f64,
    /// Magnitude of negative bills: the market buying surplus.
    pub market_purchases: f64,
}

impl SettlementTally {
    fn record_bill(&mut self, amount: f64) {
        if amount > 0.0 {
            self.market_sales += amount;
        } else {
            self.market_purchases -= amount;
        }
    }
}

#[derive(Debug, Default)]
pub struct SettlementBook {
    surplus: Mutex<f64>,
    waiting: Mutex<VecDeque<WaitingGiver>>,
    aggregate: Mutex<f64>,
    tally: Mutex<SettlementTally>,
}

impl SettlementBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears one request and returns every bill it makes due.
    ///
    /// A deficit may also settle queued givers (zero bills). A give-then-sell
    /// surplus returns no bill at all: its reply is deferred until a deficit
    /// consumes it or [`SettlementBook::flush`] sells it.
    pub fn settle(
        &self,
        household: HouseholdId,
        request: SettlementRequest,
        price: f64,
    ) -> Vec<Bill> {
        let net_load = request.net_load;
        *self.aggregate.lock().expect("aggregate mutex poisoned") += net_load;

        let mut bills = Vec::new();
        let mut tally = SettlementTally {
            requests: 1,
            ..SettlementTally::default()
        };

        if net_load > 0.0 {
            let mut deficit = net_load;

            {
                let mut surplus = self.surplus.lock().expect("surplus mutex poisoned");
                let taken = deficit.min(*surplus);
                *surplus -= taken;
                deficit -= taken;
                tally.surplus_drawn += taken;
            }

            if deficit > 0.0 {
                let mut waiting = self.waiting.lock().expect("waiting queue mutex poisoned");
                while deficit > 0.0 {
                    let Some(mut giver) = waiting.pop_front() else {
                        break;
                    };
                    if giver.remaining <= deficit {
                        deficit -= giver.remaining;
                        tally.queue_drawn += giver.remaining;
                        bills.push(Bill::new(giver.household, 0.0));
                    } else {
                        giver.remaining -= deficit;
                        tally.queue_drawn += deficit;
                        deficit = 0.0;
                        waiting.push_front(giver);
                    }
                }
            }

            let amount = price * deficit;
            tally.record_bill(amount);
            bills.push(Bill::new(household, amount));
        } else {
            let offered = -net_load;
            match request.behavior {
                Behavior::Give => {
                    *self.surplus.lock().expect("surplus mutex poisoned") += offered;
                    tally.surplus_given += offered;
                    bills.push(Bill::new(household, 0.0));
                }
                Behavior::Sell => {
                    let amount = price * net_load;
                    tally.record_bill(amount);
                    bills.push(Bill::new(household, amount));
                }
                Behavior::GiveThenSell => {
                    self.waiting
                        .lock()
                        .expect("waiting queue mutex poisoned")
                        .push_back(WaitingGiver {
                            household,
                            remaining: offered,
                        });
                }
            }
        }

        self.merge_tally(tally);
        bills
    }

    /// Ends the turn's clearing: unclaimed queued surplus is bought by the
    /// market at `price` and the anonymous pool is discarded.
    pub fn flush(&self, price: f64) -> Vec<Bill> {
        let drained: Vec<WaitingGiver> = self
            .waiting
            .lock()
            .expect("waiting queue mutex poisoned")
            .drain(..)
            .collect();
        *self.surplus.lock().expect("surplus mutex poisoned") = 0.0;

        let mut tally = SettlementTally::default();
        let bills = drained
            .into_iter()
            .map(|giver| {
                let amount = -(price * giver.remaining);
                tally.queue_flushed += giver.remaining;
                tally.givers_flushed += 1;
                tally.record_bill(amount);
                Bill::new(giver.household, amount)
            })
            .collect();
        self.merge_tally(tally);
        bills
    }

    pub fn record_rejected(&self) {
        self.tally.lock().expect("tally mutex poisoned").rejected += 1;
    }

    pub fn surplus(&self) -> f64 {
        *self.surplus.lock().expect("surplus mutex poisoned")
    }

    pub fn waiting(&self) -> Vec<WaitingGiver> {
        self.waiting
            .lock()
            .expect("waiting queue mutex poisoned")
            .iter()
            .copied()
            .collect()
    }

    pub fn aggregate_consumption(&self) -> f64 {
        *self.aggregate.lock().expect("aggregate mutex poisoned")
    }

    /// Returns the turn's aggregate consumption and resets it to zero.
    pub fn take_aggregate(&self) -> f64 {
        std::mem::take(&mut *self.aggregate.lock().expect("aggregate mutex poisoned"))
    }

    pub fn take_tally(&self) -> SettlementTally {
        std::mem::take(&mut *self.tally.lock().expect("tally mutex poisoned"))
    }

    fn merge_tally(&self, delta: SettlementTally) {
        let mut tally = self.tally.lock().expect("tally mutex poisoned");
        tally.requests += delta.requests;
        tally.rejected += delta.rejected;
        tally.surplus_given += delta.surplus_given;
        tally.surplus_drawn += delta.surplus_drawn;
        tally.queue_drawn += delta.queue_drawn;
        tally.queue_flushed += delta.queue_flushed;
        tally.givers_flushed += delta.givers_flushed;
        tally.market_sales += delta.market_sales;
        tally.market_purchases += delta.market_purchases;
    }
}
