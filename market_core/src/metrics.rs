use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::market::SettlementTally;

/// What the market settled and priced during one turn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettlementSummary {
    pub turn: u64,
    pub tally: SettlementTally,
    pub aggregate_consumption: f64,
    /// Price after the turn's write step.
    pub price: f64,
    pub politics: u32,
    pub economy: u32,
}

/// Bounded per-turn history of market summaries.
#[derive(Debug, Clone)]
pub struct MarketMetrics {
    history: VecDeque<SettlementSummary>,
    limit: usize,
}

pub type MetricsHandle = Arc<Mutex<MarketMetrics>>;

impl MarketMetrics {
    pub fn with_limit(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            history: VecDeque::with_capacity(limit.min(1024)),
            limit,
        }
    }

    pub fn handle(limit: usize) -> MetricsHandle {
        Arc::new(Mutex::new(Self::with_limit(limit)))
    }

    pub fn record(&mut self, summary: SettlementSummary) {
        if self.history.len() == self.limit {
            self.history.pop_front();
        }
        self.history.push_back(summary);
    }

    pub fn latest(&self) -> Option<&SettlementSummary> {
        self.history.back()
    }

    pub fn turn(&self, turn: u64) -> Option<&SettlementSummary> {
        self.history.iter().find(|summary| summary.turn == turn)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SettlementSummary> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

impl Default for MarketMetrics {
    fn default() -> Self {
        Self::with_limit(256)
    }
}
