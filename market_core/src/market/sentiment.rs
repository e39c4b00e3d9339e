use std::sync::Mutex;

use crate::config::SentimentConfig;
use crate::shock::ShockKind;

/// Political and economic health scores, each behind its own lock.
///
/// Scores never leave `floor..=cap`; the floor is at least one so the inverse
/// terms of the price formula stay finite.
#[derive(Debug)]
pub struct Sentiment {
    politics: Mutex<u32>,
    economy: Mutex<u32>,
    config: SentimentConfig,
}

impl Sentiment {
    pub fn new(politics: u32, economy: u32, config: SentimentConfig) -> Self {
        let config = SentimentConfig {
            floor: config.floor.max(1),
            cap: config.cap.max(config.floor.max(1)),
            ..config
        };
        Self {
            politics: Mutex::new(politics.clamp(config.floor, config.cap)),
            economy: Mutex::new(economy.clamp(config.floor, config.cap)),
            config,
        }
    }

    fn score(&self, kind: ShockKind) -> &Mutex<u32> {
        match kind {
            ShockKind::Politics => &self.politics,
            ShockKind::Economy => &self.economy,
        }
    }

    /// Applies one shock; returns the new score. Safe to call at any time.
    pub fn degrade(&self, kind: ShockKind) -> u32 {
        let mut score = self.score(kind).lock().expect("sentiment mutex poisoned");
        *score = score
            .saturating_sub(self.config.shock_penalty)
            .max(self.config.floor);
        *score
    }

    /// Relaxes both scores toward the cap, once per turn.
    pub fn recover(&self) -> (u32, u32) {
        let relax = |kind: ShockKind| {
            let mut score = self.score(kind).lock().expect("sentiment mutex poisoned");
            *score = score.saturating_add(self.config.recovery).min(self.config.cap);
            *score
        };
        (relax(ShockKind::Politics), relax(ShockKind::Economy))
    }

    pub fn politics(&self) -> u32 {
        *self.politics.lock().expect("sentiment mutex poisoned")
    }

    pub fn economy(&self) -> u32 {
        *self.economy.lock().expect("sentiment mutex poisoned")
    }

    pub fn floor(&self) -> u32 {
        self.config.floor
    }

    pub fn cap(&self) -> u32 {
        self.config.cap
    }
}
