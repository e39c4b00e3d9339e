use std::sync::{Condvar, Mutex};

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BarrierError {
    #[error("barrier '{0}' was released for shutdown")]
    Released(&'static str),
}

/// Outcome of a successful rendezvous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWait {
    /// Exactly one participant per generation is the leader (the last to arrive).
    pub is_leader: bool,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    released: bool,
}

/// Reusable rendezvous point for a fixed number of parties.
///
/// Unlike `std::sync::Barrier`, it can be released: every current and future
/// waiter returns [`BarrierError::Released`] instead of blocking, so a peer that
/// has already left the turn loop never strands the others.
#[derive(Debug)]
pub struct TurnBarrier {
    name: &'static str,
    parties: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl TurnBarrier {
    pub fn new(name: &'static str, parties: usize) -> Self {
        assert!(parties > 0, "barrier '{name}' needs at least one party");
        Self {
            name,
            parties,
            state: Mutex::new(BarrierState::default()),
            cvar: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    pub fn wait(&self) -> Result<BarrierWait, BarrierError> {
        let mut state = self.state.lock().expect("barrier mutex poisoned");
        if state.released {
            return Err(BarrierError::Released(self.name));
        }

        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.cvar.notify_all();
            return Ok(BarrierWait {
                is_leader: true,
                generation,
            });
        }

        while state.generation == generation && !state.released {
            state = self.cvar.wait(state).expect("barrier mutex poisoned");
        }

        // A completed generation wins over a release that happened afterwards.
        if state.generation != generation {
            Ok(BarrierWait {
                is_leader: false,
                generation,
            })
        } else {
            Err(BarrierError::Released(self.name))
        }
    }

    /// Wakes every waiter with an error and makes all later waits fail fast.
    pub fn release(&self) {
        let mut state = self.state.lock().expect("barrier mutex poisoned");
        if !state.released {
            state.released = true;
            tracing::debug!(
                target: "power_market::turn",
                barrier = self.name,
                waiting = state.arrived,
                "barrier.released"
            );
        }
        self.cvar.notify_all();
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().expect("barrier mutex poisoned").released
    }
}
