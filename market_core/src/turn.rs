//! Lockstep turn protocol shared by weather, market, city and pacer.
//!
//! Every participant runs the same loop: `compute`, rendezvous at the compute
//! barrier, `commit`, rendezvous at the write barrier, repeat. No participant
//! can start turn `n + 1` before every peer has finished the write step of
//! turn `n`.

use std::io;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use market_runtime::SettlementDecodeError;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::barrier::{BarrierError, TurnBarrier};
use crate::bus::BusError;
use crate::shared::SharedState;
use crate::shutdown::ShutdownSignal;

#[derive(Debug, Error)]
pub enum TurnError {
    /// Shutdown arrived while the step was blocked; the loop must exit.
    #[error("interrupted by shutdown")]
    Interrupted,
    #[error(transparent)]
    Barrier(#[from] BarrierError),
    #[error("settlement bus failure: {0}")]
    Bus(#[from] BusError),
    #[error("malformed settlement payload: {0}")]
    Decode(#[from] SettlementDecodeError),
}

impl TurnError {
    fn ends_loop(&self) -> bool {
        matches!(self, TurnError::Interrupted | TurnError::Barrier(_))
    }
}

/// Capability implemented by each lockstep entity.
///
/// Both callbacks only touch state owned by the entity (or shared state the
/// entity is the designated writer of) until the following barrier.
pub trait TurnProcess: Send + 'static {
    fn name(&self) -> &'static str;

    fn compute(&mut self) -> Result<(), TurnError>;

    fn commit(&mut self) -> Result<(), TurnError>;

    /// Runs once after the loop exits, on the entity's own thread.
    fn finish(&mut self) {}
}

/// Releases the turn barriers when the owning loop exits for any reason,
/// including a panic inside a callback.
struct BarrierRelease<'a> {
    shared: &'a SharedState,
}

impl Drop for BarrierRelease<'_> {
    fn drop(&mut self) {
        self.shared.release_barriers();
    }
}

/// Drives `process` through turns until shutdown or a released barrier.
pub fn run_turn_loop<P: TurnProcess>(
    process: &mut P,
    shared: &SharedState,
    shutdown: &ShutdownSignal,
) {
    let _release = BarrierRelease { shared };
    let name = process.name();
    info!(target: "power_market::turn", process = name, "turn_process.started");

    loop {
        if shutdown.is_triggered() {
            break;
        }
        let computed = process.compute();
        if phase_outcome(name, "compute", computed).is_break() {
            break;
        }
        if rendezvous(name, shared.compute_barrier()).is_break() {
            break;
        }

        let committed = process.commit();
        if phase_outcome(name, "commit", committed).is_break() {
            break;
        }
        if rendezvous(name, shared.write_barrier()).is_break() {
            break;
        }
    }

    process.finish();
    info!(target: "power_market::turn", process = name, "turn_process.stopped");
}

fn phase_outcome(
    process: &'static str,
    phase: &'static str,
    result: Result<(), TurnError>,
) -> ControlFlow<()> {
    match result {
        Ok(()) => ControlFlow::Continue(()),
        Err(err) if err.ends_loop() => {
            debug!(
                target: "power_market::turn",
                process,
                phase,
                reason = %err,
                "turn_process.exiting"
            );
            ControlFlow::Break(())
        }
        Err(err) => {
            // Reported but not fatal: peers are still waiting at the barrier.
            error!(
                target: "power_market::turn",
                process,
                phase,
                error = %err,
                "turn_process.phase_failed"
            );
            ControlFlow::Continue(())
        }
    }
}

fn rendezvous(process: &'static str, barrier: &TurnBarrier) -> ControlFlow<()> {
    match barrier.wait() {
        Ok(_) => ControlFlow::Continue(()),
        Err(err) => {
            debug!(
                target: "power_market::turn",
                process,
                reason = %err,
                "turn_process.exiting"
            );
            ControlFlow::Break(())
        }
    }
}

/// Runs `process` on a dedicated, named thread.
pub fn spawn_turn_process<P: TurnProcess>(
    mut process: P,
    shared: Arc<SharedState>,
    shutdown: Arc<ShutdownSignal>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("turn-{}", process.name()))
        .spawn(move || run_turn_loop(&mut process, &shared, &shutdown))
}
