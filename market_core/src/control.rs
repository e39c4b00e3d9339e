use market_runtime::{parse_control_line, ControlCommand};
use tracing::{info, warn};

use crate::simulation::Simulation;

/// Reply sent for any input the control channel cannot act on.
pub const ERROR_REPLY: &str = "error";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlOutcome {
    pub reply: String,
    /// The simulation has been shut down; the caller should stop serving.
    pub terminate: bool,
}

impl ControlOutcome {
    fn reply(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            terminate: false,
        }
    }

    fn error() -> Self {
        Self::reply(ERROR_REPLY)
    }
}

/// Parses one line of control input and applies it.
pub fn handle_line(simulation: &mut Simulation, line: &str) -> ControlOutcome {
    match parse_control_line(line) {
        Ok(command) => dispatch(simulation, command),
        Err(err) => {
            warn!(
                target: "power_market::control",
                input = line.trim(),
                error = %err,
                "control.rejected"
            );
            ControlOutcome::error()
        }
    }
}

pub fn dispatch(simulation: &mut Simulation, command: ControlCommand) -> ControlOutcome {
    if simulation.is_stopped() {
        return ControlOutcome {
            reply: ERROR_REPLY.to_string(),
            terminate: true,
        };
    }
    match command {
        ControlCommand::End => {
            info!(target: "power_market::control", "control.end_requested");
            simulation.shutdown();
            ControlOutcome {
                reply: command.verb().to_string(),
                terminate: true,
            }
        }
        ControlCommand::Report => ControlOutcome::reply(simulation.report()),
        ControlCommand::Next => match simulation.advance() {
            Ok(()) => ControlOutcome::reply(command.verb()),
            Err(err) => {
                warn!(
                    target: "power_market::control",
                    error = %err,
                    "control.advance_refused"
                );
                ControlOutcome::error()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PacerConfig, PacerMode, SimulationConfig};

    fn simulation(mode: PacerMode) -> Simulation {
        let mut config = SimulationConfig::default();
        config.city.house_count = 2;
        config.pacer = PacerConfig {
            mode,
            interval_ms: 20,
        };
        Simulation::start(config).expect("simulation starts")
    }

    #[test]
    fn unknown_input_replies_error() {
        let mut sim = simulation(PacerMode::Manual);
        for line in ["", "status", "end now", "report 1"] {
            let outcome = handle_line(&mut sim, line);
            assert_eq!(outcome.reply, "error");
            assert!(!outcome.terminate);
        }
    }

    #[test]
    fn next_is_refused_in_auto_mode() {
        let mut sim = simulation(PacerMode::Auto);
        assert_eq!(handle_line(&mut sim, "next").reply, "error");
    }

    #[test]
    fn next_advances_manual_mode() {
        let mut sim = simulation(PacerMode::Manual);
        assert_eq!(handle_line(&mut sim, "next").reply, "next");
    }

    #[test]
    fn end_shuts_down_and_terminates() {
        let mut sim = simulation(PacerMode::Auto);
        let outcome = handle_line(&mut sim, "END");
        assert_eq!(
            outcome,
            ControlOutcome {
                reply: "end".to_string(),
                terminate: true
            }
        );
        assert!(sim.is_stopped());
        assert!(handle_line(&mut sim, "report").terminate);
    }
}
