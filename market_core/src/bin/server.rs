use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use market_core::{
    handle_line, load_simulation_config_from_env, ControlListener, ShutdownSignal, Simulation,
    SimulationConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Power market simulation server", long_about = None)]
struct Args {
    /// JSON configuration file. Falls back to MARKET_SIM_CONFIG, then the builtin.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => SimulationConfig::from_file(path)
            .with_context(|| format!("Failed to load config at {}", path.display()))?,
        None => load_simulation_config_from_env().0,
    };

    let listener_shutdown = Arc::new(ShutdownSignal::new());
    let listener = ControlListener::bind(config.control_bind, Arc::clone(&listener_shutdown))
        .with_context(|| format!("Failed to bind control listener at {}", config.control_bind))?;
    let mut simulation = Simulation::start(config).context("Failed to start simulation")?;

    info!(
        target: "power_market::server",
        control_bind = %listener.local_addr(),
        "market_server.ready"
    );

    while let Ok(request) = listener.requests().recv() {
        let outcome = handle_line(&mut simulation, &request.line);
        // The client may have disconnected; nothing to do about it here.
        let _ = request.reply.send(outcome.reply);
        if outcome.terminate {
            break;
        }
    }

    simulation.shutdown();
    listener_shutdown.trigger();
    listener.join();
    info!(target: "power_market::server", "market_server.stopped");
    Ok(())
}
