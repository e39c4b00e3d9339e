#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Once;
use std::time::Duration;

use market_core::{SimulationConfig, SIMULATION_CONFIG_ENV};

static INIT: Once = Once::new();

/// Generous bound for anything waiting on turns; the fixture never sleeps.
pub const TURN_TIMEOUT: Duration = Duration::from_secs(10);

pub fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("test_simulation_config.json")
}

pub fn ensure_test_config() {
    INIT.call_once(|| {
        let config_path = fixture_path();

        debug_assert!(
            config_path.exists(),
            "missing test simulation config at {}",
            config_path.display()
        );

        std::env::set_var(SIMULATION_CONFIG_ENV, &config_path);
    });
}

pub fn test_config() -> SimulationConfig {
    SimulationConfig::from_file(&fixture_path()).expect("fixture config loads")
}
