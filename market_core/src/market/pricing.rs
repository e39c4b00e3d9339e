use crate::config::PricingConfig;
use crate::shared::WeatherConditions;

/// Offset keeping the temperature term finite down to the coldest weather.
pub const TEMPERATURE_OFFSET: i32 = 16;

/// Inputs to one price update, snapshotted under their own locks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceInputs {
    pub weather: WeatherConditions,
    pub aggregate_consumption: f64,
    pub politics: u32,
    pub economy: u32,
}

/// Illustrative pricing rule: decayed previous price plus weather, demand and
/// inverse sentiment terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingModel {
    coefficients: PricingConfig,
}

impl PricingModel {
    pub fn new(coefficients: PricingConfig) -> Self {
        Self { coefficients }
    }

    pub fn next_price(&self, price: f64, inputs: &PriceInputs) -> f64 {
        let PricingConfig { gamma, alpha, beta } = self.coefficients;
        let temperature_term =
            1.0 / f64::from(TEMPERATURE_OFFSET + inputs.weather.temperature).max(1.0);
        let politics = f64::from(inputs.politics.max(1));
        let economy = f64::from(inputs.economy.max(1));

        gamma * price
            + alpha[0] * temperature_term
            + alpha[1] * f64::from(inputs.weather.cloud_cover)
            + alpha[2] * inputs.aggregate_consumption
            + beta[0] / politics
            + beta[1] / economy
    }
}
