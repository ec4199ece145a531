use rust_decimal::Decimal;

use crate::error::ConfigError;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use settings::{
    BrokerSettings, CalendarSettings, ClockSettings, Config, EventsLogSettings,
    ExchangeHoursSettings, MappingSettings, RecoverySettings,
};

/// Loads the application configuration from a TOML file.
///
/// This function is the primary entry point for this crate. It reads the
/// configuration file, deserializes it into our strongly-typed `Config`
/// struct, validates the cross-field constraints, and returns it.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name(path))
        .build()?;

    let config = builder.try_deserialize::<Config>()?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.broker.total_capital <= Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "broker.total_capital must be positive".to_string(),
        ));
    }
    if config.broker.max_leverage < Decimal::ONE {
        return Err(ConfigError::ValidationError(
            "broker.max_leverage must be at least 1".to_string(),
        ));
    }
    if config.clock.window_days <= 0 {
        return Err(ConfigError::ValidationError(
            "clock.window_days must be positive".to_string(),
        ));
    }
    if config.recovery.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "recovery.max_attempts must be at least 1".to_string(),
        ));
    }
    for (exchange, hours) in &config.calendar.exchanges {
        if hours.open >= hours.close {
            return Err(ConfigError::ValidationError(format!(
                "calendar hours for '{exchange}' must open before they close"
            )));
        }
    }
    Ok(())
}
