use relay_core::{
    defaults::{
        DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE, DEFAULT_VOICE,
        SessionDefaults, WELCOME_INSTRUCTIONS, is_supported_voice,
    },
    weather::{OPEN_METEO_FORECAST_URL, OPEN_METEO_GEOCODING_URL},
};
use std::{fmt::Display, net::SocketAddr, str::FromStr};
use tracing::Level;

pub const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: String,
    pub realtime_url: String,
    pub realtime_model: String,
    pub voice: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub send_greeting: bool,
    pub weather_geocoding_url: String,
    pub weather_forecast_url: String,
    pub log_payloads: bool,
    pub log_level: Level,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Reads `name` and parses it, falling back to `default` when unset.
fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("'{raw}': {e}"))),
        Err(_) => Ok(default),
    }
}

fn parse_flag(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(
                name.to_string(),
                format!("'{raw}' is not a boolean"),
            )),
        },
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:8080");
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let realtime_url = var_or("REALTIME_URL", DEFAULT_REALTIME_URL);
        let realtime_model = var_or("REALTIME_MODEL", DEFAULT_MODEL);

        let voice = var_or("REALTIME_VOICE", DEFAULT_VOICE).to_lowercase();
        if !is_supported_voice(&voice) {
            return Err(ConfigError::InvalidValue(
                "REALTIME_VOICE".to_string(),
                format!("'{voice}' is not a supported voice"),
            ));
        }

        let temperature = parse_var("TEMPERATURE", DEFAULT_TEMPERATURE)?;
        let max_output_tokens = parse_var("MAX_OUTPUT_TOKENS", DEFAULT_MAX_OUTPUT_TOKENS)?;
        let send_greeting = parse_flag("SEND_GREETING", true)?;
        let log_payloads = parse_flag("LOG_PAYLOADS", false)?;

        let weather_geocoding_url = var_or("WEATHER_GEOCODING_URL", OPEN_METEO_GEOCODING_URL);
        let weather_forecast_url = var_or("WEATHER_FORECAST_URL", OPEN_METEO_FORECAST_URL);

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            openai_api_key,
            realtime_url,
            realtime_model,
            voice,
            temperature,
            max_output_tokens,
            send_greeting,
            weather_geocoding_url,
            weather_forecast_url,
            log_payloads,
            log_level,
        })
    }

    /// The full upstream URL, model included.
    pub fn realtime_endpoint(&self) -> String {
        format!("{}?model={}", self.realtime_url, self.realtime_model)
    }

    /// Builds the per-session defaults from the configured overrides.
    pub fn session_defaults(&self) -> SessionDefaults {
        SessionDefaults {
            voice: self.voice.clone(),
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
            welcome_instructions: self
                .send_greeting
                .then(|| WELCOME_INSTRUCTIONS.to_string()),
            ..SessionDefaults::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tracing::Level;

    fn clear_env_vars() {
        unsafe {
            for name in [
                "BIND_ADDRESS",
                "OPENAI_API_KEY",
                "REALTIME_URL",
                "REALTIME_MODEL",
                "REALTIME_VOICE",
                "TEMPERATURE",
                "MAX_OUTPUT_TOKENS",
                "SEND_GREETING",
                "WEATHER_GEOCODING_URL",
                "WEATHER_FORECAST_URL",
                "LOG_PAYLOADS",
                "RUST_LOG",
            ] {
                env::remove_var(name);
            }
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("OPENAI_API_KEY", "test-openai-key");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal() {
        clear_env_vars();
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:8080");
        assert_eq!(config.openai_api_key, "test-openai-key");
        assert_eq!(config.realtime_url, DEFAULT_REALTIME_URL);
        assert_eq!(config.realtime_model, DEFAULT_MODEL);
        assert_eq!(config.voice, "alloy");
        assert_eq!(config.temperature, 0.8);
        assert_eq!(config.max_output_tokens, 400);
        assert!(config.send_greeting);
        assert!(!config.log_payloads);
        assert_eq!(config.weather_geocoding_url, OPEN_METEO_GEOCODING_URL);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(
            config.realtime_endpoint(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-mini-realtime-preview-2024-12-17"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:9000");
            env::set_var("OPENAI_API_KEY", "custom-key");
            env::set_var("REALTIME_URL", "ws://localhost:4000/v1/realtime");
            env::set_var("REALTIME_MODEL", "gpt-4o-realtime-preview");
            env::set_var("REALTIME_VOICE", "Verse");
            env::set_var("TEMPERATURE", "0.6");
            env::set_var("MAX_OUTPUT_TOKENS", "1024");
            env::set_var("SEND_GREETING", "false");
            env::set_var("LOG_PAYLOADS", "1");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:9000");
        assert_eq!(config.voice, "verse");
        assert_eq!(config.temperature, 0.6);
        assert_eq!(config.max_output_tokens, 1024);
        assert!(!config.send_greeting);
        assert!(config.log_payloads);
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(
            config.realtime_endpoint(),
            "ws://localhost:4000/v1/realtime?model=gpt-4o-realtime-preview"
        );

        let defaults = config.session_defaults();
        assert_eq!(defaults.voice, "verse");
        assert_eq!(defaults.max_output_tokens, 1024);
        assert!(defaults.greeting().is_none());
    }

    #[test]
    #[serial]
    fn test_config_missing_openai_key() {
        clear_env_vars();

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "OPENAI_API_KEY"),
            _ => panic!("Expected MissingVar for OPENAI_API_KEY"),
        }

        unsafe {
            env::set_var("OPENAI_API_KEY", "   ");
        }
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::MissingVar(_))
        ));
    }

    #[test]
    #[serial]
    fn test_config_invalid_bind_address() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("BIND_ADDRESS", "not-a-valid-address");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "BIND_ADDRESS"),
            _ => panic!("Expected InvalidValue for BIND_ADDRESS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_unsupported_voice() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("REALTIME_VOICE", "robot");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, msg) => {
                assert_eq!(var, "REALTIME_VOICE");
                assert!(msg.contains("robot"));
            }
            _ => panic!("Expected InvalidValue for REALTIME_VOICE"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_numbers_and_flags() {
        for (name, value) in [
            ("TEMPERATURE", "warm"),
            ("MAX_OUTPUT_TOKENS", "-5"),
            ("SEND_GREETING", "maybe"),
            ("RUST_LOG", "not-a-level"),
        ] {
            clear_env_vars();
            set_minimal_env();
            unsafe {
                env::set_var(name, value);
            }

            match Config::from_env().unwrap_err() {
                ConfigError::InvalidValue(var, _) => assert_eq!(var, name),
                other => panic!("Expected InvalidValue for {name}, got {other:?}"),
            }
        }
    }
}
