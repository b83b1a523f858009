//! Engine configuration loading: pacing intervals and channel sizing.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationSeconds, serde_as};
use tracing::{info, warn};

/// Default location on disk where the engine looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/engine.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZ_PULSE_CONFIG_PATH";

const DEFAULT_BUS_CAPACITY: usize = 64;
const DEFAULT_REVEAL_HOLD: Duration = Duration::from_secs(6);
const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);

/// Immutable runtime configuration shared by hosts and players.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-subscriber buffer depth of session broadcast channels.
    pub bus_capacity: usize,
    /// How long the reveal/leaderboard feedback stays on screen before the
    /// host advances past an expired question.
    pub reveal_hold: Duration,
    /// Upper bound on the persistence work of a single state transition.
    pub transition_timeout: Duration,
}

impl EngineConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(path = %path.display(), "loaded engine config");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bus_capacity: DEFAULT_BUS_CAPACITY,
            reveal_hold: DEFAULT_REVEAL_HOLD,
            transition_timeout: DEFAULT_TRANSITION_TIMEOUT,
        }
    }
}

/// JSON representation of the configuration file.
#[serde_as]
#[derive(Debug, Deserialize)]
struct RawConfig {
    bus_capacity: usize,
    #[serde_as(as = "DurationSeconds<u64>")]
    reveal_hold: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    transition_timeout: Duration,
}

impl From<RawConfig> for EngineConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            bus_capacity: value.bus_capacity,
            reveal_hold: value.reveal_hold,
            transition_timeout: value.transition_timeout,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_config_parses_durations_as_seconds() {
        let raw: RawConfig = serde_json::from_str(
            r#"{"bus_capacity": 16, "reveal_hold": 3, "transition_timeout": 10}"#,
        )
        .unwrap();
        let config: EngineConfig = raw.into();
        assert_eq!(config.bus_capacity, 16);
        assert_eq!(config.reveal_hold, Duration::from_secs(3));
        assert_eq!(config.transition_timeout, Duration::from_secs(10));
    }

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert!(config.bus_capacity > 0);
        assert!(config.reveal_hold > Duration::ZERO);
    }
}
