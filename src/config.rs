//! Application-level configuration loading: liveness windows, scoring bounds, sub-game timings
//! and the avatar set.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TRIVIA_ROOM_BACK_CONFIG_PATH";

/// Keepalive and garbage-collection windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessConfig {
    /// A player silent for longer than this is evicted.
    pub player_timeout: Duration,
    /// A host silent for longer than this is detached.
    pub host_timeout: Duration,
    /// Period of the monitor sweep.
    pub sweep_interval: Duration,
    /// Rooms without host activity for this long are torn down.
    pub room_inactivity: Duration,
}

/// Settings of the ranked-submission sub-game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceConfig {
    /// Length of the reveal animation before answering opens.
    pub animation: Duration,
    /// Length of the answering phase.
    pub answer_duration: Duration,
    /// Points granted to every fully-correct submission.
    pub correct_points: i32,
    /// Extra points for the single fastest fully-correct submission.
    pub winner_bonus: i32,
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    pub liveness: LivenessConfig,
    pub sequence: SequenceConfig,
    /// Largest accepted magnitude for a single `host:updateScore`.
    pub max_score_delta: i32,
    avatars: Vec<String>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to baked-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        avatars = app_config.avatars.len(),
                        "loaded configuration"
                    );
                    app_config
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

    /// Map a client-supplied avatar onto the allowed set.
    ///
    /// Unknown or missing selectors resolve to the first configured avatar.
    pub fn resolve_avatar(&self, requested: Option<&str>) -> String {
        requested
            .map(str::trim)
            .and_then(|wanted| self.avatars.iter().find(|avatar| avatar.as_str() == wanted))
            .or_else(|| self.avatars.first())
            .cloned()
            .unwrap_or_else(|| DEFAULT_AVATARS[0].to_string())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

const DEFAULT_AVATARS: [&str; 10] = [
    "cat", "dog", "fox", "owl", "panda", "robot", "alien", "ghost", "unicorn", "dragon",
];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    liveness: RawLiveness,
    scoring: RawScoring,
    sequence: RawSequence,
    avatars: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawLiveness {
    player_timeout_ms: u64,
    host_timeout_ms: u64,
    sweep_interval_ms: u64,
    room_inactivity_ms: u64,
}

impl Default for RawLiveness {
    fn default() -> Self {
        Self {
            player_timeout_ms: 30_000,
            host_timeout_ms: 30_000,
            sweep_interval_ms: 10_000,
            room_inactivity_ms: 2 * 60 * 60 * 1000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawScoring {
    max_score_delta: i32,
}

impl Default for RawScoring {
    fn default() -> Self {
        Self {
            max_score_delta: 10_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawSequence {
    animation_ms: u64,
    answer_duration_ms: u64,
    correct_points: i32,
    winner_bonus: i32,
}

impl Default for RawSequence {
    fn default() -> Self {
        Self {
            animation_ms: 3_000,
            answer_duration_ms: 30_000,
            correct_points: 10,
            winner_bonus: 5,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let avatars = value
            .avatars
            .map(|list| {
                list.into_iter()
                    .map(|avatar| avatar.trim().to_string())
                    .filter(|avatar| !avatar.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| DEFAULT_AVATARS.iter().map(|a| a.to_string()).collect());

        Self {
            liveness: LivenessConfig {
                player_timeout: Duration::from_millis(value.liveness.player_timeout_ms),
                host_timeout: Duration::from_millis(value.liveness.host_timeout_ms),
                sweep_interval: Duration::from_millis(value.liveness.sweep_interval_ms.max(1)),
                room_inactivity: Duration::from_millis(value.liveness.room_inactivity_ms),
            },
            sequence: SequenceConfig {
                animation: Duration::from_millis(value.sequence.animation_ms),
                answer_duration: Duration::from_millis(value.sequence.answer_duration_ms),
                correct_points: value.sequence.correct_points,
                winner_bonus: value.sequence.winner_bonus,
            },
            max_score_delta: value.scoring.max_score_delta.saturating_abs(),
            avatars,
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
    fn partial_file_keeps_defaults_for_missing_sections() {
        let raw: RawConfig =
            serde_json::from_str(r#"{ "scoring": { "max_score_delta": 500 } }"#).unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.max_score_delta, 500);
        assert_eq!(config.sequence.animation, Duration::from_secs(3));
        assert_eq!(config.liveness.player_timeout, Duration::from_secs(30));
    }

    #[test]
    fn unknown_avatar_falls_back_to_first_entry() {
        let config = AppConfig::default();
        assert_eq!(config.resolve_avatar(Some("fox")), "fox");
        assert_eq!(config.resolve_avatar(Some("<script>")), "cat");
        assert_eq!(config.resolve_avatar(None), "cat");
    }

    #[test]
    fn empty_avatar_list_is_ignored() {
        let raw: RawConfig = serde_json::from_str(r#"{ "avatars": [" ", ""] }"#).unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.resolve_avatar(Some("owl")), "owl");
    }
}
