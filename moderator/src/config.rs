//! Engine configuration
//!
//! Defaults, overridden by a TOML file and then by `MODERATOR_*` environment
//! variables. The host binary applies CLI flags last.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consensus::{ConsensusProtocol, PackFallback, TieBreak};
use crate::game::SubPhase;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Window for each night step
    pub night_secs: u64,
    pub deliberation_secs: u64,
    pub vote_secs: u64,
    pub captain_secs: u64,
    /// Revenge shot window
    pub last_stand_secs: u64,
    /// How long a naturally ended game stays queryable before eviction
    pub ended_grace_secs: u64,
    /// How long a command fingerprint suppresses redeliveries
    pub dedup_ttl_ms: u64,
    pub pack_fallback: PackFallback,
    pub tie_break: TieBreak,
    /// Seed for dealing and random tie-breaks; entropy when unset
    pub rng_seed: Option<u64>,
    pub state_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            night_secs: 90,
            deliberation_secs: 120,
            vote_secs: 60,
            captain_secs: 45,
            last_stand_secs: 30,
            ended_grace_secs: 300,
            dedup_ttl_ms: 3_000,
            pack_fallback: PackFallback::Plurality,
            tie_break: TieBreak::FirstSorted,
            rng_seed: None,
            state_path: PathBuf::from("moderator-state"),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> ConfigResult<Option<T>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Read a TOML file; missing keys keep their defaults
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Defaults with environment overrides
    pub fn from_env() -> ConfigResult<Self> {
        Self::default().with_env()
    }

    /// Apply `MODERATOR_*` overrides on top of `self`
    pub fn with_env(mut self) -> ConfigResult<Self> {
        if let Some(v) = parse_env("MODERATOR_NIGHT_SECS")? {
            self.night_secs = v;
        }
        if let Some(v) = parse_env("MODERATOR_DELIBERATION_SECS")? {
            self.deliberation_secs = v;
        }
        if let Some(v) = parse_env("MODERATOR_VOTE_SECS")? {
            self.vote_secs = v;
        }
        if let Some(v) = parse_env("MODERATOR_CAPTAIN_SECS")? {
            self.captain_secs = v;
        }
        if let Some(v) = parse_env("MODERATOR_LAST_STAND_SECS")? {
            self.last_stand_secs = v;
        }
        if let Some(v) = parse_env("MODERATOR_ENDED_GRACE_SECS")? {
            self.ended_grace_secs = v;
        }
        if let Some(v) = parse_env("MODERATOR_DEDUP_TTL_MS")? {
            self.dedup_ttl_ms = v;
        }
        if let Some(v) = parse_env("MODERATOR_RNG_SEED")? {
            self.rng_seed = Some(v);
        }
        if let Ok(path) = std::env::var("MODERATOR_STATE_PATH") {
            self.state_path = PathBuf::from(path);
        }
        if let Ok(value) = std::env::var("MODERATOR_PACK_FALLBACK") {
            self.pack_fallback = match value.to_lowercase().as_str() {
                "plurality" => PackFallback::Plurality,
                "no_kill" | "nokill" => PackFallback::NoKill,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "MODERATOR_PACK_FALLBACK".into(),
                        value,
                    })
                }
            };
        }
        if let Ok(value) = std::env::var("MODERATOR_TIE_BREAK") {
            self.tie_break = match value.to_lowercase().as_str() {
                "first_sorted" | "first" => TieBreak::FirstSorted,
                "random" => TieBreak::Random,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "MODERATOR_TIE_BREAK".into(),
                        value,
                    })
                }
            };
        }
        Ok(self)
    }

    /// Timer for a sub-phase; `None` for steps that never wait
    pub fn timeout_for(&self, sub_phase: SubPhase) -> Option<Duration> {
        let secs = match sub_phase {
            SubPhase::Wake | SubPhase::Closed => return None,
            SubPhase::Deliberation => self.deliberation_secs,
            SubPhase::Vote => self.vote_secs,
            SubPhase::CaptainVote => self.captain_secs,
            SubPhase::LastStand => self.last_stand_secs,
            _ => self.night_secs,
        };
        Some(Duration::from_secs(secs))
    }

    pub fn ended_grace(&self) -> Duration {
        Duration::from_secs(self.ended_grace_secs)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_millis(self.dedup_ttl_ms)
    }

    pub fn consensus(&self) -> ConsensusProtocol {
        ConsensusProtocol::new(self.pack_fallback, self.tie_break)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(
            config.timeout_for(SubPhase::Witch),
            Some(Duration::from_secs(90))
        );
        assert_eq!(config.timeout_for(SubPhase::Wake), None);
        assert_eq!(config.ended_grace(), Duration::from_secs(300));
        assert_eq!(config.consensus().max_rounds, 2);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            vote_secs = 15
            pack_fallback = "no_kill"
            tie_break = "random"
            "#,
        )
        .unwrap();
        assert_eq!(config.vote_secs, 15);
        assert_eq!(config.night_secs, 90);
        assert_eq!(config.pack_fallback, PackFallback::NoKill);
        assert_eq!(config.tie_break, TieBreak::Random);
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            EngineConfig::from_toml_str("vote_secs = \"soon\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moderator.toml");
        std::fs::write(&path, "night_secs = 5\nrng_seed = 42\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.night_secs, 5);
        assert_eq!(config.rng_seed, Some(42));

        assert!(matches!(
            EngineConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
