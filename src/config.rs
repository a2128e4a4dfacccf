// Engine configuration - capacities and defaults, loadable from RON

use crate::sequencer::pattern::PatternConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Sizing of the preallocated structures and defaults for new objects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of each stage of the song reclaimer
    pub reclaimer_capacity: usize,
    /// Objects confirmed per reclamation tick
    pub confirm_batch: usize,
    /// Note events per pattern (two per note)
    pub arena_capacity: usize,
    /// Undo history depth
    pub max_history: usize,
    /// Beats
    pub default_pattern_length: u32,
    /// Note steps per beat
    pub default_steps: u32,
    /// Controller steps per beat
    pub default_cc_steps: u32,
    /// Beats
    pub default_song_length: u32,
    pub notification_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reclaimer_capacity: 1000,
            confirm_batch: 100,
            arena_capacity: 4096,
            max_history: 100,
            default_pattern_length: 4,
            default_steps: 4,
            default_cc_steps: 4,
            default_song_length: 64,
            notification_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn from_ron_str(data: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(data).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("reclaimer_capacity", self.reclaimer_capacity),
            ("confirm_batch", self.confirm_batch),
            ("arena_capacity", self.arena_capacity),
            ("default_pattern_length", self.default_pattern_length as usize),
            ("default_steps", self.default_steps as usize),
            ("default_cc_steps", self.default_cc_steps as usize),
            ("default_song_length", self.default_song_length as usize),
            ("notification_capacity", self.notification_capacity),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be positive")));
        }
        if self.default_cc_steps % self.default_steps != 0 {
            return Err(ConfigError::Invalid(format!(
                "default_cc_steps ({}) must be a multiple of default_steps ({})",
                self.default_cc_steps, self.default_steps
            )));
        }
        Ok(())
    }

    /// Pattern sizing derived from this configuration
    ///
    /// A pattern's reclaimer can never hold more slots than its arena has, so
    /// it is sized to the arena plus room for replaced tables.
    pub fn pattern_config(&self) -> PatternConfig {
        let reclaimer_capacity = self.arena_capacity + 64;
        PatternConfig {
            arena_capacity: self.arena_capacity,
            reclaimer_capacity,
            confirm_batch: reclaimer_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reclaimer_capacity, 1000);
        assert_eq!(config.confirm_batch, 100);
        assert_eq!(config.max_history, 100);
    }

    #[test]
    fn test_ron_round_trip() {
        let config = EngineConfig {
            arena_capacity: 512,
            max_history: 20,
            ..EngineConfig::default()
        };
        let text = config.to_ron_string().unwrap();
        assert_eq!(EngineConfig::from_ron_str(&text).unwrap(), config);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config = EngineConfig::from_ron_str("(max_history: 5)").unwrap();
        assert_eq!(config.max_history, 5);
        assert_eq!(config.arena_capacity, 4096);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(EngineConfig::from_ron_str("(default_steps: 0)").is_err());
        assert!(EngineConfig::from_ron_str("(default_steps: 4, default_cc_steps: 6)").is_err());
        assert!(EngineConfig::from_ron_str("not ron at all").is_err());
    }

    #[test]
    fn test_pattern_config_covers_arena() {
        let pattern = EngineConfig::default().pattern_config();
        assert!(pattern.reclaimer_capacity > pattern.arena_capacity);
    }
}
