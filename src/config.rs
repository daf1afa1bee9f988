//! Configuration for the progression engine

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressionConfig {
    /// XP awarded per completed lesson
    #[serde(default = "default_xp_per_lesson")]
    pub xp_per_lesson: u32,

    /// Fail operations loudly when two catalog entities normalize to the
    /// same alias, instead of keeping the first writer and logging
    #[serde(default)]
    pub strict_alias_collisions: bool,
}

fn default_xp_per_lesson() -> u32 {
    10
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            xp_per_lesson: default_xp_per_lesson(),
            strict_alias_collisions: false,
        }
    }
}

impl ProgressionConfig {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProgressionConfig::default();
        assert_eq!(config.xp_per_lesson, 10);
        assert!(!config.strict_alias_collisions);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("progression.toml");

        let config = ProgressionConfig {
            xp_per_lesson: 25,
            strict_alias_collisions: true,
        };
        config.save(&path).unwrap();

        let loaded = ProgressionConfig::load(&path).unwrap();
        assert_eq!(loaded.xp_per_lesson, 25);
        assert!(loaded.strict_alias_collisions);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ProgressionConfig = toml::from_str("xp_per_lesson = 50").unwrap();
        assert_eq!(config.xp_per_lesson, 50);
        assert!(!config.strict_alias_collisions);
    }
}
