//! Configuration loading and the mods directory layout.
//!
//! Settings are read from `config.json` in the configuration directory, then
//! overridden by `TRAINER_*` environment variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_MODS_ROOT, DEFAULT_TICK_INTERVAL, DEFAULT_TICK_INTERVAL_MS, LIBS_DIR,
    STANDARD_LIBS_DIR,
};

/// Configuration for the automation host.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Root of the mods tree (`libs/standard`, `libs/<game>`, per-game mods).
    pub mods_root: PathBuf,
    /// Interval between ticks, in milliseconds.
    pub tick_interval_ms: f64,
    /// Game id used when the command line does not name one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_game_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mods_root: PathBuf::from(DEFAULT_MODS_ROOT),
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            default_game_id: None,
        }
    }
}

impl Config {
    /// Returns the configuration directory path.
    ///
    /// Directory selection priority:
    /// 1. `TRAINER_CONFIG_DIR` env var
    /// 2. Platform config dir (e.g. `~/.config/trainer-lua`)
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("TRAINER_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("trainer-lua"))
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join("config.json");
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from an explicit file, without env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `TRAINER_*` overrides looked up through `lookup`.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup("TRAINER_MODS_ROOT") {
            self.mods_root = PathBuf::from(root);
        }

        if let Some(interval) = lookup("TRAINER_TICK_INTERVAL_MS") {
            match interval.parse::<f64>() {
                Ok(ms) => self.tick_interval_ms = ms,
                Err(e) => log::warn!("Ignoring TRAINER_TICK_INTERVAL_MS={interval}: {e}"),
            }
        }

        if let Some(game_id) = lookup("TRAINER_GAME_ID") {
            self.default_game_id = Some(game_id);
        }
    }

    /// The tick interval as a `Duration`.
    ///
    /// Non-positive or unrepresentable values fall back to one 60 Hz frame.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        if self.tick_interval_ms > 0.0 {
            Duration::try_from_secs_f64(self.tick_interval_ms / 1000.0)
                .unwrap_or(DEFAULT_TICK_INTERVAL)
        } else {
            DEFAULT_TICK_INTERVAL
        }
    }

    /// Directory layout rooted at `mods_root`.
    #[must_use]
    pub fn layout(&self) -> ModsLayout {
        ModsLayout::new(self.mods_root.clone())
    }
}

/// Where libraries and mods live on disk.
///
/// ```text
/// <root>/
///  ├── libs/standard/   executed for every game
///  ├── libs/<game_id>/  executed for one game
///  └── <game_id>/...    mods and their main scripts
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModsLayout {
    root: PathBuf,
}

impl ModsLayout {
    /// Layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The mods root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Libraries applied to every game.
    #[must_use]
    pub fn standard_library_dir(&self) -> PathBuf {
        self.root.join(LIBS_DIR).join(STANDARD_LIBS_DIR)
    }

    /// Libraries applied to one game.
    #[must_use]
    pub fn game_library_dir(&self, game_id: &str) -> PathBuf {
        self.root.join(LIBS_DIR).join(game_id)
    }

    /// Name used for `path` in diagnostics: the path relative to the mods
    /// root, or the path unchanged when it lies outside it.
    #[must_use]
    pub fn display_name(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative.to_string_lossy().replace('\\', "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mods_root, PathBuf::from("mods"));
        let drift = config.tick_interval().abs_diff(DEFAULT_TICK_INTERVAL);
        assert!(drift < Duration::from_micros(1), "drift was {drift:?}");
        assert!(config.default_game_id.is_none());
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let config = Config::load_from(&dir.path().join("config.json")).expect("Should load");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_partial_file() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "tick_interval_ms": 33.3 }"#).expect("Should write config");

        let config = Config::load_from(&path).expect("Should load");
        assert_eq!(config.mods_root, PathBuf::from("mods"));
        assert!((config.tick_interval_ms - 33.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_from_malformed_file_errors() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").expect("Should write config");
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_overrides_applied() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("TRAINER_MODS_ROOT", "/srv/mods"),
            ("TRAINER_TICK_INTERVAL_MS", "50"),
            ("TRAINER_GAME_ID", "NPEA00385"),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(ToString::to_string));

        assert_eq!(config.mods_root, PathBuf::from("/srv/mods"));
        assert_eq!(config.tick_interval(), Duration::from_millis(50));
        assert_eq!(config.default_game_id.as_deref(), Some("NPEA00385"));
    }

    #[test]
    fn test_bad_interval_override_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|key| {
            (key == "TRAINER_TICK_INTERVAL_MS").then(|| "fast".to_string())
        });
        assert!((config.tick_interval_ms - DEFAULT_TICK_INTERVAL_MS).abs() < f64::EPSILON);
    }

    #[test]
    fn test_non_positive_interval_falls_back() {
        let config = Config {
            tick_interval_ms: 0.0,
            ..Config::default()
        };
        assert_eq!(config.tick_interval(), DEFAULT_TICK_INTERVAL);
    }

    #[test]
    fn test_layout_paths() {
        let layout = ModsLayout::new("/games/mods");
        assert_eq!(
            layout.standard_library_dir(),
            PathBuf::from("/games/mods/libs/standard")
        );
        assert_eq!(
            layout.game_library_dir("NPEA00385"),
            PathBuf::from("/games/mods/libs/NPEA00385")
        );
        assert_eq!(
            layout.display_name(Path::new("/games/mods/NPEA00385/speed/main.lua")),
            "NPEA00385/speed/main.lua"
        );
        assert_eq!(layout.display_name(Path::new("/elsewhere/x.lua")), "/elsewhere/x.lua");
    }
}
