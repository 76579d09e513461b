use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use nestor_nes::Button;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSettings {
    pub enabled: bool,
    /// Queue depth between the emulator and the device, in milliseconds
    pub buffer_ms: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer_ms: 1000,
        }
    }
}

impl AudioSettings {
    /// Queue length in samples at the device's `sample_rate`.
    pub fn queue_capacity(&self, sample_rate: u32) -> usize {
        ((sample_rate as u64 * self.buffer_ms as u64) / 1000).max(1) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub audio: AudioSettings,
    /// Save-state and battery RAM root; `saves/` beside the binary when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Per-category overrides, e.g. `{"ppu": "trace"}`
    #[serde(default)]
    pub log: BTreeMap<String, String>,
    /// Buttons held on each pad for the whole run
    #[serde(default)]
    pub hold: [Vec<Button>; 2],
    #[serde(default)]
    pub last_rom_path: Option<String>,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            audio: AudioSettings::default(),
            data_dir: None,
            log_level: default_log_level(),
            log: BTreeMap::new(),
            hold: Default::default(),
            last_rom_path: None,
        }
    }
}

impl Settings {
    /// Get the config file path relative to the executable
    pub fn config_path() -> PathBuf {
        let mut path = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));
        path.push("config.json");
        path
    }

    /// Load settings, falling back to defaults when the file is missing or
    /// does not parse.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    // runs before the logger is installed
                    eprintln!(
                        "Warning: failed to parse {}: {}. Using defaults.",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Bitmask of the buttons held on `player`'s pad.
    pub fn held_buttons(&self, player: usize) -> u8 {
        self.hold
            .get(player)
            .map(|buttons| buttons.iter().fold(0, |mask, b| mask | b.mask()))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestor_core::audio::DEFAULT_QUEUE_CAPACITY;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.audio.enabled);
        assert_eq!(settings.audio.queue_capacity(44_100), DEFAULT_QUEUE_CAPACITY);
        assert_eq!(settings.audio.queue_capacity(48_000), 48_000);
        assert_eq!(settings.log_level, "warn");
        assert_eq!(settings.data_dir, None);
    }

    #[test]
    fn test_old_sample_rate_key_is_ignored() {
        let settings: Settings =
            serde_json::from_str(r#"{"audio": {"enabled": false, "sample_rate": 22050, "buffer_ms": 250}}"#)
                .expect("parses");
        assert!(!settings.audio.enabled);
        assert_eq!(settings.audio.queue_capacity(48_000), 12_000);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"log": {"ppu": "trace"}, "hold": [["Start", "A"], []]}"#)
                .expect("parses");
        assert_eq!(settings.audio, AudioSettings::default());
        assert_eq!(settings.log.get("ppu").map(String::as_str), Some("trace"));
        assert_eq!(settings.held_buttons(0), Button::Start.mask() | Button::A.mask());
        assert_eq!(settings.held_buttons(1), 0);
        assert_eq!(settings.held_buttons(2), 0);
    }

    #[test]
    fn test_settings_save_load() {
        let test_dir = std::env::temp_dir().join("nestor_test_settings");
        fs::create_dir_all(&test_dir).unwrap();
        let test_config = test_dir.join("config.json");

        let settings = Settings {
            last_rom_path: Some("/test/path/game.nes".to_string()),
            data_dir: Some(PathBuf::from("/tmp/saves")),
            ..Default::default()
        };
        settings.save(&test_config).unwrap();
        assert_eq!(Settings::load(&test_config), settings);

        fs::write(&test_config, "{ not json").unwrap();
        assert_eq!(Settings::load(&test_config), Settings::default());

        fs::remove_dir_all(&test_dir).unwrap();
    }
}
