use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Foreground sampling / app-lock enforcement tick.
    pub sample_tick_secs: u64,
    /// Device-lock fallback poll; bounds staleness when push delivery drops.
    pub device_lock_poll_secs: u64,
    pub content_debounce_ms: u64,
    pub usage_period_secs: u64,
    /// Apps below this weekly total are treated as noise and not uploaded.
    pub usage_noise_floor_minutes: u64,
    pub classification_timeout_secs: u64,
    pub wake_lease_secs: u64,
    pub restart_delay_secs: u64,
    /// Applications whose surfaced text is captured for classification.
    pub monitored_apps: Vec<String>,
    /// Prefix matches excluded from usage aggregation.
    pub system_app_prefixes: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sample_tick_secs: 1,
            device_lock_poll_secs: 1,
            content_debounce_ms: 2000,
            usage_period_secs: 15 * 60,
            usage_noise_floor_minutes: 1,
            classification_timeout_secs: 30,
            wake_lease_secs: 10 * 60,
            restart_delay_secs: 1,
            monitored_apps: vec![
                "com.android.chrome".into(),
                "org.mozilla.firefox".into(),
                "com.opera.browser".into(),
                "com.microsoft.emmx".into(),
            ],
            system_app_prefixes: vec![
                "com.android.".into(),
                "com.google.android.".into(),
                "android".into(),
            ],
        }
    }
}

impl Settings {
    pub fn sample_tick(&self) -> Duration {
        Duration::from_secs(self.sample_tick_secs)
    }

    pub fn device_lock_poll(&self) -> Duration {
        Duration::from_secs(self.device_lock_poll_secs)
    }

    pub fn content_debounce(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.content_debounce_ms as i64)
    }

    pub fn usage_period(&self) -> Duration {
        Duration::from_secs(self.usage_period_secs)
    }

    pub fn classification_timeout(&self) -> Duration {
        Duration::from_secs(self.classification_timeout_secs)
    }

    pub fn wake_lease(&self) -> Duration {
        Duration::from_secs(self.wake_lease_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    /// Shortens the coarse intervals when AEGIS_DEBUG is set so the full
    /// pipeline can be observed in a dev session.
    pub fn apply_debug_overrides(&mut self) {
        let debug_mode = std::env::var("AEGIS_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.usage_period_secs = 30;
            self.wake_lease_secs = 60;
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<Settings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            Settings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn current(&self) -> Settings {
        self.data.read().unwrap().clone()
    }

    pub fn update(&self, settings: Settings) -> Result<()> {
        {
            let mut guard = self.data.write().unwrap();
            *guard = settings;
            self.persist(&guard)?;
        }
        Ok(())
    }

    fn persist(&self, data: &Settings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_intervals() {
        let settings = Settings::default();
        assert_eq!(settings.sample_tick_secs, 1);
        assert_eq!(settings.content_debounce_ms, 2000);
        assert_eq!(settings.usage_period_secs, 900);
        assert_eq!(settings.classification_timeout_secs, 30);
        assert_eq!(settings.wake_lease_secs, 600);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let store =
            SettingsStore::new(std::env::temp_dir().join("aegis-settings-missing.json")).unwrap();
        assert_eq!(store.current().sample_tick_secs, 1);
    }
}
