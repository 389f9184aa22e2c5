//! Application configuration
//!
//! Every field has a default, so a missing file or a partial file is fine.
//!
//! ```toml
//! [capture]
//! sample_rate = 16000
//! block_size = 4096
//! framing = "base64_text"
//!
//! [playback]
//! sample_rate = 24000
//! fade_samples = 64
//!
//! [transport]
//! url = "ws://localhost:8080/ws/interview"
//!
//! [session]
//! candidate_name = "Ana"
//! position = "Backend Engineer"
//! ```

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::{Difficulty, Language, StartSession, Voice};

/// Overrides the transport URL
pub const URL_ENV: &str = "DUPLEX_VOICE_URL";
/// Supplies the caller's own API key
pub const API_KEY_ENV: &str = "DUPLEX_VOICE_API_KEY";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub transport: TransportConfig,
    pub session: SessionConfig,
}

/// How captured audio frames travel on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFraming {
    /// Base64 text body
    #[default]
    Base64Text,
    /// Raw PCM16 binary body
    RawBinary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    /// Samples per transmitted block
    pub block_size: usize,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub framing: AudioFraming,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::constants::CAPTURE_SAMPLE_RATE,
            block_size: crate::constants::CAPTURE_BLOCK_SIZE,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            framing: AudioFraming::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub sample_rate: u32,
    /// Length of the linear fade at each chunk edge
    pub fade_samples: usize,
    /// How long before a chunk ends the next one is scheduled
    pub drain_lead_ms: u64,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    /// Failures in a row before the rest of the burst is dropped
    pub max_consecutive_failures: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::constants::PLAYBACK_SAMPLE_RATE,
            fade_samples: crate::constants::FADE_SAMPLES,
            drain_lead_ms: 50,
            retry_base_ms: 10,
            retry_max_ms: 320,
            max_consecutive_failures: 8,
        }
    }
}

impl PlaybackConfig {
    pub fn drain_lead(&self) -> Duration {
        Duration::from_millis(self.drain_lead_ms)
    }

    /// Delay before retrying after the `failures`-th failure in a row
    pub fn retry_delay(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        let delay = self.retry_base_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.retry_max_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub url: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/ws/interview".to_string(),
        }
    }
}

/// Start parameters used by the command-line session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub candidate_name: String,
    pub position: String,
    pub difficulty: Difficulty,
    pub language: Language,
    pub voice: Voice,
    pub interviewer_name_en: String,
    pub interviewer_name_bg: String,
    /// File whose contents are sent as the CV text
    pub cv_path: Option<PathBuf>,
    pub user_api_key: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            candidate_name: String::new(),
            position: String::new(),
            difficulty: Difficulty::default(),
            language: Language::default(),
            voice: Voice::default(),
            interviewer_name_en: "George".to_string(),
            interviewer_name_bg: "Георги".to_string(),
            cv_path: None,
            user_api_key: None,
        }
    }
}

impl SessionConfig {
    /// Build start parameters, reading the CV file if one is configured
    pub fn to_start_session(&self) -> Result<StartSession> {
        let cv_text = match &self.cv_path {
            Some(path) => Some(std::fs::read_to_string(path)?),
            None => None,
        };
        Ok(StartSession {
            candidate_name: self.candidate_name.clone(),
            position: self.position.clone(),
            difficulty: self.difficulty,
            language: self.language,
            cv_text,
            voice_id: Some(self.voice),
            interviewer_name_en: Some(self.interviewer_name_en.clone()),
            interviewer_name_bg: Some(self.interviewer_name_bg.clone()),
            user_api_key: self.user_api_key.clone(),
        })
    }
}

impl AppConfig {
    /// Platform config file location
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "duplex-voice").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load from `path`, or the platform config file, or fall back to
    /// defaults when neither exists. Environment overrides apply last.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(&path)?,
                _ => {
                    tracing::debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env();
        Ok(config)
    }

    /// Write as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(URL_ENV) {
            self.transport.url = url;
        }
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            self.session.user_api_key = Some(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("duplex-voice-{}", uuid::Uuid::new_v4()))
            .join("config.toml")
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.capture.sample_rate, 16000);
        assert_eq!(config.capture.block_size, 4096);
        assert_eq!(config.capture.framing, AudioFraming::Base64Text);
        assert_eq!(config.playback.sample_rate, 24000);
        assert_eq!(config.playback.fade_samples, 64);
        assert_eq!(config.session.interviewer_name_en, "George");
    }

    #[test]
    fn test_partial_file() {
        let config: AppConfig = toml::from_str(
            r#"
            [capture]
            framing = "raw_binary"

            [session]
            candidate_name = "Ana"
            difficulty = "Hard"
            voice = "Despina"
            "#,
        )
        .unwrap();
        assert_eq!(config.capture.framing, AudioFraming::RawBinary);
        assert_eq!(config.capture.block_size, 4096);
        assert_eq!(config.session.difficulty, Difficulty::Hard);
        assert_eq!(config.session.voice, Voice::Despina);
        assert_eq!(config.playback, PlaybackConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let path = scratch_path();
        let mut config = AppConfig::default();
        config.session.position = "SRE".to_string();
        config.transport.url = "ws://example.test/ws".to_string();

        config.save(&path).unwrap();
        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let path = scratch_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "capture = 3").unwrap();

        assert!(matches!(AppConfig::load(&path), Err(Error::Config(_))));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let playback = PlaybackConfig::default();
        let delays: Vec<u64> = (1..=8)
            .map(|n| playback.retry_delay(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![10, 20, 40, 80, 160, 320, 320, 320]);
    }

    #[test]
    fn test_start_session_from_config() {
        let session = SessionConfig {
            candidate_name: "Ana".into(),
            position: "QA".into(),
            ..SessionConfig::default()
        };
        let start = session.to_start_session().unwrap();
        assert_eq!(start.voice_id, Some(Voice::Algieba));
        assert_eq!(start.interviewer_name_bg.as_deref(), Some("Георги"));
        assert!(start.cv_text.is_none());
    }
}
