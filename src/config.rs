//! Recorder configuration

use crate::encoder::EncoderSettings;
use crate::utils::error::{RecorderError, RecorderResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings for joining rooms and writing recordings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BotConfig {
    /// WebSocket URL of the room service
    pub livekit_url: String,
    pub api_key: String,
    #[serde(skip_serializing)]
    pub api_secret: String,
    /// Identity the hidden recorder joins with
    pub identity: String,
    /// Lifetime of issued join tokens in seconds
    pub token_ttl_secs: i64,
    /// Root directory; recordings land in `videos/` and `audios/` below it
    pub recordings_dir: PathBuf,
    pub encoder: EncoderSettings,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            livekit_url: "ws://localhost:7880".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            identity: "recorder".to_string(),
            token_ttl_secs: 6 * 60 * 60,
            recordings_dir: PathBuf::from("./recordings"),
            encoder: EncoderSettings::default(),
        }
    }
}

impl BotConfig {
    /// Load settings from a JSON file; absent fields keep their defaults
    pub fn load(path: &Path) -> RecorderResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Check the settings needed to join rooms
    pub fn validate(&self) -> RecorderResult<()> {
        if self.livekit_url.trim().is_empty() {
            return Err(RecorderError::Config("room service URL is empty".to_string()));
        }
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            return Err(RecorderError::Config(
                "API key and secret are required to sign join tokens".to_string(),
            ));
        }
        if self.token_ttl_secs <= 0 {
            return Err(RecorderError::Config(format!(
                "token TTL must be positive, got {}",
                self.token_ttl_secs
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: BotConfig =
            serde_json::from_str(r#"{"apiKey": "key", "recordingsDir": "/data/rec"}"#).unwrap();
        assert_eq!(config.api_key, "key");
        assert_eq!(config.recordings_dir, PathBuf::from("/data/rec"));
        assert_eq!(config.identity, "recorder");
        assert_eq!(config.encoder.video_frame_rate, 30);
    }

    #[test]
    fn test_secret_is_not_serialized() {
        let config = BotConfig {
            api_secret: "hunter2".to_string(),
            ..BotConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_validate_requires_credentials() {
        let missing = BotConfig::default();
        assert!(matches!(missing.validate(), Err(RecorderError::Config(_))));

        let ready = BotConfig {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            ..BotConfig::default()
        };
        assert!(ready.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recorder.json");
        std::fs::write(
            &path,
            r#"{"livekitUrl": "wss://rtc.example.com", "encoder": {"ffmpegPath": "/opt/ffmpeg"}}"#,
        )
        .unwrap();

        let config = BotConfig::load(&path).unwrap();
        assert_eq!(config.livekit_url, "wss://rtc.example.com");
        assert_eq!(config.encoder.ffmpeg_path, "/opt/ffmpeg");
        assert_eq!(config.encoder.audio_sample_rate, 48000);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            BotConfig::load(&path),
            Err(RecorderError::Serialization(_))
        ));
        assert!(matches!(
            BotConfig::load(&dir.path().join("missing.json")),
            Err(RecorderError::Io(_))
        ));
    }
}
