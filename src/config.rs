// ABOUTME: Loads TOML configuration for the realtime session daemon.
// ABOUTME: Provides defaults for connection, conversation, PTT, embedding, and audio settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub ptt: PttConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

/// Device class the daemon is running on. Touch devices get a mobile
/// connect preamble and a longer PTT release buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceClass {
    #[default]
    Desktop,
    Mobile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Endpoint that issues short-lived session credentials.
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
    /// Realtime peer endpoint the transport connects to.
    #[serde(default = "default_realtime_url")]
    pub realtime_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub device_class: DeviceClass,
    /// How long a PTT press waits for the data channel to open.
    #[serde(default = "default_data_channel_timeout_ms")]
    pub data_channel_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PttConfig {
    /// Tail absorbed after release before the buffer is committed.
    #[serde(default = "default_release_buffer_ms")]
    pub release_buffer_ms: u64,
    /// Longer tail for touch devices, where release lands early.
    #[serde(default = "default_touch_release_buffer_ms")]
    pub touch_release_buffer_ms: u64,
    /// How long an interruption barrier stays armed with no drain signal.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_circuit_open_ms")]
    pub circuit_open_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
}

fn default_token_endpoint() -> String {
    "http://localhost:3001/session".to_string()
}

fn default_realtime_url() -> String {
    "wss://api.openai.com/v1/realtime".to_string()
}

fn default_model() -> String {
    "gpt-4o-realtime-preview".to_string()
}

fn default_data_channel_timeout_ms() -> u64 {
    5000
}

fn default_system_prompt() -> String {
    "You are a friendly voice conversation partner. Keep replies short and spoken-word natural."
        .to_string()
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_release_buffer_ms() -> u64 {
    300
}

fn default_touch_release_buffer_ms() -> u64 {
    700
}

fn default_drain_timeout_ms() -> u64 {
    2000
}

fn default_embedding_endpoint() -> String {
    "http://localhost:3001".to_string()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_backoff_max_ms() -> u64 {
    2000
}

fn default_request_timeout_ms() -> u64 {
    3000
}

fn default_failure_threshold() -> u32 {
    4
}

fn default_circuit_open_ms() -> u64 {
    30_000
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_channels() -> u16 {
    1
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            token_endpoint: default_token_endpoint(),
            realtime_url: default_realtime_url(),
            model: default_model(),
            device_class: DeviceClass::default(),
            data_channel_timeout_ms: default_data_channel_timeout_ms(),
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            voice: default_voice(),
            transcription_model: default_transcription_model(),
        }
    }
}

impl Default for PttConfig {
    fn default() -> Self {
        Self {
            release_buffer_ms: default_release_buffer_ms(),
            touch_release_buffer_ms: default_touch_release_buffer_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_embedding_endpoint(),
            retry_attempts: default_retry_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            circuit_open_ms: default_circuit_open_ms(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
        }
    }
}

impl PttConfig {
    /// Release buffer for the given device class. Touch devices report
    /// release earlier relative to actual end of speech.
    pub fn release_buffer(&self, device_class: DeviceClass) -> Duration {
        match device_class {
            DeviceClass::Desktop => Duration::from_millis(self.release_buffer_ms),
            DeviceClass::Mobile => Duration::from_millis(self.touch_release_buffer_ms),
        }
    }
}

impl Config {
    /// Load configuration from the standard config file location.
    /// Falls back to defaults if the file doesn't exist.
    pub fn load() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let config_path = Self::config_file_path();
        if !config_path.exists() {
            return Ok(Config::default());
        }
        let contents = std::fs::read_to_string(&config_path)?;
        Self::load_from_str(&contents)
    }

    fn load_from_str(contents: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(toml::from_str(contents)?)
    }

    fn config_file_path() -> PathBuf {
        let xdg_config = std::env::var("XDG_CONFIG_HOME").unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            format!("{home}/.config")
        });
        Path::new(&xdg_config).join("voxlink").join("config.toml")
    }

    /// Save the current configuration to the standard config file location.
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let config_path = Self::config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, contents)?;
        tracing::info!("Configuration saved to {}", config_path.display());
        Ok(())
    }
}
