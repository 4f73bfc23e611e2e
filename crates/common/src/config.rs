//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Defaults for progressive decode pipelines.
    pub pipeline: PipelineDefaults,

    /// Defaults for the render/encode loop.
    pub render: RenderDefaults,

    /// Audio track encoding parameters.
    pub audio: AudioDefaults,

    /// Output multiplexer parameters.
    pub mux: MuxDefaults,
}

/// Default decode pipeline parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineDefaults {
    /// Size of each range request in bytes.
    pub chunk_size: u64,

    /// Number of samples the demuxer buffers before emitting a batch.
    pub samples_per_batch: usize,

    /// Frames presented before this time (seconds) are discarded.
    pub seek_secs: f64,

    /// Delay used to coalesce flow-control evaluations.
    pub flow_debounce_ms: u64,

    /// Upper bound on a decoder flush; `None` waits indefinitely.
    pub flush_timeout_ms: Option<u64>,
}

/// Default render loop parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderDefaults {
    pub width: u32,
    pub height: u32,
    pub fps: u32,

    /// Encoder queue depth above which the loop stops submitting.
    pub encoder_queue_ceiling: usize,

    /// Poll interval while waiting for the encoder queue to drain.
    pub backpressure_poll_ms: u64,

    /// Seconds between forced keyframes.
    pub keyframe_interval_secs: u32,

    /// Video codec string handed to the encoder.
    pub video_codec: String,

    /// Target video bitrate in bits per second.
    pub video_bitrate: u32,
}

/// Audio encoder parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioDefaults {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u32,
}

/// Multiplexer output parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxDefaults {
    /// Bytes buffered before a segment is written to storage.
    pub segment_size: u64,

    /// Whether the container index is placed before the media data.
    pub fast_start: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "framecast=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for PipelineDefaults {
    fn default() -> Self {
        Self {
            chunk_size: MIB,
            samples_per_batch: 10,
            seek_secs: 0.0,
            flow_debounce_ms: 20,
            flush_timeout_ms: None,
        }
    }
}

impl Default for RenderDefaults {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 24,
            encoder_queue_ceiling: 20,
            backpressure_poll_ms: 1,
            keyframe_interval_secs: 8,
            video_codec: "avc1.640028".to_string(),
            video_bitrate: 2 * MIB as u32,
        }
    }
}

impl Default for AudioDefaults {
    fn default() -> Self {
        Self {
            codec: "opus".to_string(),
            sample_rate: 44_100,
            channels: 2,
            bitrate: 128_000,
        }
    }
}

impl Default for MuxDefaults {
    fn default() -> Self {
        Self {
            segment_size: 30 * MIB,
            fast_start: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from an explicit path, falling back to defaults.
    pub fn load_from(config_path: &std::path::Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("framecast").join("config.json")
}
