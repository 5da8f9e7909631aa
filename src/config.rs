//! Runtime configuration for the rig.
//!
//! Loaded from `camrig.toml` (if present) layered with `CAMRIG_*` environment
//! variables; every knob has a default so the rig runs unconfigured.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::RigError;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RigConfig {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub queues: QueueConfig,
}

/// Remote control server endpoint and poll cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    /// Inbound poll interval while the pipeline is idle, milliseconds.
    pub idle_poll_ms: u64,
    /// Lengthened poll interval while a session is active, so the control
    /// thread does not steal cycles from frame handling.
    pub active_poll_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8880,
            idle_poll_ms: 500,
            active_poll_ms: 5_000,
        }
    }
}

/// Hardware trigger timing and serial parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Preferred serial port name; scanned ports are offered when unset.
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Delay between spawning workers and arming the trigger, so cameras
    /// reach steady state first.
    pub settle_delay_ms: u64,
    /// Interval at which `is_pulsing` is polled during teardown.
    pub stop_poll_ms: u64,
    /// Maximum number of stop polls before teardown proceeds anyway.
    pub stop_poll_max: u32,
    /// The liveness indicator auto-resets this long after the last PONG.
    pub liveness_reset_ms: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            settle_delay_ms: 500,
            stop_poll_ms: 500,
            stop_poll_max: 10,
            liveness_reset_ms: 5_000,
        }
    }
}

/// Unattended calibration capture window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Delay before the timed recording starts.
    pub wait_ms: u64,
    /// Length of the timed recording.
    pub duration_ms: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            wait_ms: 5_000,
            duration_ms: 30_000,
        }
    }
}

/// Recording defaults and encoder parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    pub save_path: PathBuf,
    pub fps: f64,
    pub hw_trigger: bool,
    pub codec: String,
    /// Constant-rate-factor quality parameter passed to the encoder.
    pub crf: u32,
    /// Codec names the external encoder is known to accept.
    pub codecs: Vec<String>,
    /// Write a per-writer timestamp sidecar file.
    pub write_timestamps: bool,
    /// Subfolder under a session path that `copy_files` targets.
    pub video_folder: String,
    /// Session-id substring that routes copied files to the session root
    /// instead of the video subfolder. Legacy naming exception; preserved,
    /// not extended.
    pub legacy_root_copy_tag: String,
    /// Driver-side wait bound for one frame.
    pub grab_timeout_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            save_path: PathBuf::from("./recordings"),
            fps: 30.0,
            hw_trigger: false,
            codec: "libx264".to_string(),
            crf: 17,
            codecs: vec![
                "libx264".to_string(),
                "h264_nvenc".to_string(),
                "hevc_nvenc".to_string(),
                "mjpeg".to_string(),
            ],
            write_timestamps: true,
            video_folder: "videos".to_string(),
            legacy_root_copy_tag: "MusterMaus".to_string(),
            grab_timeout_ms: 5_000,
        }
    }
}

/// Distribution queue capacities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub preview_capacity: usize,
    pub record_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            preview_capacity: 32,
            record_capacity: 256,
        }
    }
}

impl RigConfig {
    /// Load from a named file layered with `CAMRIG_*` environment variables.
    pub fn load_from_file(path: &str) -> Result<Self, RigError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("CAMRIG").separator("__"))
            .build()
            .map_err(|e| RigError::pipeline(format!("config build failed: {e}")))?;

        cfg.try_deserialize()
            .map_err(|e| RigError::pipeline(format!("config parse failed: {e}")))
    }

    /// Load from the default location or fall back to defaults.
    pub fn load_or_default() -> Self {
        Self::load_from_file("camrig").unwrap_or_else(|e| {
            log::warn!("failed to load config, using defaults: {e}");
            Self::default()
        })
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.trigger.settle_delay_ms)
    }

    pub fn stop_poll(&self) -> Duration {
        Duration::from_millis(self.trigger.stop_poll_ms)
    }

    pub fn calib_wait(&self) -> Duration {
        Duration::from_millis(self.calibration.wait_ms)
    }

    pub fn calib_duration(&self) -> Duration {
        Duration::from_millis(self.calibration.duration_ms)
    }

    pub fn grab_timeout(&self) -> Duration {
        Duration::from_millis(self.recording.grab_timeout_ms)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.recording.fps <= 0.0 || self.recording.fps > 500.0 {
            return Err("fps must be in (0, 500]".to_string());
        }
        if self.recording.crf > 51 {
            return Err("crf must be 0-51".to_string());
        }
        if self.queues.preview_capacity == 0 || self.queues.record_capacity == 0 {
            return Err("queue capacities must be nonzero".to_string());
        }
        if !self.recording.codecs.contains(&self.recording.codec) {
            return Err(format!(
                "default codec {} is not in the codec list",
                self.recording.codec
            ));
        }
        Ok(())
    }
}
