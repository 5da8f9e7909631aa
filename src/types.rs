//! Core data model shared across the pipeline, protocol and settings layers.

use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Identity of an enumerated camera device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraIdentity {
    /// Hardware serial number.
    pub serial: String,
    /// User-defined device name, as programmed into the camera. Settings
    /// files are keyed by this name.
    pub name: String,
}

/// Pixel layout of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Mono8,
    Rgb8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Mono8 => 1,
            PixelFormat::Rgb8 => 3,
        }
    }

    /// Name understood by the external encoder's rawvideo input.
    pub fn rawvideo_name(&self) -> &'static str {
        match self {
            PixelFormat::Mono8 => "gray",
            PixelFormat::Rgb8 => "rgb24",
        }
    }
}

/// One captured image, immutable after publish.
///
/// The payload is a shared buffer so a worker can publish the same frame to
/// its preview queue and its record queue without copying pixels.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Index of the producing camera within the connected set.
    pub cam_index: usize,
    /// Per-camera sequence number, starting at 1.
    pub sequence: u64,
    /// Camera-relative monotonic capture time in microseconds.
    pub timestamp_us: u64,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub data: Bytes,
}

/// The unit of one record/preview run.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub fps: f64,
    pub codec: String,
    pub crf: u32,
    pub use_hw_trigger: bool,
    pub save_dir: PathBuf,
}

/// Session parameters used when a start request does not override them.
/// Mirrors the top-level keys of the settings file.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDefaults {
    pub save_path: PathBuf,
    pub fps: f64,
    pub hw_trigger: bool,
    pub codec: String,
    pub crf: u32,
}

impl SessionDefaults {
    /// Build a session from these defaults with the caller's overrides.
    pub fn session(&self, id: impl Into<String>, frame_rate: Option<f64>) -> Session {
        Session {
            id: id.into(),
            fps: frame_rate.unwrap_or(self.fps),
            codec: self.codec.clone(),
            crf: self.crf,
            use_hw_trigger: self.hw_trigger,
            save_dir: self.save_path.clone(),
        }
    }
}

/// Lifecycle of one video writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriterState {
    Idle,
    Recording,
    /// Graceful stop: buffered frames flushed, file closed. Terminal for
    /// this file; a new session creates fresh writers.
    Stopped,
    Failed,
}

/// Orchestrator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RigState {
    Idle,
    Previewing,
    Recording,
    Calibrating,
}

/// Preview topology: one window on one camera, or the full camera wall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewMode {
    Single { cam_index: usize },
    Multi,
}

/// Target of a control broadcast (auto exposure/gain/white balance).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlScope {
    One(usize),
    /// Iterates cameras in enumeration order; not atomic across cameras.
    All,
}

/// Snapshot of the live pipeline, derived from the worker/writer set.
///
/// `is_recording` and `is_viewing` are mutually exclusive; both false means
/// the pipeline is idle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub is_recording: bool,
    pub is_viewing: bool,
    pub error_flag: bool,
    pub preview_depths: Vec<usize>,
    pub record_depths: Vec<usize>,
}
