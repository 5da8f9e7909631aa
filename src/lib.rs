//! camrig: synchronized multi-camera acquisition and recording.
//!
//! Per-camera frame source workers feed bounded drop-oldest queues consumed
//! by preview pollers and per-camera video writers, all under one
//! start/stop/error lifecycle. The same lifecycle is drivable over a
//! single-client line-delimited JSON protocol, and a serial-attached pulse
//! generator can clock every camera's exposure in lock-step.
//!
//! # Usage
//! ```rust,no_run
//! use camrig::camera::{sim::SimSdk, CameraHandleSet};
//! use camrig::config::RigConfig;
//! use camrig::pipeline::Recorder;
//! use camrig::types::PreviewMode;
//!
//! let mut cams = CameraHandleSet::new(SimSdk::with_cameras(2));
//! cams.enumerate();
//! cams.connect().expect("cameras vanished");
//!
//! let mut recorder = Recorder::new(cams, RigConfig::load_or_default());
//! recorder.start_preview(PreviewMode::Multi, false).expect("start failed");
//! while let Some(frame) = recorder.poll_preview(0) {
//!     // hand to a display, drop, ...
//!     let _ = frame;
//! }
//! recorder.stop().expect("stop failed");
//! ```
//!
//! Vendor camera backends plug in behind [`camera::driver::CameraSdk`];
//! the crate ships a deterministic synthetic backend for offline use.

pub mod camera;
pub mod config;
pub mod control;
pub mod encoder;
pub mod errors;
pub mod pipeline;
pub mod remote;
pub mod sched;
pub mod settings;
pub mod trigger;
pub mod types;

// Re-exports for convenience
pub use config::RigConfig;
pub use errors::RigError;
pub use pipeline::{PipelineEvent, Recorder};
pub use remote::RemoteControlServer;
pub use trigger::TriggerController;
pub use types::{
    CameraIdentity, ControlScope, Frame, PipelineStatus, PreviewMode, RigState, Session,
    WriterState,
};

/// Initialize logging for the rig.
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "camrig=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
