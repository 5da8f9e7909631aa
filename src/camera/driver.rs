//! Vendor SDK seam.
//!
//! The rig treats the camera driver as an opaque capability source: anything
//! that can enumerate devices, stream frames, and expose the usual control
//! surface plugs in here. The crate ships a deterministic synthetic backend
//! (`camera::sim`) behind the same traits.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use crate::errors::RigError;
use crate::types::{CameraIdentity, PixelFormat};

/// Hardware control ranges and capabilities, read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverLimits {
    /// (min, max) gain in device units.
    pub gain: (f64, f64),
    /// (min, max) exposure time in microseconds.
    pub exposure_us: (f64, f64),
    pub color_modes: Vec<String>,
}

/// One frame as delivered by the driver, before post-processing.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Monotonic capture time in microseconds, relative to stream start.
    pub timestamp_us: u64,
    pub data: Bytes,
}

/// Per-device driver contract.
///
/// Auto-routines are synchronous and block the caller for the duration of
/// the hardware convergence loop; callers needing responsiveness invoke them
/// off the control thread.
pub trait CameraDriver: Send {
    fn identity(&self) -> &CameraIdentity;

    fn limits(&self) -> DriverLimits;

    /// Streamed frame geometry, fixed for the life of the device.
    fn format(&self) -> (u32, u32, PixelFormat);

    fn exposure_us(&self) -> Result<f64, RigError>;
    fn set_exposure_us(&mut self, value: f64) -> Result<(), RigError>;

    fn gain(&self) -> Result<f64, RigError>;
    fn set_gain(&mut self, value: f64) -> Result<(), RigError>;

    fn color_mode(&self) -> String;
    fn set_color_mode(&mut self, mode: &str) -> Result<(), RigError>;

    fn start_stream(&mut self, fps: f64, hw_trigger: bool) -> Result<(), RigError>;
    fn stop_stream(&mut self);

    /// Block up to `timeout` for the next frame.
    fn grab_frame(&mut self, timeout: Duration) -> Result<RawFrame, RigError>;

    fn run_auto_exposure(&mut self) -> Result<f64, RigError>;
    fn run_auto_gain(&mut self) -> Result<f64, RigError>;
    fn run_white_balance(&mut self) -> Result<(), RigError>;
}

impl fmt::Debug for dyn CameraDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraDriver")
            .field("identity", self.identity())
            .finish()
    }
}

/// Device enumeration and attachment.
pub trait CameraSdk: Send {
    fn enumerate(&self) -> Vec<CameraIdentity>;

    /// Attach to previously enumerated devices. Fails with
    /// `DeviceUnavailable` if any of them has vanished since enumeration.
    fn connect(
        &self,
        identities: &[CameraIdentity],
    ) -> Result<Vec<Box<dyn CameraDriver>>, RigError>;
}
