//! Synthetic camera backend.
//!
//! Deterministic gradient frames paced at the requested rate, with the full
//! control surface of a real device. Used by the CLI when no vendor backend
//! is compiled in, and by the test suite for offline runs. Failure injection
//! (`fail_after_frames`, `vanish`) exercises the pipeline's error paths.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::camera::driver::{CameraDriver, CameraSdk, DriverLimits, RawFrame};
use crate::errors::RigError;
use crate::types::{CameraIdentity, PixelFormat};

const SIM_COLOR_MODES: [&str; 2] = ["Mono8", "RGB8"];
const SIM_GAIN_RANGE: (f64, f64) = (0.0, 24.0);
const SIM_EXPOSURE_RANGE: (f64, f64) = (20.0, 1_000_000.0);

#[derive(Debug, Clone)]
struct SimDevice {
    identity: CameraIdentity,
    /// Grabs succeed this many times, then fail. `None` disables injection.
    fail_after_frames: Option<u64>,
}

/// Enumerates a configurable set of synthetic devices.
///
/// Cloning shares the device list, so a test can make a device vanish
/// between `enumerate` and `connect`.
#[derive(Clone, Default)]
pub struct SimSdk {
    devices: Arc<Mutex<Vec<SimDevice>>>,
}

impl SimSdk {
    /// A rig of `count` cameras named cam0..camN.
    pub fn with_cameras(count: usize) -> Self {
        let sdk = Self::default();
        for i in 0..count {
            sdk.add_device(&format!("4002{i:04}"), &format!("cam{i}"));
        }
        sdk
    }

    pub fn add_device(&self, serial: &str, name: &str) {
        self.devices.lock().expect("lock poisoned").push(SimDevice {
            identity: CameraIdentity {
                serial: serial.to_string(),
                name: name.to_string(),
            },
            fail_after_frames: None,
        });
    }

    /// Simulate a device disappearing (unplugged between scan and connect).
    pub fn vanish(&self, serial: &str) {
        self.devices
            .lock()
            .expect("lock poisoned")
            .retain(|d| d.identity.serial != serial);
    }

    /// Make grabs on the named device fail after `n` delivered frames.
    pub fn fail_after_frames(&self, serial: &str, n: u64) {
        let mut devices = self.devices.lock().expect("lock poisoned");
        if let Some(dev) = devices.iter_mut().find(|d| d.identity.serial == serial) {
            dev.fail_after_frames = Some(n);
        }
    }
}

impl CameraSdk for SimSdk {
    fn enumerate(&self) -> Vec<CameraIdentity> {
        self.devices
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|d| d.identity.clone())
            .collect()
    }

    fn connect(
        &self,
        identities: &[CameraIdentity],
    ) -> Result<Vec<Box<dyn CameraDriver>>, RigError> {
        let devices = self.devices.lock().expect("lock poisoned");
        let mut out: Vec<Box<dyn CameraDriver>> = Vec::with_capacity(identities.len());
        for ident in identities {
            let dev = devices
                .iter()
                .find(|d| d.identity.serial == ident.serial)
                .ok_or_else(|| {
                    RigError::device(format!("camera {} ({}) vanished", ident.name, ident.serial))
                })?;
            out.push(Box::new(SimCamera::new(dev.clone())));
        }
        Ok(out)
    }
}

pub struct SimCamera {
    device: SimDevice,
    exposure_us: f64,
    gain: f64,
    color_mode: String,
    streaming: bool,
    fps: f64,
    frames_delivered: u64,
    stream_start: Option<Instant>,
    next_frame_at: Option<Instant>,
}

impl SimCamera {
    fn new(device: SimDevice) -> Self {
        Self {
            device,
            exposure_us: 5_000.0,
            gain: 0.0,
            color_mode: "Mono8".to_string(),
            streaming: false,
            fps: 30.0,
            frames_delivered: 0,
            stream_start: None,
            next_frame_at: None,
        }
    }

    fn pixel_format(&self) -> PixelFormat {
        if self.color_mode == "RGB8" {
            PixelFormat::Rgb8
        } else {
            PixelFormat::Mono8
        }
    }

    /// Gradient pattern varying per frame, so consumers can tell frames
    /// apart and encoders see temporal change.
    fn render(&self, frame_number: u64) -> Bytes {
        let (width, height, format) = self.format();
        let bpp = format.bytes_per_pixel();
        let base = (frame_number % 256) as u8;
        let mut data = vec![0u8; width as usize * height as usize * bpp];
        for y in 0..height as usize {
            for x in 0..width as usize {
                let idx = (y * width as usize + x) * bpp;
                data[idx] = base.wrapping_add((x % 256) as u8);
                if bpp == 3 {
                    data[idx + 1] = base.wrapping_add((y % 256) as u8);
                    data[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
                }
            }
        }
        Bytes::from(data)
    }
}

impl CameraDriver for SimCamera {
    fn identity(&self) -> &CameraIdentity {
        &self.device.identity
    }

    fn limits(&self) -> DriverLimits {
        DriverLimits {
            gain: SIM_GAIN_RANGE,
            exposure_us: SIM_EXPOSURE_RANGE,
            color_modes: SIM_COLOR_MODES.iter().map(|m| m.to_string()).collect(),
        }
    }

    fn format(&self) -> (u32, u32, PixelFormat) {
        (64, 48, self.pixel_format())
    }

    fn exposure_us(&self) -> Result<f64, RigError> {
        Ok(self.exposure_us)
    }

    fn set_exposure_us(&mut self, value: f64) -> Result<(), RigError> {
        self.exposure_us = value.clamp(SIM_EXPOSURE_RANGE.0, SIM_EXPOSURE_RANGE.1);
        Ok(())
    }

    fn gain(&self) -> Result<f64, RigError> {
        Ok(self.gain)
    }

    fn set_gain(&mut self, value: f64) -> Result<(), RigError> {
        self.gain = value.clamp(SIM_GAIN_RANGE.0, SIM_GAIN_RANGE.1);
        Ok(())
    }

    fn color_mode(&self) -> String {
        self.color_mode.clone()
    }

    fn set_color_mode(&mut self, mode: &str) -> Result<(), RigError> {
        if !SIM_COLOR_MODES.contains(&mode) {
            return Err(RigError::UnsupportedMode(mode.to_string()));
        }
        self.color_mode = mode.to_string();
        Ok(())
    }

    fn start_stream(&mut self, fps: f64, _hw_trigger: bool) -> Result<(), RigError> {
        self.fps = if fps > 0.0 { fps } else { 30.0 };
        self.streaming = true;
        self.frames_delivered = 0;
        let now = Instant::now();
        self.stream_start = Some(now);
        self.next_frame_at = Some(now);
        Ok(())
    }

    fn stop_stream(&mut self) {
        self.streaming = false;
        self.stream_start = None;
        self.next_frame_at = None;
    }

    fn grab_frame(&mut self, timeout: Duration) -> Result<RawFrame, RigError> {
        if !self.streaming {
            return Err(RigError::device(format!(
                "camera {} is not streaming",
                self.device.identity.name
            )));
        }
        if let Some(limit) = self.device.fail_after_frames {
            if self.frames_delivered >= limit {
                return Err(RigError::device(format!(
                    "camera {} read failed",
                    self.device.identity.name
                )));
            }
        }

        // Pace delivery at the configured rate, bounded by the caller's wait.
        let due = self.next_frame_at.unwrap_or_else(Instant::now);
        let now = Instant::now();
        if due > now {
            let wait = due - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Err(RigError::device(format!(
                    "camera {} frame wait timed out",
                    self.device.identity.name
                )));
            }
            std::thread::sleep(wait);
        }
        let interval = Duration::from_secs_f64(1.0 / self.fps);
        self.next_frame_at = Some(due.max(now) + interval);

        let start = self.stream_start.unwrap_or_else(Instant::now);
        let frame_number = self.frames_delivered;
        self.frames_delivered += 1;

        let (width, height, pixel_format) = self.format();
        Ok(RawFrame {
            width,
            height,
            pixel_format,
            timestamp_us: start.elapsed().as_micros() as u64,
            data: self.render(frame_number),
        })
    }

    fn run_auto_exposure(&mut self) -> Result<f64, RigError> {
        // Converge toward a nominal target the way the hardware routine
        // walks exposure over several captures.
        let target = 12_000.0;
        for _ in 0..5 {
            self.exposure_us += (target - self.exposure_us) * 0.5;
            std::thread::sleep(Duration::from_millis(2));
        }
        Ok(self.exposure_us)
    }

    fn run_auto_gain(&mut self) -> Result<f64, RigError> {
        let target = 6.0;
        for _ in 0..5 {
            self.gain += (target - self.gain) * 0.5;
            std::thread::sleep(Duration::from_millis(2));
        }
        Ok(self.gain)
    }

    fn run_white_balance(&mut self) -> Result<(), RigError> {
        std::thread::sleep(Duration::from_millis(5));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumerate_and_connect() {
        let sdk = SimSdk::with_cameras(3);
        let found = sdk.enumerate();
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].name, "cam0");

        let cams = sdk.connect(&found).unwrap();
        assert_eq!(cams.len(), 3);
    }

    #[test]
    fn test_connect_fails_when_device_vanished() {
        let sdk = SimSdk::with_cameras(2);
        let found = sdk.enumerate();
        sdk.vanish(&found[1].serial);
        let err = sdk.connect(&found).unwrap_err();
        assert!(matches!(err, RigError::DeviceUnavailable(_)));
    }

    #[test]
    fn test_grab_paces_and_numbers_frames() {
        let sdk = SimSdk::with_cameras(1);
        let mut cams = sdk.connect(&sdk.enumerate()).unwrap();
        let cam = &mut cams[0];
        cam.start_stream(200.0, false).unwrap();

        let a = cam.grab_frame(Duration::from_secs(1)).unwrap();
        let b = cam.grab_frame(Duration::from_secs(1)).unwrap();
        assert!(b.timestamp_us >= a.timestamp_us);
        assert_ne!(a.data[0], b.data[0]);
    }

    #[test]
    fn test_fail_injection() {
        let sdk = SimSdk::with_cameras(1);
        let found = sdk.enumerate();
        sdk.fail_after_frames(&found[0].serial, 1);
        let mut cams = sdk.connect(&found).unwrap();
        let cam = &mut cams[0];
        cam.start_stream(500.0, false).unwrap();
        assert!(cam.grab_frame(Duration::from_secs(1)).is_ok());
        assert!(cam.grab_frame(Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_unsupported_color_mode() {
        let sdk = SimSdk::with_cameras(1);
        let mut cams = sdk.connect(&sdk.enumerate()).unwrap();
        let err = cams[0].set_color_mode("YUV422").unwrap_err();
        assert!(matches!(err, RigError::UnsupportedMode(_)));
        assert!(cams[0].set_color_mode("RGB8").is_ok());
        assert_eq!(cams[0].color_mode(), "RGB8");
    }

    #[test]
    fn test_auto_exposure_converges() {
        let sdk = SimSdk::with_cameras(1);
        let mut cams = sdk.connect(&sdk.enumerate()).unwrap();
        let final_exp = cams[0].run_auto_exposure().unwrap();
        assert!((final_exp - 12_000.0).abs() < 1_000.0);
        assert_eq!(cams[0].exposure_us().unwrap(), final_exp);
    }
}
