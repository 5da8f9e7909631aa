//! Camera handle set: enumeration, connection and per-device control.
//!
//! The set owns the connected devices; frame source workers hold shared
//! handles, never ownership. All control calls go through the handle so the
//! worker and the control thread never race on the driver.

pub mod driver;
pub mod sim;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::camera::driver::{CameraDriver, CameraSdk, DriverLimits, RawFrame};
use crate::errors::RigError;
use crate::types::{CameraIdentity, PixelFormat};

/// Shared reference to one connected camera.
#[derive(Clone)]
pub struct CameraHandle {
    identity: CameraIdentity,
    driver: Arc<Mutex<Box<dyn CameraDriver>>>,
    flip_x: Arc<AtomicBool>,
    flip_y: Arc<AtomicBool>,
}

impl CameraHandle {
    fn new(driver: Box<dyn CameraDriver>) -> Self {
        let identity = driver.identity().clone();
        Self {
            identity,
            driver: Arc::new(Mutex::new(driver)),
            flip_x: Arc::new(AtomicBool::new(false)),
            flip_y: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn identity(&self) -> &CameraIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn limits(&self) -> DriverLimits {
        self.driver.lock().expect("lock poisoned").limits()
    }

    pub fn format(&self) -> (u32, u32, PixelFormat) {
        self.driver.lock().expect("lock poisoned").format()
    }

    pub fn exposure_us(&self) -> Result<f64, RigError> {
        self.driver.lock().expect("lock poisoned").exposure_us()
    }

    pub fn set_exposure_us(&self, value: f64) -> Result<(), RigError> {
        self.driver
            .lock()
            .expect("lock poisoned")
            .set_exposure_us(value)
    }

    pub fn gain(&self) -> Result<f64, RigError> {
        self.driver.lock().expect("lock poisoned").gain()
    }

    pub fn set_gain(&self, value: f64) -> Result<(), RigError> {
        self.driver.lock().expect("lock poisoned").set_gain(value)
    }

    pub fn color_mode(&self) -> String {
        self.driver.lock().expect("lock poisoned").color_mode()
    }

    /// Fails with `UnsupportedMode` when the mode is not in the device's
    /// supported set.
    pub fn set_color_mode(&self, mode: &str) -> Result<(), RigError> {
        let mut driver = self.driver.lock().expect("lock poisoned");
        if !driver.limits().color_modes.iter().any(|m| m == mode) {
            return Err(RigError::UnsupportedMode(mode.to_string()));
        }
        driver.set_color_mode(mode)
    }

    /// Idempotent toggle of the horizontal flip.
    pub fn flip_x(&self) -> bool {
        !self.flip_x.fetch_xor(true, Ordering::SeqCst)
    }

    /// Idempotent toggle of the vertical flip.
    pub fn flip_y(&self) -> bool {
        !self.flip_y.fetch_xor(true, Ordering::SeqCst)
    }

    /// Current (flip_x, flip_y), read by the worker on every frame.
    pub fn flips(&self) -> (bool, bool) {
        (
            self.flip_x.load(Ordering::SeqCst),
            self.flip_y.load(Ordering::SeqCst),
        )
    }

    /// Blocks for the hardware convergence loop.
    pub fn run_auto_exposure(&self) -> Result<f64, RigError> {
        self.driver.lock().expect("lock poisoned").run_auto_exposure()
    }

    /// Blocks for the hardware convergence loop.
    pub fn run_auto_gain(&self) -> Result<f64, RigError> {
        self.driver.lock().expect("lock poisoned").run_auto_gain()
    }

    pub fn run_white_balance(&self) -> Result<(), RigError> {
        self.driver
            .lock()
            .expect("lock poisoned")
            .run_white_balance()
    }

    pub(crate) fn start_stream(&self, fps: f64, hw_trigger: bool) -> Result<(), RigError> {
        self.driver
            .lock()
            .expect("lock poisoned")
            .start_stream(fps, hw_trigger)
    }

    pub(crate) fn stop_stream(&self) {
        self.driver.lock().expect("lock poisoned").stop_stream()
    }

    pub(crate) fn grab_frame(&self, timeout: Duration) -> Result<RawFrame, RigError> {
        self.driver.lock().expect("lock poisoned").grab_frame(timeout)
    }
}

/// Owns the connected camera set.
pub struct CameraHandleSet {
    sdk: Box<dyn CameraSdk>,
    enumerated: Vec<CameraIdentity>,
    handles: Vec<CameraHandle>,
}

impl CameraHandleSet {
    pub fn new(sdk: impl CameraSdk + 'static) -> Self {
        Self {
            sdk: Box::new(sdk),
            enumerated: Vec::new(),
            handles: Vec::new(),
        }
    }

    /// Scan for devices. Does not touch existing connections.
    pub fn enumerate(&mut self) -> &[CameraIdentity] {
        self.enumerated = self.sdk.enumerate();
        log::info!("found {} camera(s)", self.enumerated.len());
        for ident in &self.enumerated {
            log::debug!("  {} (SN {})", ident.name, ident.serial);
        }
        &self.enumerated
    }

    /// Connect every enumerated device, in enumeration order.
    pub fn connect(&mut self) -> Result<usize, RigError> {
        if self.enumerated.is_empty() {
            return Err(RigError::device("no cameras enumerated"));
        }
        let drivers = self.sdk.connect(&self.enumerated)?;
        self.handles = drivers.into_iter().map(CameraHandle::new).collect();
        log::info!("connected {} camera(s)", self.handles.len());
        Ok(self.handles.len())
    }

    pub fn disconnect_all(&mut self) {
        if !self.handles.is_empty() {
            log::info!("disconnecting {} camera(s)", self.handles.len());
        }
        self.handles.clear();
    }

    pub fn is_connected(&self) -> bool {
        !self.handles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn handle(&self, cam_index: usize) -> Result<&CameraHandle, RigError> {
        self.handles
            .get(cam_index)
            .ok_or_else(|| RigError::device(format!("no camera at index {cam_index}")))
    }

    pub fn handles(&self) -> &[CameraHandle] {
        &self.handles
    }

    pub fn names(&self) -> Vec<String> {
        self.handles.iter().map(|h| h.name().to_string()).collect()
    }
}
