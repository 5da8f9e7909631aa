//! Settings-file persistence.
//!
//! One JSON object: per-camera entries keyed by the camera's user-defined
//! name, merged with top-level session defaults. Loading is
//! partial-tolerant — cameras without an entry are skipped with a warning,
//! and absent top-level keys leave current values untouched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::RigError;
use crate::pipeline::Recorder;

/// Per-camera persisted controls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CamSettings {
    pub gain: f64,
    /// Exposure time in microseconds.
    pub exp_time: f64,
    pub color_mode: String,
}

/// The full settings document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(flatten)]
    pub cameras: BTreeMap<String, CamSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(rename = "HW_trigg", default, skip_serializing_if = "Option::is_none")]
    pub hw_trigg: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crf: Option<u32>,
}

/// Snapshot the connected cameras and the session defaults.
pub fn collect_settings(recorder: &Recorder) -> Result<SettingsFile, RigError> {
    let mut file = SettingsFile::default();
    for handle in recorder.cams().handles() {
        file.cameras.insert(
            handle.name().to_string(),
            CamSettings {
                gain: handle.gain()?,
                exp_time: handle.exposure_us()?,
                color_mode: handle.color_mode(),
            },
        );
    }
    let defaults = recorder.defaults();
    file.save_path = Some(defaults.save_path.clone());
    file.fps = Some(defaults.fps);
    file.hw_trigg = Some(defaults.hw_trigger);
    file.codec = Some(defaults.codec.clone());
    file.crf = Some(defaults.crf);
    Ok(file)
}

pub fn save_settings(recorder: &Recorder, path: &Path) -> Result<(), RigError> {
    if !recorder.cams().is_connected() {
        return Err(RigError::device("not connected to cameras, cannot save settings"));
    }
    let file = collect_settings(recorder)?;
    let text = serde_json::to_string_pretty(&file)
        .map_err(|e| RigError::pipeline(format!("settings serialize failed: {e}")))?;
    std::fs::write(path, text)?;
    log::info!("saved settings to {path:?}");
    Ok(())
}

pub fn load_settings(path: &Path) -> Result<SettingsFile, RigError> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| RigError::pipeline(format!("settings parse failed: {e}")))
}

/// Apply a loaded settings document. Cameras missing from the file keep
/// their current controls; a per-control failure is logged and does not
/// abort the rest.
pub fn apply_settings(recorder: &mut Recorder, settings: &SettingsFile) {
    for handle in recorder.cams().handles() {
        let Some(cam) = settings.cameras.get(handle.name()) else {
            log::info!(
                "no settings found for cam {} (SN {})",
                handle.name(),
                handle.identity().serial
            );
            continue;
        };
        if let Err(e) = handle.set_gain(cam.gain) {
            log::warn!("{}: gain not applied: {e}", handle.name());
        }
        if let Err(e) = handle.set_exposure_us(cam.exp_time) {
            log::warn!("{}: exposure not applied: {e}", handle.name());
        }
        if let Err(e) = handle.set_color_mode(&cam.color_mode) {
            log::warn!("{}: color mode not applied: {e}", handle.name());
        }
    }

    let defaults = recorder.defaults_mut();
    let mut complete = true;
    match &settings.save_path {
        Some(v) => defaults.save_path = v.clone(),
        None => complete = false,
    }
    match settings.fps {
        Some(v) => defaults.fps = v,
        None => complete = false,
    }
    match settings.hw_trigg {
        Some(v) => defaults.hw_trigger = v,
        None => complete = false,
    }
    match &settings.codec {
        Some(v) => defaults.codec = v.clone(),
        None => complete = false,
    }
    match settings.crf {
        Some(v) => defaults.crf = v,
        None => complete = false,
    }
    if !complete {
        log::info!("no full general settings found in file");
    }
}

/// Try the conventional default settings files, as done right after camera
/// connect. Absence is a warning, never an error.
pub fn auto_load_defaults(recorder: &mut Recorder) {
    for name in ["default_settings.settings.json", "default.settings.json"] {
        match load_settings(Path::new(name)) {
            Ok(settings) => {
                log::info!("applying default settings from {name}");
                apply_settings(recorder, &settings);
                return;
            }
            Err(RigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                log::warn!("default settings file {name} not usable: {e}");
                return;
            }
        }
    }
    log::warn!("no default settings file found");
}
