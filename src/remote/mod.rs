//! Remote control surface: wire protocol, single-client server, and the
//! command dispatcher mapping protocol messages onto orchestrator calls.

pub mod protocol;
pub mod server;

use std::path::Path;

use crate::errors::RigError;
use crate::pipeline::Recorder;
use crate::types::PreviewMode;

pub use protocol::{decode_command, encode_status, RemoteCommand, RemoteStatus};
pub use server::{RemoteControlServer, RemoteState};

/// Map one inbound command to at most one response message.
///
/// `Disconnected` and `PurgeFiles` yield no response (the outbound
/// vocabulary has none for them); every other command yields exactly one.
pub fn dispatch(cmd: RemoteCommand, recorder: &mut Recorder) -> Option<RemoteStatus> {
    match cmd {
        RemoteCommand::StartVideoRec {
            session_id,
            setting_file,
            frame_rate,
        } => {
            if session_already_running(recorder) {
                return Some(RemoteStatus::StatusError);
            }
            apply_setting_file(recorder, setting_file.as_deref());
            let session = recorder.defaults().session(session_id, frame_rate);
            log::info!("remote: start recording");
            match recorder.start_record(session) {
                Ok(()) => Some(RemoteStatus::RespondRecording),
                Err(RigError::AlreadyActive) => Some(RemoteStatus::StatusError),
                Err(e) => {
                    log::error!("remote record start failed: {e}");
                    Some(RemoteStatus::RespondRecordingFail)
                }
            }
        }

        RemoteCommand::StartVideoView {
            setting_file,
            frame_rate,
            ..
        } => {
            if session_already_running(recorder) {
                return Some(RemoteStatus::StatusError);
            }
            apply_setting_file(recorder, setting_file.as_deref());
            if let Some(fps) = frame_rate {
                recorder.defaults_mut().fps = fps;
            }
            let hw_trigger = recorder.defaults().hw_trigger;
            log::info!("remote: start viewing");
            match recorder.start_preview(PreviewMode::Multi, hw_trigger) {
                Ok(()) => Some(RemoteStatus::RespondViewing),
                Err(RigError::AlreadyActive) => Some(RemoteStatus::StatusError),
                Err(e) => {
                    log::error!("remote view start failed: {e}");
                    Some(RemoteStatus::RespondRecordingFail)
                }
            }
        }

        RemoteCommand::StartVideoCalibrec {
            session_id,
            setting_file,
            frame_rate,
        } => {
            if session_already_running(recorder) {
                return Some(RemoteStatus::StatusError);
            }
            apply_setting_file(recorder, setting_file.as_deref());
            let session = recorder.defaults().session(session_id, frame_rate);
            let wait = recorder.config().calib_wait();
            let duration = recorder.config().calib_duration();
            log::info!("remote: start calibration recording");
            match recorder.start_calibration(session, wait, duration) {
                Ok(()) => Some(RemoteStatus::RespondCalib),
                Err(RigError::AlreadyActive) => Some(RemoteStatus::StatusError),
                Err(e) => {
                    log::error!("remote calibration start failed: {e}");
                    Some(RemoteStatus::RespondRecordingFail)
                }
            }
        }

        RemoteCommand::StopVideo => {
            log::info!("remote: stop");
            if let Err(e) = recorder.stop() {
                log::error!("remote stop reported: {e}");
            }
            Some(RemoteStatus::RespondStop)
        }

        RemoteCommand::PollStatus => {
            if recorder.is_recording() {
                Some(RemoteStatus::StatusRecording)
            } else if recorder.is_viewing() {
                Some(RemoteStatus::StatusViewing)
            } else {
                Some(RemoteStatus::StatusReady)
            }
        }

        // Transport-level action; the control loop drops the client.
        RemoteCommand::Disconnected => None,

        RemoteCommand::CopyFiles { session_path } => {
            log::debug!("remote: copy files to {session_path}");
            match recorder.copy_session_files(Path::new(&session_path)) {
                Ok(()) => Some(RemoteStatus::RespondCopy),
                Err(e) => {
                    log::error!("copy files failed: {e}");
                    Some(RemoteStatus::RespondCopyFail)
                }
            }
        }

        RemoteCommand::PurgeFiles => {
            log::debug!("remote: purge files");
            recorder.purge_files();
            None
        }
    }
}

fn session_already_running(recorder: &Recorder) -> bool {
    if recorder.is_recording() || recorder.is_viewing() {
        log::info!("got message to start, but something is already running");
        true
    } else {
        false
    }
}

fn apply_setting_file(recorder: &mut Recorder, file: Option<&str>) {
    let Some(file) = file else { return };
    match crate::settings::load_settings(Path::new(file)) {
        Ok(settings) => {
            crate::settings::apply_settings(recorder, &settings);
            log::debug!("loaded settings from {file}");
        }
        Err(e) => {
            // The run proceeds with current settings.
            log::error!("passed settings file not usable: {e}");
        }
    }
}
