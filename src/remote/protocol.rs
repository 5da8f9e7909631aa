//! Remote control wire protocol: one JSON object per line.
//!
//! Message types are closed enums matched exhaustively at the boundary;
//! unknown tags fail to parse and are rejected explicitly rather than
//! falling through.

use serde::{Deserialize, Serialize};

use crate::errors::RigError;

/// Commands accepted from the remote peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteCommand {
    StartVideoRec {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        setting_file: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame_rate: Option<f64>,
    },
    StartVideoView {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        setting_file: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame_rate: Option<f64>,
    },
    StartVideoCalibrec {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        setting_file: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame_rate: Option<f64>,
    },
    StopVideo,
    PollStatus,
    Disconnected,
    CopyFiles {
        session_path: String,
    },
    PurgeFiles,
}

/// Status and response messages sent to the remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteStatus {
    RespondRecording,
    RespondViewing,
    RespondCalib,
    RespondStop,
    RespondRecordingFail,
    StatusRecording,
    StatusViewing,
    StatusReady,
    StatusError,
    RespondCopy,
    RespondCopyFail,
}

/// Parse one inbound line. Unknown or malformed payloads are errors for the
/// caller to log and ignore; they never take the session down.
pub fn decode_command(line: &str) -> Result<RemoteCommand, RigError> {
    serde_json::from_str(line.trim())
        .map_err(|e| RigError::Transport(format!("bad remote message: {e}")))
}

/// Encode one outbound message, newline-terminated.
pub fn encode_status(status: RemoteStatus) -> String {
    // A closed enum of unit variants cannot fail to serialize.
    let mut line = serde_json::to_string(&status).unwrap_or_else(|_| String::from("{}"));
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_vocabulary_wire_names() {
        let line = r#"{"type":"start_video_rec","session_id":"calib01","frame_rate":60}"#;
        let cmd = decode_command(line).unwrap();
        assert_eq!(
            cmd,
            RemoteCommand::StartVideoRec {
                session_id: "calib01".to_string(),
                setting_file: None,
                frame_rate: Some(60.0),
            }
        );

        let cmd = decode_command(r#"{"type":"stop_video"}"#).unwrap();
        assert_eq!(cmd, RemoteCommand::StopVideo);

        let cmd = decode_command(r#"{"type":"poll_status"}"#).unwrap();
        assert_eq!(cmd, RemoteCommand::PollStatus);

        let cmd = decode_command(r#"{"type":"copy_files","session_path":"/data/s1"}"#).unwrap();
        assert_eq!(
            cmd,
            RemoteCommand::CopyFiles {
                session_path: "/data/s1".to_string()
            }
        );
    }

    #[test]
    fn test_optional_fields_default() {
        let cmd = decode_command(r#"{"type":"start_video_view","session_id":"s"}"#).unwrap();
        assert_eq!(
            cmd,
            RemoteCommand::StartVideoView {
                session_id: "s".to_string(),
                setting_file: None,
                frame_rate: None,
            }
        );
    }

    #[test]
    fn test_unknown_tag_rejected() {
        // Older protocol vocabulary is not spoken here.
        assert!(decode_command(r#"{"type":"start_rec","session_id":"s"}"#).is_err());
        assert!(decode_command(r#"{"type":"status_poll"}"#).is_err());
        assert!(decode_command("not json at all").is_err());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            encode_status(RemoteStatus::RespondRecording),
            "{\"type\":\"respond_recording\"}\n"
        );
        assert_eq!(
            encode_status(RemoteStatus::StatusReady),
            "{\"type\":\"status_ready\"}\n"
        );
        assert_eq!(
            encode_status(RemoteStatus::RespondCopyFail),
            "{\"type\":\"respond_copy_fail\"}\n"
        );
    }

    #[test]
    fn test_round_trip_all_statuses() {
        let all = [
            RemoteStatus::RespondRecording,
            RemoteStatus::RespondViewing,
            RemoteStatus::RespondCalib,
            RemoteStatus::RespondStop,
            RemoteStatus::RespondRecordingFail,
            RemoteStatus::StatusRecording,
            RemoteStatus::StatusViewing,
            RemoteStatus::StatusReady,
            RemoteStatus::StatusError,
            RemoteStatus::RespondCopy,
            RemoteStatus::RespondCopyFail,
        ];
        for status in all {
            let line = encode_status(status);
            let back: RemoteStatus = serde_json::from_str(line.trim()).unwrap();
            assert_eq!(back, status);
        }
    }
}
