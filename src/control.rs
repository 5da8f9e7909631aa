//! The control-thread loop.
//!
//! One thread owns every orchestrator state transition, the remote server's
//! poll cycle and the timer ticks. The poll interval stretches from 500 ms
//! to several seconds while a session is active so frame handling keeps the
//! cycles, but the loop always wakes early for a pending timer deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::pipeline::Recorder;
use crate::remote::{dispatch, RemoteCommand, RemoteControlServer, RemoteState, RemoteStatus};

/// Drive the rig until `shutdown` is set. Stops any running session on the
/// way out.
pub fn run(recorder: &mut Recorder, server: &mut RemoteControlServer, shutdown: &AtomicBool) {
    let idle_poll = Duration::from_millis(recorder.config().remote.idle_poll_ms);
    let active_poll = Duration::from_millis(recorder.config().remote.active_poll_ms);

    while !shutdown.load(Ordering::SeqCst) {
        // Timer + error-policy tick. A pipeline failure has already forced
        // the session to stop; the peer learns through the fail notice.
        if let Err(e) = recorder.tick() {
            log::error!("{e}");
            if server.state() == RemoteState::Connected {
                let _ = server.send(RemoteStatus::RespondRecordingFail);
            }
        }

        // Headless serving has no preview consumer of its own; keep the
        // preview queues moving so their depths track recent production.
        if recorder.is_viewing() || recorder.is_recording() {
            for slot in 0..recorder.cams().len() {
                while recorder.poll_preview(slot).is_some() {}
            }
        }

        server.poll_accept();
        if let Some(cmd) = server.poll_message() {
            if cmd == RemoteCommand::Disconnected {
                log::info!("remote client announced disconnect");
                server.drop_client();
            } else if let Some(response) = dispatch(cmd, recorder) {
                let _ = server.send(response);
            }
        }

        let interval = if recorder.is_recording() || recorder.is_viewing() {
            active_poll
        } else {
            idle_poll
        };
        sleep_until_next_event(recorder, interval, shutdown);
    }

    let _ = recorder.stop();
    server.close();
}

fn sleep_until_next_event(recorder: &Recorder, interval: Duration, shutdown: &AtomicBool) {
    let mut wake_at = Instant::now() + interval;
    if let Some(deadline) = recorder.next_deadline() {
        wake_at = wake_at.min(deadline);
    }
    while Instant::now() < wake_at {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let remaining = wake_at.saturating_duration_since(Instant::now());
        std::thread::sleep(remaining.min(Duration::from_millis(100)));
    }
}
