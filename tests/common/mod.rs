//! Shared fixtures for the integration suites: an in-memory encoder sink
//! with an event log, a scripted serial link, and recorder builders wired to
//! the synthetic camera backend.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use camrig::camera::sim::SimSdk;
use camrig::camera::CameraHandleSet;
use camrig::config::RigConfig;
use camrig::encoder::{EncoderFactory, EncoderSink};
use camrig::errors::RigError;
use camrig::pipeline::Recorder;
use camrig::trigger::SerialLink;
use camrig::types::Frame;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEventKind {
    Frame,
    Finish,
}

#[derive(Debug, Clone)]
pub struct SinkEvent {
    pub path: PathBuf,
    pub kind: SinkEventKind,
    pub at: Instant,
}

pub type SinkLog = Arc<Mutex<Vec<SinkEvent>>>;

struct MemorySink {
    path: PathBuf,
    frames: u64,
    fail_after: Option<u64>,
    log: SinkLog,
}

impl EncoderSink for MemorySink {
    fn write_frame(&mut self, _frame: &Frame) -> Result<(), RigError> {
        if self.fail_after.is_some_and(|n| self.frames >= n) {
            return Err(RigError::pipeline("synthetic encoder failure"));
        }
        self.frames += 1;
        self.log.lock().unwrap().push(SinkEvent {
            path: self.path.clone(),
            kind: SinkEventKind::Frame,
            at: Instant::now(),
        });
        Ok(())
    }

    fn finish(&mut self) -> Result<(), RigError> {
        std::fs::write(&self.path, format!("frames:{}", self.frames))?;
        self.log.lock().unwrap().push(SinkEvent {
            path: self.path.clone(),
            kind: SinkEventKind::Finish,
            at: Instant::now(),
        });
        Ok(())
    }
}

/// Encoder factory producing in-memory sinks. The returned log records every
/// write/finish with its timestamp; `fail_after` makes each sink fail after
/// that many frames.
pub fn memory_factory(fail_after: Option<u64>) -> (EncoderFactory, SinkLog) {
    let log: SinkLog = Arc::new(Mutex::new(Vec::new()));
    let factory_log = Arc::clone(&log);
    let factory: EncoderFactory = Box::new(move |params| {
        // Touch the output path like the real encoder does.
        std::fs::File::create(&params.path)
            .map_err(|e| RigError::EncoderInit(format!("cannot write {:?}: {e}", params.path)))?;
        Ok(Box::new(MemorySink {
            path: params.path.clone(),
            frames: 0,
            fail_after,
            log: Arc::clone(&factory_log),
        }))
    });
    (factory, log)
}

/// Scripted serial link for the trigger controller.
pub struct MockSerialLink {
    pub written: Arc<Mutex<Vec<(String, Instant)>>>,
    pub inbound: Arc<Mutex<VecDeque<String>>>,
    pub write_delay: Duration,
}

impl MockSerialLink {
    pub fn new(write_delay: Duration) -> (Self, Arc<Mutex<Vec<(String, Instant)>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                written: Arc::clone(&written),
                inbound: Arc::new(Mutex::new(VecDeque::new())),
                write_delay,
            },
            written,
        )
    }
}

impl SerialLink for MockSerialLink {
    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        std::thread::sleep(self.write_delay);
        self.written
            .lock()
            .unwrap()
            .push((line.to_string(), Instant::now()));
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> std::io::Result<Option<String>> {
        if let Some(line) = self.inbound.lock().unwrap().pop_front() {
            return Ok(Some(line));
        }
        std::thread::sleep(timeout.min(Duration::from_millis(5)));
        Ok(None)
    }
}

/// Config tuned for fast tests: short polls, small queues, recordings under
/// the given directory.
pub fn test_config(save_dir: &std::path::Path) -> RigConfig {
    let mut config = RigConfig::default();
    config.recording.save_path = save_dir.to_path_buf();
    config.recording.fps = 100.0;
    config.trigger.settle_delay_ms = 50;
    config.trigger.stop_poll_ms = 20;
    config.remote.idle_poll_ms = 20;
    config.remote.active_poll_ms = 50;
    config
}

pub fn connected_cams(sdk: &SimSdk) -> CameraHandleSet {
    let mut cams = CameraHandleSet::new(sdk.clone());
    cams.enumerate();
    cams.connect().expect("sim connect failed");
    cams
}

/// A recorder over `cam_count` synthetic cameras with a memory encoder.
pub fn test_recorder(
    cam_count: usize,
    save_dir: &std::path::Path,
) -> (Recorder, SinkLog, SimSdk) {
    let sdk = SimSdk::with_cameras(cam_count);
    let cams = connected_cams(&sdk);
    let (factory, log) = memory_factory(None);
    let recorder = Recorder::new(cams, test_config(save_dir)).with_encoder_factory(factory);
    (recorder, log, sdk)
}

/// Poll `what` until it holds or the timeout expires.
pub fn wait_until(mut what: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if what() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}
