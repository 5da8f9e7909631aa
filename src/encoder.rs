//! External encoder seam.
//!
//! Compression is performed by an external `ffmpeg` process fed raw frames
//! on stdin; codec internals are out of scope here. `EncoderSink` is the
//! boundary so writers can be exercised against an in-memory sink in tests.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use crate::errors::RigError;
use crate::types::{Frame, PixelFormat};

/// Everything needed to start one encoder instance.
#[derive(Debug, Clone)]
pub struct EncoderParams {
    pub path: PathBuf,
    pub fps: f64,
    pub codec: String,
    /// Constant-rate-factor style quality parameter.
    pub crf: u32,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

/// Consumes frames in arrival order and finalizes an output file.
pub trait EncoderSink: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), RigError>;

    /// Flush and finalize. Called exactly once by the writer's `close`.
    fn finish(&mut self) -> Result<(), RigError>;
}

/// Factory injected into the orchestrator; the default spawns ffmpeg, tests
/// substitute memory sinks.
pub type EncoderFactory =
    Box<dyn Fn(&EncoderParams) -> Result<Box<dyn EncoderSink>, RigError> + Send>;

/// The default factory, validating codec names against the configured list
/// so `EncoderInit` failures are deterministic rather than a late child
/// process exit.
pub fn ffmpeg_factory(allowed_codecs: Vec<String>) -> EncoderFactory {
    Box::new(move |params| {
        let sink = FfmpegEncoder::open(params, &allowed_codecs)?;
        Ok(Box::new(sink) as Box<dyn EncoderSink>)
    })
}

/// Raw-video pipe into an ffmpeg child process.
#[derive(Debug)]
pub struct FfmpegEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
    path: PathBuf,
    frame_bytes: usize,
}

impl FfmpegEncoder {
    pub fn open(params: &EncoderParams, allowed_codecs: &[String]) -> Result<Self, RigError> {
        if !allowed_codecs.iter().any(|c| c == &params.codec) {
            return Err(RigError::EncoderInit(format!(
                "unknown codec {}",
                params.codec
            )));
        }
        probe_writable(&params.path)?;

        let size = format!("{}x{}", params.width, params.height);
        let mut child = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "rawvideo"])
            .args(["-pix_fmt", params.pixel_format.rawvideo_name()])
            .args(["-s", &size])
            .args(["-r", &format!("{}", params.fps)])
            .args(["-i", "-"])
            .args(["-c:v", &params.codec])
            .args(["-crf", &params.crf.to_string()])
            .args(["-pix_fmt", "yuv420p"])
            .arg(&params.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| RigError::EncoderInit(format!("failed to spawn ffmpeg: {e}")))?;

        let stdin = child.stdin.take();
        log::debug!(
            "encoder started for {:?} ({} @ {} fps, crf {})",
            params.path,
            params.codec,
            params.fps,
            params.crf
        );

        Ok(Self {
            child,
            stdin,
            path: params.path.clone(),
            frame_bytes: params.width as usize
                * params.height as usize
                * params.pixel_format.bytes_per_pixel(),
        })
    }
}

impl EncoderSink for FfmpegEncoder {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), RigError> {
        if frame.data.len() != self.frame_bytes {
            return Err(RigError::pipeline(format!(
                "frame size {} does not match encoder input {}",
                frame.data.len(),
                self.frame_bytes
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| RigError::pipeline("encoder stdin already closed"))?;
        stdin
            .write_all(&frame.data)
            .map_err(|e| RigError::pipeline(format!("encoder write failed: {e}")))
    }

    fn finish(&mut self) -> Result<(), RigError> {
        // Closing stdin signals end-of-stream; the child finalizes the file.
        drop(self.stdin.take());
        let status = self
            .child
            .wait()
            .map_err(|e| RigError::pipeline(format!("encoder wait failed: {e}")))?;
        if !status.success() {
            return Err(RigError::pipeline(format!(
                "encoder for {:?} exited with {status}",
                self.path
            )));
        }
        log::debug!("encoder finalized {:?}", self.path);
        Ok(())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if self.stdin.take().is_some() {
            // Not finished cleanly; reap the child rather than leak it.
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn probe_writable(path: &Path) -> Result<(), RigError> {
    std::fs::File::create(path)
        .map(|_| ())
        .map_err(|e| RigError::EncoderInit(format!("cannot write {path:?}: {e}")))
}
