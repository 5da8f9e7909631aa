//! Per-camera video writer.
//!
//! One writer thread drains one record queue strictly in arrival order, so
//! only intra-camera FIFO ordering ever matters. The writer's lifecycle is
//! observable from outside the thread via a shared state handle; `copy` and
//! `purge` act only on writers that reached `Stopped`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::encoder::EncoderSink;
use crate::errors::RigError;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::queue::BoundedQueue;
use crate::types::{Frame, WriterState};

/// Shared view of a writer's lifecycle, usable after the writer thread and
/// the writer itself are gone.
pub type WriterStateHandle = Arc<Mutex<WriterState>>;

pub struct VideoWriter {
    cam_name: String,
    video_path: PathBuf,
    state: WriterStateHandle,
    sink: Box<dyn EncoderSink>,
    timestamps: Option<BufWriter<File>>,
    frames_written: u64,
}

impl VideoWriter {
    /// Create a writer in `Idle` over an already-opened encoder sink.
    /// `write_timestamps` adds a sidecar file beside the video.
    pub fn open(
        cam_name: &str,
        video_path: &Path,
        sink: Box<dyn EncoderSink>,
        write_timestamps: bool,
    ) -> Result<Self, RigError> {
        let timestamps = if write_timestamps {
            let path = sidecar_path(video_path);
            let file = File::create(&path)?;
            let mut writer = BufWriter::new(file);
            writeln!(writer, "frame_index,timestamp_us")?;
            Some(writer)
        } else {
            None
        };

        Ok(Self {
            cam_name: cam_name.to_string(),
            video_path: video_path.to_path_buf(),
            state: Arc::new(Mutex::new(WriterState::Idle)),
            sink,
            timestamps,
            frames_written: 0,
        })
    }

    pub fn state_handle(&self) -> WriterStateHandle {
        Arc::clone(&self.state)
    }

    pub fn state(&self) -> WriterState {
        *self.state.lock().expect("lock poisoned")
    }

    pub fn video_path(&self) -> &Path {
        &self.video_path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Idle -> Recording. Called by the drain thread when it starts
    /// consuming.
    pub fn begin(&mut self) {
        let mut state = self.state.lock().expect("lock poisoned");
        if *state == WriterState::Idle {
            *state = WriterState::Recording;
        }
    }

    /// Append one frame. Fails with `WriterClosed` once the writer has left
    /// `Recording`; an encoder failure moves the writer to `Failed`.
    pub fn write(&mut self, frame: &Frame) -> Result<(), RigError> {
        if self.state() != WriterState::Recording {
            return Err(RigError::WriterClosed);
        }

        if let Err(e) = self.sink.write_frame(frame) {
            *self.state.lock().expect("lock poisoned") = WriterState::Failed;
            log::error!("writer {} failed: {e}", self.cam_name);
            return Err(e);
        }

        if let Some(ts) = self.timestamps.as_mut() {
            writeln!(ts, "{},{}", self.frames_written, frame.timestamp_us)?;
        }
        self.frames_written += 1;
        Ok(())
    }

    /// Flush and finalize the file, transitioning to `Stopped`. Idempotent:
    /// a second call is a no-op. Closing a `Failed` writer stays `Failed`.
    pub fn close(&mut self) -> Result<(), RigError> {
        match self.state() {
            WriterState::Stopped => return Ok(()),
            WriterState::Failed => return Ok(()),
            WriterState::Idle | WriterState::Recording => {}
        }

        if let Some(mut ts) = self.timestamps.take() {
            ts.flush()?;
        }
        if let Err(e) = self.sink.finish() {
            *self.state.lock().expect("lock poisoned") = WriterState::Failed;
            return Err(e);
        }

        *self.state.lock().expect("lock poisoned") = WriterState::Stopped;
        log::info!(
            "writer {} stopped after {} frame(s): {:?}",
            self.cam_name,
            self.frames_written,
            self.video_path
        );
        Ok(())
    }
}

/// Drain loop run on the writer's own thread. The record queue being closed
/// is the writer's stop signal: the orchestrator stops workers first, closes
/// the queue, and this loop flushes every frame still buffered before
/// finalizing the file.
pub(crate) fn drain_loop(
    mut writer: VideoWriter,
    queue: Arc<BoundedQueue<Frame>>,
    ctx: Arc<PipelineContext>,
) {
    writer.begin();

    loop {
        match queue.pop_timeout(Duration::from_millis(100)) {
            Some(frame) => {
                if writer.write(&frame).is_err() {
                    ctx.raise_error();
                    return;
                }
            }
            // Timed out; `None` with the queue closed means fully drained.
            None => {
                if queue.is_closed() {
                    break;
                }
            }
        }
    }

    if let Err(e) = writer.close() {
        log::error!("writer close failed: {e}");
        ctx.raise_error();
    }
}

fn sidecar_path(video_path: &Path) -> PathBuf {
    let stem = video_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string());
    video_path.with_file_name(format!("{stem}_timestamps.csv"))
}
