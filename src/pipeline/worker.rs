//! Frame source worker: one per active camera.
//!
//! Grabs frames from its camera handle at the configured rate, applies the
//! orientation transform, and publishes to every subscribed queue without
//! blocking. A hardware read failure raises the shared error flag once and
//! ends the worker; whether the whole session aborts is the orchestrator's
//! decision.

use std::sync::Arc;
use std::time::Duration;

use crate::camera::CameraHandle;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::queue::BoundedQueue;
use crate::types::Frame;

pub(crate) struct WorkerSpec {
    pub cam_index: usize,
    pub handle: CameraHandle,
    pub outputs: Vec<Arc<BoundedQueue<Frame>>>,
    pub fps: f64,
    pub use_hw_trigger: bool,
    pub grab_timeout: Duration,
}

pub(crate) fn capture_loop(spec: WorkerSpec, ctx: Arc<PipelineContext>) {
    let name = spec.handle.name().to_string();

    if let Err(e) = spec.handle.start_stream(spec.fps, spec.use_hw_trigger) {
        log::error!("worker {name}: stream start failed: {e}");
        ctx.raise_error();
        return;
    }

    let mut sequence: u64 = 0;
    loop {
        if ctx.stop_requested() {
            break;
        }

        let raw = match spec.handle.grab_frame(spec.grab_timeout) {
            Ok(raw) => raw,
            Err(e) => {
                log::error!("worker {name}: frame grab failed: {e}");
                ctx.raise_error();
                break;
            }
        };

        sequence += 1;
        let (flip_x, flip_y) = spec.handle.flips();
        let frame = publish_frame(spec.cam_index, sequence, raw, flip_x, flip_y);
        for queue in &spec.outputs {
            queue.push(frame.clone());
        }
    }

    spec.handle.stop_stream();
    log::debug!("worker {name} exited after {sequence} frame(s)");
}

fn publish_frame(
    cam_index: usize,
    sequence: u64,
    raw: crate::camera::driver::RawFrame,
    flip_x: bool,
    flip_y: bool,
) -> Frame {
    let data = if flip_x || flip_y {
        let mut pixels = raw.data.to_vec();
        apply_flips(
            &mut pixels,
            raw.width as usize,
            raw.height as usize,
            raw.pixel_format.bytes_per_pixel(),
            flip_x,
            flip_y,
        );
        bytes::Bytes::from(pixels)
    } else {
        raw.data
    };

    Frame {
        cam_index,
        sequence,
        timestamp_us: raw.timestamp_us,
        width: raw.width,
        height: raw.height,
        pixel_format: raw.pixel_format,
        data,
    }
}

/// In-place mirror of a packed pixel buffer. `flip_x` mirrors columns,
/// `flip_y` mirrors rows.
fn apply_flips(data: &mut [u8], width: usize, height: usize, bpp: usize, x: bool, y: bool) {
    let row_bytes = width * bpp;
    if x {
        for row in data.chunks_mut(row_bytes) {
            for col in 0..width / 2 {
                let a = col * bpp;
                let b = (width - 1 - col) * bpp;
                for k in 0..bpp {
                    row.swap(a + k, b + k);
                }
            }
        }
    }
    if y {
        for row in 0..height / 2 {
            let (top, rest) = data.split_at_mut((height - 1 - row) * row_bytes);
            let top_row = &mut top[row * row_bytes..(row + 1) * row_bytes];
            let bottom_row = &mut rest[..row_bytes];
            top_row.swap_with_slice(bottom_row);
        }
    }
}
