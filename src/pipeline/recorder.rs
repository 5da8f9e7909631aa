//! Pipeline orchestrator.
//!
//! Owns the worker set, the distribution queues and the writers, and runs
//! the {Idle, Previewing, Recording, Calibrating} state machine. All
//! transitions execute on the caller's (control) thread; workers and writers
//! run on their own threads and communicate only through queues and the
//! shared context.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::camera::CameraHandleSet;
use crate::config::RigConfig;
use crate::encoder::{ffmpeg_factory, EncoderFactory, EncoderParams};
use crate::errors::RigError;
use crate::pipeline::context::{PipelineContext, PipelineEvent};
use crate::pipeline::queue::BoundedQueue;
use crate::pipeline::worker::{capture_loop, WorkerSpec};
use crate::pipeline::writer::{drain_loop, VideoWriter, WriterStateHandle};
use crate::sched::Scheduler;
use crate::trigger::TriggerController;
use crate::types::{
    ControlScope, Frame, PipelineStatus, PreviewMode, RigState, Session, SessionDefaults,
    WriterState,
};

/// Surviving view of one writer after its thread is gone; `copy_files` and
/// `purge_files` operate on these.
pub struct WriterRecord {
    pub cam_name: String,
    pub path: PathBuf,
    state: WriterStateHandle,
}

impl WriterRecord {
    pub fn state(&self) -> WriterState {
        *self.state.lock().expect("lock poisoned")
    }
}

enum TimerToken {
    ArmTrigger { fps: f64 },
    CalibStart,
    CalibStop,
}

pub struct Recorder {
    cams: CameraHandleSet,
    config: RigConfig,
    defaults: SessionDefaults,
    ctx: Arc<PipelineContext>,
    state: RigState,
    session: Option<Session>,
    last_session_id: String,
    session_started_at: Option<Instant>,
    preview_queues: Vec<Arc<BoundedQueue<Frame>>>,
    record_queues: Vec<Arc<BoundedQueue<Frame>>>,
    workers: Vec<JoinHandle<()>>,
    writer_threads: Vec<JoinHandle<()>>,
    writers: Vec<WriterRecord>,
    files_copied: bool,
    sched: Scheduler<TimerToken>,
    pending_calib: Option<Session>,
    trigger: Option<TriggerController>,
    encoder_factory: EncoderFactory,
}

impl Recorder {
    pub fn new(cams: CameraHandleSet, config: RigConfig) -> Self {
        let defaults = SessionDefaults {
            save_path: config.recording.save_path.clone(),
            fps: config.recording.fps,
            hw_trigger: config.recording.hw_trigger,
            codec: config.recording.codec.clone(),
            crf: config.recording.crf,
        };
        let encoder_factory = ffmpeg_factory(config.recording.codecs.clone());
        Self {
            cams,
            config,
            defaults,
            ctx: Arc::new(PipelineContext::new()),
            state: RigState::Idle,
            session: None,
            last_session_id: String::new(),
            session_started_at: None,
            preview_queues: Vec::new(),
            record_queues: Vec::new(),
            workers: Vec::new(),
            writer_threads: Vec::new(),
            writers: Vec::new(),
            files_copied: false,
            sched: Scheduler::new(),
            pending_calib: None,
            trigger: None,
            encoder_factory,
        }
    }

    /// Replace the encoder factory (tests substitute in-memory sinks).
    pub fn with_encoder_factory(mut self, factory: EncoderFactory) -> Self {
        self.encoder_factory = factory;
        self
    }

    pub fn set_trigger(&mut self, trigger: TriggerController) {
        self.trigger = Some(trigger);
    }

    pub fn trigger(&self) -> Option<&TriggerController> {
        self.trigger.as_ref()
    }

    pub fn cams(&self) -> &CameraHandleSet {
        &self.cams
    }

    pub fn cams_mut(&mut self) -> &mut CameraHandleSet {
        &mut self.cams
    }

    pub fn defaults(&self) -> &SessionDefaults {
        &self.defaults
    }

    pub fn defaults_mut(&mut self) -> &mut SessionDefaults {
        &mut self.defaults
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn state(&self) -> RigState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.ctx.is_recording()
    }

    pub fn is_viewing(&self) -> bool {
        self.ctx.is_viewing()
    }

    pub fn error_raised(&self) -> bool {
        self.ctx.error_raised()
    }

    /// Subscribe to state-change and error events.
    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        self.ctx.subscribe()
    }

    /// Elapsed time of the running session, if any.
    pub fn elapsed(&self) -> Option<Duration> {
        self.session_started_at.map(|t| t.elapsed())
    }

    /// Earliest pending timer deadline, so a poll loop can wake for it
    /// instead of overshooting by a full poll interval.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.sched.next_deadline()
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            is_recording: self.ctx.is_recording(),
            is_viewing: self.ctx.is_viewing(),
            error_flag: self.ctx.error_raised(),
            preview_depths: self.preview_queues.iter().map(|q| q.len()).collect(),
            record_depths: self.record_queues.iter().map(|q| q.len()).collect(),
        }
    }

    /// Non-blocking preview drain. `slot` indexes the preview queue set: the
    /// camera index in multi mode, 0 in single mode.
    pub fn poll_preview(&self, slot: usize) -> Option<Frame> {
        self.preview_queues.get(slot).and_then(|q| q.try_pop())
    }

    pub fn writer_records(&self) -> &[WriterRecord] {
        &self.writers
    }

    /// Idle -> Previewing. Spawns one worker per target camera and, when
    /// hardware triggering is requested, arms the trigger after the settle
    /// delay so workers reach steady state first.
    pub fn start_preview(&mut self, mode: PreviewMode, use_hw_trigger: bool) -> Result<(), RigError> {
        if self.state != RigState::Idle {
            return Err(RigError::AlreadyActive);
        }
        self.ensure_connected()?;

        let fps = self.defaults.fps;
        self.ctx.reset_for_session();
        self.preview_queues.clear();
        self.record_queues.clear();

        let targets: Vec<usize> = match mode {
            PreviewMode::Single { cam_index } => {
                self.cams.handle(cam_index)?; // bounds check
                vec![cam_index]
            }
            PreviewMode::Multi => (0..self.cams.len()).collect(),
        };

        for &cam_index in &targets {
            let queue = Arc::new(BoundedQueue::new(self.config.queues.preview_capacity));
            self.preview_queues.push(Arc::clone(&queue));
            self.spawn_worker(cam_index, vec![queue], fps, use_hw_trigger)?;
        }

        self.arm_trigger_if_requested(use_hw_trigger, fps);
        self.session_started_at = Some(Instant::now());
        self.ctx.set_viewing(true);
        self.set_state(RigState::Previewing);
        log::info!(
            "preview started ({} camera(s), hw_trigger={use_hw_trigger})",
            targets.len()
        );
        Ok(())
    }

    /// Idle -> Recording. Spawns workers plus one writer per camera.
    pub fn start_record(&mut self, session: Session) -> Result<(), RigError> {
        if self.state != RigState::Idle {
            return Err(RigError::AlreadyActive);
        }
        self.spawn_record(session)?;
        self.set_state(RigState::Recording);
        Ok(())
    }

    /// Idle -> Calibrating immediately; the actual record window is timed:
    /// start after `wait`, automatic stop after `wait + duration`. Hardware
    /// triggering is forced on for calibration capture.
    pub fn start_calibration(
        &mut self,
        mut session: Session,
        wait: Duration,
        duration: Duration,
    ) -> Result<(), RigError> {
        if self.state != RigState::Idle {
            return Err(RigError::AlreadyActive);
        }
        self.ensure_connected()?;

        session.use_hw_trigger = true;
        log::info!(
            "calibration sequence started; recording in {:.1}s for {:.1}s",
            wait.as_secs_f64(),
            duration.as_secs_f64()
        );
        self.pending_calib = Some(session);
        let now = Instant::now();
        self.sched.schedule(now + wait, TimerToken::CalibStart);
        self.sched.schedule(now + wait + duration, TimerToken::CalibStop);
        self.set_state(RigState::Calibrating);
        Ok(())
    }

    /// Stop whatever is running and return to Idle. No-op when already Idle.
    ///
    /// Teardown order: trigger pulse first (polled until it clears, bounded),
    /// then workers, then writers (full drain + finalize), then state.
    pub fn stop(&mut self) -> Result<(), RigError> {
        if self.state == RigState::Idle {
            return Ok(());
        }
        log::debug!("stopping pipeline from {:?}", self.state);

        self.sched.clear();
        self.pending_calib = None;

        // Cameras must not be left mid-exposure: wait for the pulse to
        // actually stop before tearing workers down.
        let hw_active = self.session.as_ref().map(|s| s.use_hw_trigger).unwrap_or(false)
            || self
                .trigger
                .as_ref()
                .map(|t| t.is_pulsing())
                .unwrap_or(false);
        if hw_active {
            if let Some(trigger) = &self.trigger {
                if trigger.is_pulsing() {
                    trigger.stop_trigger();
                    let mut polls = 0;
                    while trigger.is_pulsing() && polls < self.config.trigger.stop_poll_max {
                        std::thread::sleep(self.config.stop_poll());
                        polls += 1;
                    }
                    if trigger.is_pulsing() {
                        log::warn!("trigger still pulsing after bounded wait; proceeding");
                    }
                }
            }
        }

        // Workers observe the stop signal within one loop iteration.
        self.ctx.request_stop();
        let worker_timeout = self.config.grab_timeout() + Duration::from_secs(1);
        join_all(&mut self.workers, worker_timeout, "worker");

        // Queue close is the writers' stop signal; they drain what is left
        // and finalize their files.
        for queue in &self.record_queues {
            queue.close();
        }
        for queue in &self.preview_queues {
            queue.close();
        }
        join_all(
            &mut self.writer_threads,
            Duration::from_secs(10),
            "writer",
        );

        self.preview_queues.clear();
        self.record_queues.clear();
        self.session = None;
        self.session_started_at = None;
        self.ctx.set_recording(false);
        self.ctx.set_viewing(false);
        self.set_state(RigState::Idle);
        log::info!("pipeline stopped");
        Ok(())
    }

    /// Periodic control-thread entry point: fires due timers and enforces
    /// the error policy (any worker/writer failure forces a full stop, which
    /// this surfaces as `Pipeline`). Call at the poll interval.
    pub fn tick(&mut self) -> Result<(), RigError> {
        for token in self.sched.due(Instant::now()) {
            match token {
                TimerToken::ArmTrigger { fps } => {
                    if let Some(trigger) = &self.trigger {
                        trigger.start_trigger(fps);
                    }
                }
                TimerToken::CalibStart => {
                    if let Some(session) = self.pending_calib.take() {
                        log::info!("calibration wait elapsed; recording");
                        if let Err(e) = self.spawn_record(session) {
                            log::error!("calibration record start failed: {e}");
                            self.ctx.raise_error();
                        }
                    }
                }
                TimerToken::CalibStop => {
                    log::info!("calibration window elapsed; stopping");
                    self.stop()?;
                }
            }
        }

        if self.ctx.error_raised() && self.state != RigState::Idle {
            log::error!("pipeline error flag set; stopping session");
            self.stop()?;
            return Err(RigError::pipeline(
                "worker or writer failure forced the session to stop",
            ));
        }
        Ok(())
    }

    /// Copy each Stopped writer's output into `<session_path>/<video_folder>/`
    /// (or the session root for the legacy session-id tag). Rejected while
    /// recording; latched so a session's files are copied at most once.
    /// Partial failure aborts the remaining copies.
    pub fn copy_session_files(&mut self, session_path: &Path) -> Result<(), RigError> {
        if self.ctx.is_recording() {
            return Err(RigError::pipeline("cannot copy files while recording"));
        }
        if self.files_copied {
            log::info!("files already copied for this session");
            return Ok(());
        }

        let legacy = self
            .last_session_id
            .contains(&self.config.recording.legacy_root_copy_tag);
        let dest_dir = if legacy {
            session_path.to_path_buf()
        } else {
            session_path.join(&self.config.recording.video_folder)
        };

        for record in &self.writers {
            if record.state() != WriterState::Stopped {
                continue;
            }
            std::fs::create_dir_all(&dest_dir)?;
            let file_name = record
                .path
                .file_name()
                .ok_or_else(|| RigError::pipeline("writer path has no file name"))?;
            let dest = dest_dir.join(file_name);
            log::info!("copying {:?} to {:?}", record.path, dest);
            std::fs::copy(&record.path, &dest)?;
        }

        self.files_copied = true;
        log::info!("finished copying files to {dest_dir:?}");
        Ok(())
    }

    /// Delete each Stopped writer's output file. Recording/Failed files are
    /// left in place with a diagnostic log, never force-deleted.
    pub fn purge_files(&self) {
        for record in &self.writers {
            if record.state() == WriterState::Stopped {
                log::info!("deleting file {:?}", record.path);
                if let Err(e) = std::fs::remove_file(&record.path) {
                    log::error!("failed to delete {:?}: {e}", record.path);
                }
            } else {
                log::info!(
                    "not deleting {:?}: writer has not finished ({:?})",
                    record.path,
                    record.state()
                );
            }
        }
    }

    /// Run the auto-exposure routine for one camera or all of them, in
    /// enumeration order. Broadcast is not atomic: a failure on camera k
    /// does not roll back cameras 0..k. Blocks for the convergence loop.
    pub fn run_auto_exposure(&self, scope: ControlScope) -> Result<Vec<(usize, f64)>, RigError> {
        self.for_scope(scope, |i, set| Ok((i, set.handle(i)?.run_auto_exposure()?)))
    }

    /// As `run_auto_exposure`, for gain.
    pub fn run_auto_gain(&self, scope: ControlScope) -> Result<Vec<(usize, f64)>, RigError> {
        self.for_scope(scope, |i, set| Ok((i, set.handle(i)?.run_auto_gain()?)))
    }

    pub fn run_white_balance(&self, scope: ControlScope) -> Result<(), RigError> {
        let indices: Vec<usize> = match scope {
            ControlScope::One(i) => vec![i],
            ControlScope::All => (0..self.cams.len()).collect(),
        };
        for i in indices {
            self.cams.handle(i)?.run_white_balance()?;
        }
        Ok(())
    }

    fn for_scope<F>(&self, scope: ControlScope, op: F) -> Result<Vec<(usize, f64)>, RigError>
    where
        F: Fn(usize, &CameraHandleSet) -> Result<(usize, f64), RigError>,
    {
        let indices: Vec<usize> = match scope {
            ControlScope::One(i) => vec![i],
            ControlScope::All => (0..self.cams.len()).collect(),
        };
        let mut out = Vec::with_capacity(indices.len());
        for i in indices {
            out.push(op(i, &self.cams)?);
        }
        Ok(out)
    }

    fn ensure_connected(&self) -> Result<(), RigError> {
        if !self.cams.is_connected() {
            return Err(RigError::device("no cameras connected"));
        }
        Ok(())
    }

    fn set_state(&mut self, state: RigState) {
        if self.state != state {
            self.state = state;
            self.ctx.emit(PipelineEvent::StateChanged(state));
        }
    }

    /// Shared record spawn used by `start_record` and the calibration timer.
    /// Leaves the rig-level state to the caller.
    fn spawn_record(&mut self, session: Session) -> Result<(), RigError> {
        self.ensure_connected()?;

        self.ctx.reset_for_session();
        self.files_copied = false;
        self.preview_queues.clear();
        self.record_queues.clear();
        self.writers.clear();

        std::fs::create_dir_all(&session.save_dir)?;

        // Open every writer before spawning anything, so a rejected encoder
        // configuration leaves no threads behind.
        let mut writers = Vec::with_capacity(self.cams.len());
        let mut records = Vec::with_capacity(self.cams.len());
        for cam_index in 0..self.cams.len() {
            let handle = self.cams.handle(cam_index)?;
            let cam_name = handle.name().to_string();
            let (width, height, pixel_format) = handle.format();
            let path = session
                .save_dir
                .join(format!("{}_{}.mp4", session.id, cam_name));
            let params = EncoderParams {
                path: path.clone(),
                fps: session.fps,
                codec: session.codec.clone(),
                crf: session.crf,
                width,
                height,
                pixel_format,
            };
            let sink = (self.encoder_factory)(&params)?;
            let writer = VideoWriter::open(
                &cam_name,
                &path,
                sink,
                self.config.recording.write_timestamps,
            )?;
            records.push(WriterRecord {
                cam_name,
                path,
                state: writer.state_handle(),
            });
            writers.push(writer);
        }
        self.writers = records;

        for (cam_index, writer) in writers.into_iter().enumerate() {
            let preview = Arc::new(BoundedQueue::new(self.config.queues.preview_capacity));
            let record = Arc::new(BoundedQueue::new(self.config.queues.record_capacity));
            self.preview_queues.push(Arc::clone(&preview));
            self.record_queues.push(Arc::clone(&record));

            let ctx = Arc::clone(&self.ctx);
            let record_for_writer = Arc::clone(&record);
            let thread = std::thread::Builder::new()
                .name(format!("camrig-writer-{cam_index}"))
                .spawn(move || drain_loop(writer, record_for_writer, ctx))
                .map_err(|e| RigError::pipeline(format!("writer spawn failed: {e}")))?;
            self.writer_threads.push(thread);

            self.spawn_worker(
                cam_index,
                vec![preview, record],
                session.fps,
                session.use_hw_trigger,
            )?;
        }

        self.arm_trigger_if_requested(session.use_hw_trigger, session.fps);
        self.session_started_at = Some(Instant::now());
        self.last_session_id = session.id.clone();
        log::info!(
            "recording session {} started ({} camera(s) at {} fps)",
            session.id,
            self.cams.len(),
            session.fps
        );
        self.session = Some(session);
        self.ctx.set_recording(true);
        Ok(())
    }

    fn spawn_worker(
        &mut self,
        cam_index: usize,
        outputs: Vec<Arc<BoundedQueue<Frame>>>,
        fps: f64,
        use_hw_trigger: bool,
    ) -> Result<(), RigError> {
        let spec = WorkerSpec {
            cam_index,
            handle: self.cams.handle(cam_index)?.clone(),
            outputs,
            fps,
            use_hw_trigger,
            grab_timeout: self.config.grab_timeout(),
        };
        let ctx = Arc::clone(&self.ctx);
        let thread = std::thread::Builder::new()
            .name(format!("camrig-worker-{cam_index}"))
            .spawn(move || capture_loop(spec, ctx))
            .map_err(|e| RigError::pipeline(format!("worker spawn failed: {e}")))?;
        self.workers.push(thread);
        Ok(())
    }

    fn arm_trigger_if_requested(&mut self, use_hw_trigger: bool, fps: f64) {
        if !use_hw_trigger {
            return;
        }
        if self.trigger.is_none() {
            log::warn!("hardware trigger requested but no trigger controller attached");
            return;
        }
        // Settle delay: let workers reach steady state before pulsing.
        self.sched.schedule(
            Instant::now() + self.config.settle_delay(),
            TimerToken::ArmTrigger { fps },
        );
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.state != RigState::Idle {
            let _ = self.stop();
        }
    }
}

/// Time-boxed join: threads that fail to exit in time are detached with a
/// warning rather than hanging the control thread forever.
fn join_all(handles: &mut Vec<JoinHandle<()>>, timeout: Duration, kind: &str) {
    let deadline = Instant::now() + timeout;
    for handle in handles.drain(..) {
        loop {
            if handle.is_finished() {
                let _ = handle.join();
                break;
            }
            if Instant::now() >= deadline {
                log::warn!("{kind} thread did not exit within {timeout:?}; detaching");
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}
