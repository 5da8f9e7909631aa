//! Acquisition/recording pipeline: distribution queues, frame source
//! workers, per-camera video writers, and the orchestrator tying them into
//! one start/stop/error lifecycle.

pub mod context;
pub mod queue;
pub mod recorder;
pub mod worker;
pub mod writer;

pub use context::{PipelineContext, PipelineEvent};
pub use queue::BoundedQueue;
pub use recorder::{Recorder, WriterRecord};
pub use writer::VideoWriter;
