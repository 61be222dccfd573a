pub mod barrier;
pub mod builder;
pub mod controller;
pub mod planner;
pub mod sampler;
pub mod segment;
pub mod state;
pub mod task;
pub mod worker;

pub use barrier::RendezvousBarrier;
pub use builder::DownloadTaskBuilder;
pub use controller::TaskController;
pub use planner::plan_segments;
pub use sampler::ProgressSampler;
pub use segment::{LiveSegment, SegmentInfo};
pub use state::{AtomicState, DownloadState};
pub use task::{FileInfo, FileKey};
pub use worker::{SegmentWorker, WorkerHost};
