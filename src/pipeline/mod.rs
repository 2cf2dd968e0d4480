pub mod scheduler;
pub mod transform;

pub use scheduler::{FrameScheduler, SchedulerState, SchedulerStats};
