pub mod config;
pub mod job;
pub mod lane;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use job::{PollJob, PollJobInfo, PollStats};
pub use lane::DeviceLane;
pub use scheduler::PollScheduler;
