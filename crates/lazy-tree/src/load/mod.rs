//! Load tasks, progress fan-out and the runners that execute loads

mod fanout;
mod options;
mod runner;
mod task;

pub use fanout::{
    ChannelObserver, FanoutEvent, ObserverId, ProgressEvent, ProgressFanout, ProgressObserver,
};
pub use options::{RunnerKind, RunnerOptions, DEFAULT_THREAD_NAME, RUNNER_ENV, THREADS_ENV};
pub use runner::{InlineRunner, LoadJob, RayonRunner, TaskRunner, ThreadRunner};
pub use task::{LoadOutcome, LoadTask, TaskState, TaskStatus};

pub(crate) use task::TaskInner;
