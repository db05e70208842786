//! Domain model (IDs, task record, state, options, errors).

pub mod errors;
pub mod ids;
pub mod options;
pub mod record;
pub mod state;
pub mod task;

pub use self::errors::{
    CronError, DeadReason, EngineError, EnqueueError, HandlerError, StoreError, TaskFailure,
};
pub use self::ids::{CronEntryId, TaskId};
pub use self::options::{EnqueueOptions, TaskInfo};
pub use self::record::TaskRecord;
pub use self::state::TaskState;
pub use self::task::{DEFAULT_QUEUE, TaskType, is_valid_queue_name};
