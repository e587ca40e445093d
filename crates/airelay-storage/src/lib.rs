pub mod entities;
pub mod queue;
pub mod storage;

pub use queue::{enqueue_request_log, RequestLogInsert, RequestLogQueue, RequestLogQueueConfig};
pub use storage::{LogStorage, StorageError, StorageResult};
