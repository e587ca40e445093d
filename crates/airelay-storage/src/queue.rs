use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self as tokio_time, MissedTickBehavior};
use tracing::warn;

use crate::storage::LogStorage;

const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_FLUSH_ATTEMPTS: u32 = 5;

/// One `request_log` row, success or failure, per upstream attempt.
#[derive(Debug, Clone)]
pub struct RequestLogInsert {
    pub platform: String,
    pub model: String,
    pub provider: String,
    pub http_code: i32,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_create_tokens: i64,
    pub cache_read_tokens: i64,
    pub reasoning_tokens: i64,
    pub is_stream: bool,
    pub duration_sec: f64,
}

#[derive(Debug, Clone)]
pub struct RequestLogQueueConfig {
    pub capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub retry_delay: Duration,
}

impl Default for RequestLogQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 65_536,
            batch_size: 200,
            flush_interval: Duration::from_millis(200),
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// Background batch writer for request-log rows.
///
/// Rows are buffered until the batch size or the flush interval is hit,
/// whichever comes first. A failed flush is retried a bounded number of
/// times, then the batch is dropped with a warning; log persistence must
/// never stall the relay.
pub struct RequestLogQueue {
    tx: mpsc::Sender<RequestLogInsert>,
    _writer: JoinHandle<()>,
}

impl RequestLogQueue {
    pub fn spawn(storage: LogStorage, config: RequestLogQueueConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity);
        let writer = tokio::spawn(run_writer(storage, rx, config));
        Self {
            tx,
            _writer: writer,
        }
    }

    pub fn sender(&self) -> mpsc::Sender<RequestLogInsert> {
        self.tx.clone()
    }
}

/// Submits one row, bounded by a 5 second timeout. Failures are logged and
/// swallowed; they never affect the request path.
pub async fn enqueue_request_log(tx: &mpsc::Sender<RequestLogInsert>, row: RequestLogInsert) {
    match tokio_time::timeout(ENQUEUE_TIMEOUT, tx.send(row)).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => warn!(event = "request_log_enqueue_failed", reason = "queue_closed"),
        Err(_) => warn!(event = "request_log_enqueue_failed", reason = "timeout"),
    }
}

async fn run_writer(
    storage: LogStorage,
    mut rx: mpsc::Receiver<RequestLogInsert>,
    config: RequestLogQueueConfig,
) {
    let mut buffer: Vec<RequestLogInsert> = Vec::with_capacity(config.batch_size);
    let mut ticker = tokio_time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            row = rx.recv() => {
                match row {
                    Some(row) => {
                        buffer.push(row);
                        if buffer.len() >= config.batch_size {
                            flush(&storage, &mut buffer, config.retry_delay).await;
                        }
                    }
                    None => {
                        flush(&storage, &mut buffer, config.retry_delay).await;
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(&storage, &mut buffer, config.retry_delay).await;
                }
            }
        }
    }
}

async fn flush(storage: &LogStorage, buffer: &mut Vec<RequestLogInsert>, retry_delay: Duration) {
    if buffer.is_empty() {
        return;
    }
    let batch = std::mem::take(buffer);

    for attempt in 1..=MAX_FLUSH_ATTEMPTS {
        match storage.insert_request_logs(&batch).await {
            Ok(()) => return,
            Err(err) => {
                warn!(
                    event = "request_log_flush_failed",
                    attempt,
                    rows = batch.len(),
                    error = %err,
                );
                if attempt < MAX_FLUSH_ATTEMPTS {
                    tokio_time::sleep(retry_delay).await;
                }
            }
        }
    }
    warn!(
        event = "request_log_batch_dropped",
        rows = batch.len(),
    );
}
