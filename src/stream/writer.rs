use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::warn;

/// Work item of a reader's queue: the protocol-specific emit, boxed so the
/// queue stays agnostic of what writing means for RTMP, HLS, WebRTC or SRT.
pub type WriteTask = BoxFuture<'static, anyhow::Result<()>>;

pub(crate) struct LogInterval {
    min: Duration,
    last: Mutex<Option<Instant>>,
}

impl LogInterval {
    pub fn new(min: Duration) -> Self {
        LogInterval {
            min,
            last: Mutex::new(None),
        }
    }

    pub fn allow(&self) -> bool {
        let mut last = self.last.lock().unwrap();
        let now = Instant::now();
        match *last {
            Some(prev) if now.duration_since(prev) < self.min => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

// One limiter for the whole process: a hundred slow readers must not turn
// the log into a firehose.
static QUEUE_FULL_WARN: Lazy<LogInterval> =
    Lazy::new(|| LogInterval::new(Duration::from_secs(1)));

/// Bounded per-reader task queue decoupling the stream fan-out from the
/// reader's possibly-blocking network writes. One producer, one consumer;
/// a full queue drops the newest task rather than back-pressuring the
/// publisher.
pub struct Writer {
    sender: WriterSender,
    error: watch::Receiver<Option<String>>,
    handle: JoinHandle<()>,
}

#[derive(Clone)]
pub struct WriterSender {
    tx: mpsc::Sender<WriteTask>,
    label: Arc<str>,
}

impl Writer {
    pub fn new(queue_size: usize, label: impl AsRef<str>) -> Self {
        let label: Arc<str> = Arc::from(label.as_ref());
        let (tx, mut rx) = mpsc::channel::<WriteTask>(queue_size);
        let (err_tx, err_rx) = watch::channel(None);

        let task_label = label.clone();
        let handle = tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                if let Err(err) = task.await {
                    warn!("[{}] write error: {}", task_label, err);
                    let _ = err_tx.send(Some(err.to_string()));
                    return;
                }
            }
        });

        Writer {
            sender: WriterSender { tx, label },
            error: err_rx,
            handle,
        }
    }

    pub fn sender(&self) -> WriterSender {
        self.sender.clone()
    }

    /// Becomes `Some` when a task failed; the owning session watches this
    /// and tears down.
    pub fn subscribe_error(&self) -> watch::Receiver<Option<String>> {
        self.error.clone()
    }

    /// Stops the consumer; queued tasks are discarded.
    pub fn close(self) {
        self.handle.abort();
    }
}

impl WriterSender {
    pub fn push(&self, task: WriteTask) {
        match self.tx.try_send(task) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                if QUEUE_FULL_WARN.allow() {
                    warn!("[{}] write queue is full, discarding packet", self.label);
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
