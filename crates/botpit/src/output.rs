use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pitproto::Message;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tracing::{error, warn};

use crate::config::OutputHandlerConfig;
use crate::error::{PitError, PitResult};
use crate::ui::UiNetwork;

/// Hard cap on the pipeline queue; reaching it triggers the discard policy.
pub const QUEUE_DEFAULT_SIZE: usize = 100_000;

/// Wall-clock deadline for a single spectator delivery attempt.
const UI_SEND_TIMEOUT: Duration = Duration::from_millis(1000);

/// Decouples the turn loop from slow spectator delivery and on-disk logging.
///
/// Two sinks, independently enabled: a ticker that feeds the spectator one
/// message per period under a hard per-send deadline (head retried on
/// overrun), and a staging buffer handed off to a single file writer whenever
/// it reaches `bufferSize`. Overflow of the pipeline queue discards the whole
/// queue in favour of new messages.
#[derive(Clone)]
pub struct OutputController {
    inner: Arc<OutInner>,
}

struct OutInner {
    send_to_ui: bool,
    time_interval: Duration,
    send_to_file: bool,
    buffer_size: usize,
    file_path: PathBuf,
    ui: UiNetwork,
    queue: Mutex<std::collections::VecDeque<Message>>,
    staging: Mutex<Vec<Message>>,
    nonempty: Notify,
    file_tx: Mutex<Option<mpsc::Sender<Vec<Message>>>>,
    file_rx: Mutex<Option<mpsc::Receiver<Vec<Message>>>>,
    shutdown: watch::Sender<bool>,
}

impl OutputController {
    pub fn new(cfg: &OutputHandlerConfig, ui: UiNetwork) -> Self {
        let (file_tx, file_rx) = if cfg.send_to_file {
            let (tx, rx) = mpsc::channel(1);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        Self {
            inner: Arc::new(OutInner {
                send_to_ui: cfg.send_to_ui,
                time_interval: Duration::from_millis(cfg.time_interval.max(1)),
                send_to_file: cfg.send_to_file,
                buffer_size: cfg.buffer_size,
                file_path: PathBuf::from(&cfg.file_path),
                ui,
                queue: Mutex::new(std::collections::VecDeque::new()),
                staging: Mutex::new(Vec::new()),
                nonempty: Notify::new(),
                file_tx: Mutex::new(file_tx),
                file_rx: Mutex::new(file_rx),
                shutdown: watch::channel(false).0,
            }),
        }
    }

    /// Start the enabled sink workers.
    pub async fn run(&self) {
        self.inner.shutdown.send_replace(false);
        if self.inner.send_to_ui {
            tokio::spawn(ui_ticker(self.inner.clone()));
        }
        if self.inner.send_to_file {
            if let Some(rx) = self.inner.file_rx.lock().await.take() {
                tokio::spawn(file_writer(self.inner.clone(), rx));
            }
        }
    }

    /// Append one message to every enabled sink.
    ///
    /// Total: it either enqueues or fails with [`PitError::QueueOverflow`];
    /// the only silent loss is the observable overflow-discard policy.
    pub async fn put_message(&self, msg: Message) -> PitResult<()> {
        if self.inner.send_to_file {
            let batch = {
                let mut staging = self.inner.staging.lock().await;
                staging.push(msg.clone());
                if staging.len() >= self.inner.buffer_size {
                    Some(std::mem::take(&mut *staging))
                } else {
                    None
                }
            };
            if let Some(batch) = batch {
                // one hand-off at a time; waits while the writer is busy
                let tx = self.inner.file_tx.lock().await.clone();
                if let Some(tx) = tx {
                    tx.send(batch).await.map_err(|_| PitError::QueueOverflow)?;
                }
            }
        }

        if self.inner.send_to_ui {
            {
                let mut queue = self.inner.queue.lock().await;
                if queue.len() >= QUEUE_DEFAULT_SIZE {
                    warn!(dropped = queue.len(), "output queue overflow, discarding backlog");
                    queue.clear();
                }
                queue.push_back(msg);
            }
            self.inner.nonempty.notify_one();
        }

        Ok(())
    }

    /// Stop the ticker and let the file writer exit once its pending hand-off
    /// drains.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        *self.inner.file_tx.lock().await = None;
    }

    #[cfg(test)]
    async fn queue_len(&self) -> usize {
        self.inner.queue.lock().await.len()
    }
}

/// Fires every `timeInterval`: waits for a head message, then attempts one
/// delivery under the 1000 ms deadline. On success the head is popped; on
/// overrun it stays for the next tick.
async fn ui_ticker(inner: Arc<OutInner>) {
    let mut stop = inner.shutdown.subscribe();
    let mut tick = tokio::time::interval(inner.time_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.wait_for(|s| *s) => break,
            _ = tick.tick() => {}
        }

        // peek the head, waiting for the queue to become non-empty
        let msg = loop {
            let head = { inner.queue.lock().await.front().cloned() };
            match head {
                Some(msg) => break msg,
                None => {
                    tokio::select! {
                        _ = stop.wait_for(|s| *s) => return,
                        _ = inner.nonempty.notified() => {}
                    }
                }
            }
        };

        match tokio::time::timeout(UI_SEND_TIMEOUT, inner.ui.send_blocking(msg)).await {
            Ok(Ok(())) => {
                inner.queue.lock().await.pop_front();
            }
            Ok(Err(_)) | Err(_) => {
                // head retained; retried on the next tick
            }
        }
    }
}

/// Appends handed-off batches to the log file, one JSON object per line.
/// Exits when the hand-off channel closes and is drained.
async fn file_writer(inner: Arc<OutInner>, mut rx: mpsc::Receiver<Vec<Message>>) {
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&inner.file_path)
        .await;
    let mut file = match file {
        Ok(f) => f,
        Err(e) => {
            error!(path = %inner.file_path.display(), err = %e, "cannot open output log");
            return;
        }
    };

    while let Some(batch) = rx.recv().await {
        let mut buf = Vec::with_capacity(batch.len() * 64);
        for msg in &batch {
            match serde_json::to_vec(msg) {
                Ok(line) => {
                    buf.extend_from_slice(&line);
                    buf.push(b'\n');
                }
                Err(e) => warn!(err = %e, "unserializable output message"),
            }
        }
        if let Err(e) = file.write_all(&buf).await {
            error!(path = %inner.file_path.display(), err = %e, "output log write failed");
        }
        let _ = file.flush().await;
    }
}
