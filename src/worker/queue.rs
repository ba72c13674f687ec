use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;

/// Outcome of a single enqueue attempt. Internal to the engine; producers
/// calling `JobEngine::trigger_job` never see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued,
    Full,
    Closed,
}

/// Bounded FIFO of job ids with many producers and one consumer.
#[derive(Debug)]
pub struct TriggerQueue {
    tx: mpsc::Sender<String>,
    rx: Mutex<Option<mpsc::Receiver<String>>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl TriggerQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Never waits. A full queue drops the id and bumps the drop counter.
    pub fn push(&self, job_id: String) -> Enqueue {
        match self.tx.try_send(job_id) {
            Ok(()) => Enqueue::Queued,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Enqueue::Full
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Enqueue::Closed
            }
        }
    }

    /// Take the consumer half. Returns None while another loop holds it.
    pub async fn take_receiver(&self) -> Option<mpsc::Receiver<String>> {
        self.rx.lock().await.take()
    }

    /// Hand the consumer half back so the engine can be started again.
    pub async fn restore_receiver(&self, rx: mpsc::Receiver<String>) {
        *self.rx.lock().await = Some(rx);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of ids currently waiting.
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
