//! Audit trail of access decisions
//!
//! Every decision produces one [`AuditRecord`]. Records go through a bounded
//! channel to a background flush thread that hands them to an
//! [`AuditSink`] in batches:
//! - `log()` never blocks; a full channel drops the record and counts it
//! - `stop()` (or drop) drains what is already queued before returning

use crate::config::AuditConfig;
use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

/// One access decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub principal: String,
    pub action: String,
    pub target: String,
    /// Policy that decided the outcome, if any matched
    pub policy_id: Option<String>,
    pub allowed: bool,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        principal: &str,
        action: &str,
        target: impl Into<String>,
        policy_id: Option<String>,
        allowed: bool,
    ) -> Self {
        AuditRecord {
            principal: principal.to_string(),
            action: action.to_string(),
            target: target.into(),
            policy_id,
            allowed,
            timestamp: Utc::now(),
        }
    }
}

/// Destination of flushed audit batches
pub trait AuditSink: Send + Sync {
    fn write_batch(&self, records: &[AuditRecord]);
}

/// Writes each record as a structured `tracing` event on the `audit` target
#[derive(Debug, Default)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn write_batch(&self, records: &[AuditRecord]) {
        for r in records {
            info!(
                target: "audit",
                principal = %r.principal,
                action = %r.action,
                resource = %r.target,
                policy = r.policy_id.as_deref().unwrap_or("-"),
                allowed = r.allowed,
                at = %r.timestamp.to_rfc3339(),
                "access decision"
            );
        }
    }
}

/// Keeps every record in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

impl AuditSink for CollectingSink {
    fn write_batch(&self, records: &[AuditRecord]) {
        self.records.lock().extend_from_slice(records);
    }
}

#[derive(Debug, Default)]
struct Counters {
    logged: AtomicU64,
    dropped: AtomicU64,
    flushed: AtomicU64,
}

/// Point-in-time logger counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuditStats {
    pub logged: u64,
    pub dropped: u64,
    pub flushed: u64,
}

/// Non-blocking audit logger with a background flush thread
pub struct AuditLogger {
    sender: Sender<AuditRecord>,
    receiver: Receiver<AuditRecord>,
    flush_thread: Option<JoinHandle<()>>,
    flush_interval: Duration,
    batch_size: usize,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl AuditLogger {
    /// Create a stopped logger; records queue up until [`start`](Self::start)
    pub fn new(config: &AuditConfig) -> Self {
        let (sender, receiver) = channel::bounded(config.channel_capacity.max(1));
        AuditLogger {
            sender,
            receiver,
            flush_thread: None,
            flush_interval: config.flush_interval(),
            batch_size: config.batch_size.max(1),
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Create and start in one step
    pub fn started(config: &AuditConfig, sink: Arc<dyn AuditSink>) -> Self {
        let mut logger = Self::new(config);
        logger.start(sink);
        logger
    }

    /// Start the background flush thread
    pub fn start(&mut self, sink: Arc<dyn AuditSink>) {
        if self.flush_thread.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        let receiver = self.receiver.clone();
        let running = Arc::clone(&self.running);
        let counters = Arc::clone(&self.counters);
        let flush_interval = self.flush_interval;
        let batch_size = self.batch_size;

        let flush_thread = thread::spawn(move || {
            while running.load(Ordering::SeqCst) || !receiver.is_empty() {
                let first = match receiver.recv_timeout(flush_interval) {
                    Ok(record) => record,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                };

                let mut batch = Vec::with_capacity(batch_size);
                batch.push(first);
                while batch.len() < batch_size {
                    match receiver.try_recv() {
                        Ok(record) => batch.push(record),
                        Err(_) => break,
                    }
                }

                sink.write_batch(&batch);
                counters
                    .flushed
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
            }
        });

        self.flush_thread = Some(flush_thread);
    }

    /// Stop the flush thread after it drains the queue
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(thread) = self.flush_thread.take() {
            let _ = thread.join();
        }
    }

    /// Queue a record (non-blocking)
    pub fn log(&self, record: AuditRecord) {
        match self.sender.try_send(record) {
            Ok(()) => {
                self.counters.logged.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(record)) | Err(TrySendError::Disconnected(record)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!(dropped, principal = %record.principal, "audit channel full, dropping records");
                }
            }
        }
    }

    pub fn stats(&self) -> AuditStats {
        AuditStats {
            logged: self.counters.logged.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            flushed: self.counters.flushed.load(Ordering::Relaxed),
        }
    }
}

impl Drop for AuditLogger {
    fn drop(&mut self) {
        self.stop();
    }
}
