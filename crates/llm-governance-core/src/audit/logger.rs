//! AuditLogger - non-blocking, single-writer front end to the audit store.
//!
//! `append` enqueues and returns immediately. A background task drains the
//! queue into SQLite in batches. When the store rejects a batch the events
//! stay in a bounded local buffer and are retried with exponential backoff;
//! request handling never waits on, or changes because of, audit storage.

use super::stats::{AuditSummary, DailyStats, Granularity, ModeChangeRecord, PolicyStats, TimelineBucket};
use super::store::AuditStore;
use super::{AuditEvent, EventFilter, TimeRange};
use crate::error::GovernanceError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Writer task tuning.
#[derive(Debug, Clone)]
pub struct LoggerOptions {
    /// Events written per transaction.
    pub batch_size: usize,
    /// Events held locally while the store is failing; the oldest are dropped beyond this.
    pub buffer_capacity: usize,
    pub retry_initial: Duration,
    pub retry_max: Duration,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            batch_size: 256,
            buffer_capacity: 10_000,
            retry_initial: Duration::from_millis(100),
            retry_max: Duration::from_secs(30),
        }
    }
}

/// Writer state after a flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    /// Events persisted since the logger started.
    pub written: u64,
    /// Events still buffered because the store is failing.
    pub pending: usize,
    /// Events discarded because the buffer overflowed.
    pub dropped: u64,
}

enum Command {
    Append(AuditEvent),
    Flush(oneshot::Sender<FlushReport>),
}

/// Handle to the audit writer task.
///
/// Must be created inside a tokio runtime. Dropping every handle lets the
/// task make a final write attempt and exit.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    tx: mpsc::UnboundedSender<Command>,
    store: Arc<AuditStore>,
}

impl AuditLogger {
    pub fn spawn(store: Arc<AuditStore>, options: LoggerOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = Writer::new(Arc::clone(&store), options);
        tokio::spawn(writer.run(rx));
        Self { tx, store }
    }

    /// Queue an event for persistence. Never blocks and never fails the caller.
    pub fn append(&self, event: AuditEvent) {
        if self.tx.send(Command::Append(event)).is_err() {
            tracing::error!("audit writer stopped, event discarded");
        }
    }

    /// Wait until everything queued so far has been offered to the store.
    pub async fn flush(&self) -> Result<FlushReport, GovernanceError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Command::Flush(reply))
            .map_err(|_| GovernanceError::AuditUnavailable("audit writer stopped".to_string()))?;
        response
            .await
            .map_err(|_| GovernanceError::AuditUnavailable("audit writer stopped".to_string()))
    }

    pub fn store(&self) -> &Arc<AuditStore> {
        &self.store
    }

    pub async fn summary(&self, range: TimeRange) -> Result<AuditSummary, GovernanceError> {
        self.read(move |store| store.summary(&range)).await
    }

    pub async fn recent(&self, filter: EventFilter, limit: usize) -> Result<Vec<AuditEvent>, GovernanceError> {
        self.read(move |store| store.recent(&filter, limit)).await
    }

    pub async fn top_policies(&self, range: TimeRange, limit: usize) -> Result<Vec<PolicyStats>, GovernanceError> {
        self.read(move |store| store.top_policies(&range, limit)).await
    }

    pub async fn timeline(
        &self,
        filter: EventFilter,
        granularity: Granularity,
    ) -> Result<Vec<TimelineBucket>, GovernanceError> {
        self.read(move |store| store.timeline(&filter, granularity)).await
    }

    pub async fn daily_stats(&self, range: TimeRange) -> Result<Vec<DailyStats>, GovernanceError> {
        self.read(move |store| store.daily_stats(&range)).await
    }

    pub async fn mode_history(&self) -> Result<Vec<ModeChangeRecord>, GovernanceError> {
        self.read(|store| store.mode_history()).await
    }

    async fn read<T, F>(&self, f: F) -> Result<T, GovernanceError>
    where
        T: Send + 'static,
        F: FnOnce(&AuditStore) -> Result<T, GovernanceError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| GovernanceError::AuditUnavailable(e.to_string()))?
    }
}

struct Writer {
    store: Arc<AuditStore>,
    options: LoggerOptions,
    pending: VecDeque<AuditEvent>,
    backoff: Duration,
    retry_at: Option<Instant>,
    written: u64,
    dropped: u64,
}

impl Writer {
    fn new(store: Arc<AuditStore>, options: LoggerOptions) -> Self {
        Self {
            store,
            backoff: options.retry_initial,
            options,
            pending: VecDeque::new(),
            retry_at: None,
            written: 0,
            dropped: 0,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            let command = match self.retry_at {
                Some(deadline) if !self.pending.is_empty() => {
                    tokio::select! {
                        command = rx.recv() => command,
                        _ = tokio::time::sleep_until(deadline) => {
                            self.write_pending().await;
                            continue;
                        }
                    }
                }
                _ => rx.recv().await,
            };

            let Some(command) = command else { break };

            let mut waiters = Vec::new();
            self.accept(command, &mut waiters);
            for _ in 1..self.options.batch_size {
                match rx.try_recv() {
                    Ok(command) => self.accept(command, &mut waiters),
                    Err(_) => break,
                }
            }

            let retry_due = self.retry_at.map_or(true, |at| Instant::now() >= at);
            if !waiters.is_empty() || retry_due {
                self.write_pending().await;
            }

            let report = self.report();
            for waiter in waiters {
                let _ = waiter.send(report);
            }
        }

        self.write_pending().await;
        if !self.pending.is_empty() {
            tracing::error!(lost = self.pending.len(), "audit writer shutting down with unwritten events");
        }
    }

    fn accept(&mut self, command: Command, waiters: &mut Vec<oneshot::Sender<FlushReport>>) {
        match command {
            Command::Append(event) => self.enqueue(event),
            Command::Flush(reply) => waiters.push(reply),
        }
    }

    fn enqueue(&mut self, event: AuditEvent) {
        if self.pending.len() >= self.options.buffer_capacity {
            if let Some(lost) = self.pending.pop_front() {
                self.dropped += 1;
                tracing::error!(
                    event_type = %lost.event_type,
                    dropped = self.dropped,
                    "audit buffer full, dropping oldest event"
                );
            }
        }
        self.pending.push_back(event);
    }

    async fn write_pending(&mut self) {
        while !self.pending.is_empty() {
            let take = self.pending.len().min(self.options.batch_size);
            let batch: Vec<AuditEvent> = self.pending.iter().take(take).cloned().collect();
            let store = Arc::clone(&self.store);

            let outcome = tokio::task::spawn_blocking(move || store.insert_batch(&batch))
                .await
                .map_err(|e| GovernanceError::AuditUnavailable(e.to_string()))
                .and_then(|result| result);

            match outcome {
                Ok(()) => {
                    self.pending.drain(..take);
                    self.written += take as u64;
                    self.backoff = self.options.retry_initial;
                    self.retry_at = None;
                }
                Err(err) => {
                    tracing::error!(
                        error = %err,
                        pending = self.pending.len(),
                        retry_in = ?self.backoff,
                        "audit write failed, buffering locally"
                    );
                    self.retry_at = Some(Instant::now() + self.backoff);
                    self.backoff = (self.backoff * 2).min(self.options.retry_max);
                    return;
                }
            }
        }
    }

    fn report(&self) -> FlushReport {
        FlushReport {
            written: self.written,
            pending: self.pending.len(),
            dropped: self.dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnforcementMode;
    use chrono::Utc;
    use rusqlite::Connection;

    fn mode_change() -> AuditEvent {
        AuditEvent::mode_change(EnforcementMode::Observe, EnforcementMode::Advisory, "admin", Utc::now())
    }

    #[tokio::test]
    async fn test_append_then_flush_persists() {
        let logger = AuditLogger::spawn(Arc::new(AuditStore::open_in_memory().unwrap()), LoggerOptions::default());
        for _ in 0..5 {
            logger.append(mode_change());
        }

        let report = logger.flush().await.unwrap();
        assert_eq!(report.written, 5);
        assert_eq!(report.pending, 0);
        assert_eq!(logger.store().count().unwrap(), 5);
        assert_eq!(logger.mode_history().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_storage_failure_buffers_and_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let logger = AuditLogger::spawn(Arc::new(AuditStore::open(&path).unwrap()), LoggerOptions::default());

        let outage = Connection::open(&path).unwrap();
        outage
            .execute_batch(
                "CREATE TRIGGER audit_offline BEFORE INSERT ON audit_events
                 BEGIN SELECT RAISE(ABORT, 'audit storage offline'); END;",
            )
            .unwrap();

        logger.append(mode_change());
        logger.append(mode_change());
        let report = logger.flush().await.unwrap();
        assert_eq!(report.written, 0);
        assert_eq!(report.pending, 2);

        outage.execute_batch("DROP TRIGGER audit_offline").unwrap();

        let report = logger.flush().await.unwrap();
        assert_eq!(report.written, 2);
        assert_eq!(report.pending, 0);
        assert_eq!(logger.store().count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_buffer_overflow_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let options = LoggerOptions {
            buffer_capacity: 3,
            ..Default::default()
        };
        let logger = AuditLogger::spawn(Arc::new(AuditStore::open(&path).unwrap()), options);

        let outage = Connection::open(&path).unwrap();
        outage
            .execute_batch(
                "CREATE TRIGGER audit_offline BEFORE INSERT ON audit_events
                 BEGIN SELECT RAISE(ABORT, 'audit storage offline'); END;",
            )
            .unwrap();

        for _ in 0..5 {
            logger.append(mode_change());
        }
        let report = logger.flush().await.unwrap();
        assert_eq!(report.pending, 3);
        assert_eq!(report.dropped, 2);
    }

    #[tokio::test]
    async fn test_cloned_handles_share_writer() {
        let logger = AuditLogger::spawn(Arc::new(AuditStore::open_in_memory().unwrap()), LoggerOptions::default());
        let clone = logger.clone();
        logger.append(mode_change());
        drop(logger);

        let report = clone.flush().await.unwrap();
        assert_eq!(report.written, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_from_many_tasks() {
        let logger = AuditLogger::spawn(Arc::new(AuditStore::open_in_memory().unwrap()), LoggerOptions::default());

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let logger = logger.clone();
                tokio::spawn(async move { logger.append(mode_change()) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let report = logger.flush().await.unwrap();
        assert_eq!(report.written, 50);
        assert_eq!(report.pending, 0);
        assert_eq!(logger.store().count().unwrap(), 50);
    }
}
