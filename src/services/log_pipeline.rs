use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{
    config::GatewayConfig,
    error::GatewayError,
    persistence::RecordStore,
    services::FlushReport,
    types::{LogEntry, LogFilter, LogStat, LogType},
    utils::{SwapBuffer, now},
};

/// Takes log inserts off the request path
///
/// Entries land in a [`SwapBuffer`]; the flusher drains it and writes the
/// rows in bounded chunks. A failed chunk loses its rows, the remaining
/// chunks are still written.
pub struct LogPipeline {
    store: Arc<dyn RecordStore>,
    queue: SwapBuffer<LogEntry>,
    async_enabled: bool,
    consume_enabled: AtomicBool,
    batch_size: usize,
    flush_lock: tokio::sync::Mutex<()>,
}

impl LogPipeline {
    pub fn new(store: Arc<dyn RecordStore>, config: &GatewayConfig) -> Self {
        Self {
            store,
            queue: SwapBuffer::with_capacity(config.log_batch_size),
            async_enabled: config.async_log_enabled,
            consume_enabled: AtomicBool::new(config.log_consume_enabled),
            batch_size: config.log_batch_size.max(1),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn consume_enabled(&self) -> bool {
        self.consume_enabled.load(Ordering::Relaxed)
    }

    pub fn set_consume_enabled(&self, enabled: bool) {
        self.consume_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_async(&self) -> bool {
        self.async_enabled
    }

    /// Entries waiting for the next flush
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Queues an entry for the next flush
    pub fn enqueue(&self, entry: LogEntry) {
        if entry.kind == LogType::Consume && !self.consume_enabled() {
            return;
        }
        self.queue.push(entry);
    }

    /// Records a consume event, queued or written straight through
    ///
    /// Failures are logged, never returned.
    pub async fn record_consume(&self, mut entry: LogEntry) {
        if !self.consume_enabled() {
            return;
        }
        entry.kind = LogType::Consume;
        if entry.created_at == 0 {
            entry.created_at = now();
        }
        if self.async_enabled {
            self.enqueue(entry);
            return;
        }
        if let Err(e) = self.store.insert_logs(std::slice::from_ref(&entry)).await {
            error!(user_id = entry.user_id, "Failed to record consume log: {}", e);
        }
    }

    /// Writes a non-consume event directly
    pub async fn record(
        &self,
        user_id: i64,
        kind: LogType,
        content: impl Into<String>,
    ) -> Result<(), GatewayError> {
        let entry = LogEntry {
            user_id,
            created_at: now(),
            kind,
            content: content.into(),
            ..Default::default()
        };
        self.store.insert_logs(&[entry]).await
    }

    /// Writes everything queued so far
    pub async fn flush(&self) -> FlushReport {
        let _flushing = self.flush_lock.lock().await;
        let drained = self.queue.swap();
        let mut report = FlushReport::default();
        if drained.is_empty() {
            return report;
        }
        for chunk in drained.chunks(self.batch_size) {
            match self.store.insert_logs(chunk).await {
                Ok(()) => report.applied += chunk.len(),
                Err(e) => {
                    error!(rows = chunk.len(), "Failed to insert log chunk: {}", e);
                    report.failed += chunk.len();
                }
            }
        }
        self.queue.recycle(drained);
        report
    }

    /// Retention: removes logs created before `timestamp`
    pub async fn delete_before(&self, timestamp: i64) -> Result<u64, GatewayError> {
        let removed = self.store.delete_logs_before(timestamp).await?;
        info!(removed, timestamp, "Old logs deleted");
        Ok(removed)
    }

    /// Quota and token totals of the consume logs matching `filter`
    pub async fn stat(&self, filter: &LogFilter) -> Result<LogStat, GatewayError> {
        let (quota, tokens) = tokio::try_join!(
            self.store.sum_used_quota(filter),
            self.store.sum_used_tokens(filter)
        )?;
        Ok(LogStat { quota, tokens })
    }

    /// Flushes every `period` until `shutdown` fires, then flushes once more
    pub fn spawn(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report = self.flush().await;
                        if !report.is_empty() {
                            debug!(inserted = report.applied, lost = report.failed, "Log queue flushed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            let report = self.flush().await;
            if report.failed > 0 {
                warn!(lost = report.failed, "Log rows lost during final flush");
            }
            info!(inserted = report.applied, "Log pipeline stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    fn consume(user_id: i64) -> LogEntry {
        LogEntry {
            user_id,
            kind: LogType::Consume,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn disabled_consume_logging_drops_entries() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = LogPipeline::new(store.clone(), &GatewayConfig::default());
        pipeline.set_consume_enabled(false);
        pipeline.enqueue(consume(1));
        pipeline.record_consume(consume(1)).await;
        pipeline.enqueue(LogEntry {
            kind: LogType::System,
            ..Default::default()
        });
        assert_eq!(pipeline.pending(), 1);
        assert_eq!(store.log_count(), 0);
    }

    #[tokio::test]
    async fn sync_mode_writes_through() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = LogPipeline::new(store.clone(), &GatewayConfig::default());
        assert!(!pipeline.is_async());
        pipeline.record_consume(consume(3)).await;
        assert_eq!(store.log_count(), 1);
        assert_eq!(pipeline.pending(), 0);
    }
}
