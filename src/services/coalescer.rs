use std::{
    collections::HashMap,
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use strum::{Display, IntoStaticStr};
use tokio::{
    sync::{RwLock, RwLockReadGuard, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info};

use crate::{
    error::GatewayError, persistence::RecordStore, services::FlushReport, utils::now,
};

/// Counter family a coalesced delta belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum DeltaKind {
    /// User balance
    UserQuota,
    /// Token remaining quota, mirrored into its used quota
    TokenQuota,
    /// User used quota
    UsedQuota,
    ChannelUsedQuota,
    /// User request count
    RequestCount,
}

impl DeltaKind {
    pub const ALL: [DeltaKind; 5] = [
        DeltaKind::UserQuota,
        DeltaKind::TokenQuota,
        DeltaKind::UsedQuota,
        DeltaKind::ChannelUsedQuota,
        DeltaKind::RequestCount,
    ];

    const fn index(self) -> usize {
        match self {
            DeltaKind::UserQuota => 0,
            DeltaKind::TokenQuota => 1,
            DeltaKind::UsedQuota => 2,
            DeltaKind::ChannelUsedQuota => 3,
            DeltaKind::RequestCount => 4,
        }
    }
}

/// Applies one net delta to the record store
pub async fn apply_delta(
    store: &dyn RecordStore,
    kind: DeltaKind,
    id: i64,
    delta: i64,
) -> Result<(), GatewayError> {
    match kind {
        DeltaKind::UserQuota => store.add_user_quota(id, delta).await,
        DeltaKind::TokenQuota => store.add_token_quota(id, delta, now()).await,
        DeltaKind::UsedQuota => store.add_user_used_quota(id, delta).await,
        DeltaKind::ChannelUsedQuota => store.add_channel_used_quota(id, delta).await,
        DeltaKind::RequestCount => store.add_user_request_count(id, delta).await,
    }
}

#[derive(Default)]
struct Table {
    /// Accumulating since the last flush
    live: HashMap<i64, i64>,
    /// Taken by a running flush but not yet applied
    flushing: HashMap<i64, i64>,
}

/// Accumulates counter deltas in memory and applies their net effect on a timer
///
/// Producers only contend on the lock of their own kind, and a flush holds
/// that lock just long enough to swap the table out. A delta whose store
/// write fails is logged and dropped.
///
/// Applying a delta and dropping it from the pending view happen under the
/// write side of `apply_gate`, so a reader holding [`WriteCoalescer::stable_view`]
/// sees every delta exactly once, either in the store or in [`WriteCoalescer::pending`].
pub struct WriteCoalescer {
    store: Arc<dyn RecordStore>,
    tables: [Mutex<Table>; 5],
    flush_lock: tokio::sync::Mutex<()>,
    apply_gate: RwLock<()>,
}

impl WriteCoalescer {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            tables: Default::default(),
            flush_lock: tokio::sync::Mutex::new(()),
            apply_gate: RwLock::new(()),
        }
    }

    fn table(&self, kind: DeltaKind) -> MutexGuard<'_, Table> {
        self.tables[kind.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_delta(&self, kind: DeltaKind, id: i64, delta: i64) {
        if delta == 0 {
            return;
        }
        *self.table(kind).live.entry(id).or_insert(0) += delta;
    }

    /// Holds off flushes while the caller combines stored values with [`Self::pending`]
    pub async fn stable_view(&self) -> RwLockReadGuard<'_, ()> {
        self.apply_gate.read().await
    }

    /// Net delta for `id` not yet visible in the record store
    pub fn pending(&self, kind: DeltaKind, id: i64) -> i64 {
        let table = self.table(kind);
        table.live.get(&id).copied().unwrap_or(0) + table.flushing.get(&id).copied().unwrap_or(0)
    }

    /// Number of ids with an unflushed delta, across all kinds
    pub fn len(&self) -> usize {
        DeltaKind::ALL
            .into_iter()
            .map(|k| self.table(k).live.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies every accumulated delta to the record store
    pub async fn flush(&self) -> FlushReport {
        let _flushing = self.flush_lock.lock().await;
        let mut report = FlushReport::default();
        for kind in DeltaKind::ALL {
            let drained = {
                let mut table = self.table(kind);
                let drained = mem::take(&mut table.live);
                table.flushing.extend(drained.iter().map(|(k, v)| (*k, *v)));
                drained
            };
            for (id, delta) in drained {
                let _applying = self.apply_gate.write().await;
                if delta != 0 {
                    match apply_delta(self.store.as_ref(), kind, id, delta).await {
                        Ok(()) => report.applied += 1,
                        Err(e) => {
                            error!(%kind, id, delta, "Failed to apply batched update: {}", e);
                            report.failed += 1;
                        }
                    }
                }
                self.table(kind).flushing.remove(&id);
            }
        }
        report
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
                            debug!(applied = report.applied, failed = report.failed, "Batch update flushed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            let report = self.flush().await;
            info!(
                applied = report.applied,
                failed = report.failed,
                "Batch updater stopped"
            );
        })
    }
}
