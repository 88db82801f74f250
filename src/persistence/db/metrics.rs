use std::{
    sync::{
        Mutex,
        atomic::{AtomicI64, AtomicU64, Ordering},
    },
    time::Instant,
};

use serde_json::{Value, json};

/// Write statistics of one database store
#[derive(Default)]
pub struct WriteMetrics {
    last_write_ts: AtomicI64,
    write_error_count: AtomicU64,
    total_writes: AtomicU64,
    total_write_nanos: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl WriteMetrics {
    pub fn record_ok(&self, start: Instant) {
        self.last_write_ts
            .store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
        self.total_writes.fetch_add(1, Ordering::Relaxed);
        self.total_write_nanos
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_err(&self, e: &dyn std::error::Error) {
        self.write_error_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut g) = self.last_error.lock() {
            *g = Some(e.to_string());
        }
    }

    pub fn snapshot(&self) -> Value {
        let total = self.total_writes.load(Ordering::Relaxed);
        let errors = self.write_error_count.load(Ordering::Relaxed);
        let nanos = self.total_write_nanos.load(Ordering::Relaxed);
        let avg_ms = if total > 0 {
            (nanos as f64 / total as f64) / 1_000_000.0
        } else {
            0.0
        };
        let last_error = self.last_error.lock().ok().and_then(|g| g.clone());
        json!({
            "last_write_ts": self.last_write_ts.load(Ordering::Relaxed),
            "write_error_count": errors,
            "total_writes": total,
            "avg_write_ms": avg_ms,
            "last_error": last_error,
        })
    }
}
