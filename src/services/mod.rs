pub mod coalescer;
pub mod gateway;
pub mod health;
pub mod ledger;
pub mod log_pipeline;
pub mod notify;
pub mod probe;
pub mod redemption;
pub mod sync;

use serde::Serialize;

pub use coalescer::{DeltaKind, WriteCoalescer};
pub use gateway::{Admission, Gateway, Usage};
pub use health::{HealthMonitor, HealthSettings, ProbeOutcome, ProbeReport, SweepReport};
pub use ledger::{QuotaLedger, Reservation};
pub use log_pipeline::LogPipeline;
pub use notify::{LogNotifier, Notifier};
pub use probe::{HttpProbeTransport, ProbeError, ProbeResponse, ProbeTransport, UpstreamError};
pub use redemption::{IssuedCodes, RedemptionService};

/// Outcome of draining a buffered writer once
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Items written to the record store
    pub applied: usize,
    /// Items lost to failed writes
    pub failed: usize,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.applied == 0 && self.failed == 0
    }
}
