use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide transfer counters.
pub(crate) struct Metrics;

static BURSTS_SENT: AtomicU64 = AtomicU64::new(0);
static BURSTS_RESENT: AtomicU64 = AtomicU64::new(0);
static BURSTS_RECEIVED: AtomicU64 = AtomicU64::new(0);
static CRC_FAILURES: AtomicU64 = AtomicU64::new(0);
static CONTROL_SENT: AtomicU64 = AtomicU64::new(0);
static CONTROL_RECEIVED: AtomicU64 = AtomicU64::new(0);
static PACKETS_CONFIRMED: AtomicU64 = AtomicU64::new(0);
static PACKETS_REASSEMBLED: AtomicU64 = AtomicU64::new(0);
static BYTES_SENT: AtomicU64 = AtomicU64::new(0);

impl Metrics {
    #[inline]
    pub(crate) fn record_burst_sent(wire_len: usize, resent: bool) {
        BURSTS_SENT.fetch_add(1, Ordering::Relaxed);
        BYTES_SENT.fetch_add(wire_len as u64, Ordering::Relaxed);
        if resent {
            BURSTS_RESENT.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_burst_received() {
        BURSTS_RECEIVED.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_crc_failure() {
        CRC_FAILURES.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_control_sent() {
        CONTROL_SENT.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_control_received() {
        CONTROL_RECEIVED.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_packet_confirmed() {
        PACKETS_CONFIRMED.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_packet_reassembled() {
        PACKETS_REASSEMBLED.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn totals() -> MetricsSnapshot {
        MetricsSnapshot {
            bursts_sent: BURSTS_SENT.load(Ordering::Relaxed),
            bursts_resent: BURSTS_RESENT.load(Ordering::Relaxed),
            bursts_received: BURSTS_RECEIVED.load(Ordering::Relaxed),
            crc_failures: CRC_FAILURES.load(Ordering::Relaxed),
            control_sent: CONTROL_SENT.load(Ordering::Relaxed),
            control_received: CONTROL_RECEIVED.load(Ordering::Relaxed),
            packets_confirmed: PACKETS_CONFIRMED.load(Ordering::Relaxed),
            packets_reassembled: PACKETS_REASSEMBLED.load(Ordering::Relaxed),
            bytes_sent: BYTES_SENT.load(Ordering::Relaxed),
        }
    }
}

/// Lightweight snapshot of the transfer counters.
///
/// Counters are shared by every sender and receiver in the process and only
/// ever grow, so compare two snapshots to measure one transfer.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Bursts written to a link, retransmissions included.
    pub bursts_sent: u64,
    /// Bursts written more than once.
    pub bursts_resent: u64,
    /// Bursts that passed the CRC check.
    pub bursts_received: u64,
    /// Bursts or control lines discarded for a bad CRC or layout.
    pub crc_failures: u64,
    /// Control lines written.
    pub control_sent: u64,
    /// Valid control lines read.
    pub control_received: u64,
    /// Packets the sender saw confirmed.
    pub packets_confirmed: u64,
    /// Packets the receiver rebuilt.
    pub packets_reassembled: u64,
    /// Framed burst bytes written.
    pub bytes_sent: u64,
}

impl MetricsSnapshot {
    /// Counter growth since `earlier`.
    #[must_use]
    pub fn since(&self, earlier: &Self) -> Self {
        Self {
            bursts_sent: self.bursts_sent.saturating_sub(earlier.bursts_sent),
            bursts_resent: self.bursts_resent.saturating_sub(earlier.bursts_resent),
            bursts_received: self.bursts_received.saturating_sub(earlier.bursts_received),
            crc_failures: self.crc_failures.saturating_sub(earlier.crc_failures),
            control_sent: self.control_sent.saturating_sub(earlier.control_sent),
            control_received: self.control_received.saturating_sub(earlier.control_received),
            packets_confirmed: self
                .packets_confirmed
                .saturating_sub(earlier.packets_confirmed),
            packets_reassembled: self
                .packets_reassembled
                .saturating_sub(earlier.packets_reassembled),
            bytes_sent: self.bytes_sent.saturating_sub(earlier.bytes_sent),
        }
    }

    /// Fraction of sent bursts that were retransmissions.
    #[must_use]
    pub fn resend_ratio(&self) -> Option<f64> {
        if self.bursts_sent == 0 {
            return None;
        }
        Some(self.bursts_resent as f64 / self.bursts_sent as f64)
    }
}

/// Current values of the process-wide transfer counters.
#[must_use]
pub fn snapshot() -> MetricsSnapshot {
    Metrics::totals()
}
