use serde::{Deserialize, Serialize};

/// Order statistics over one sample bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub min: f64,
    pub fquart: f64,
    pub avg: f64,
    pub median: f64,
    pub tquart: f64,
    pub max: f64,
    pub stdev: f64,
}

/// RTT summary plus the estimator state at teardown. Times in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RttReport {
    #[serde(flatten)]
    pub summary: Summary,
    pub srtt: f64,
    pub rttvar: f64,
    pub rto: f64,
}

/// Passive bandwidth, loss and reordering measurements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandwidthReport {
    pub count: usize,
    /// Frames whose sequence number was never observed inside `[seqmin, seqmax]`.
    pub loss: i64,
    pub seqmin: u32,
    pub seqmax: u32,
    pub lenmin: u32,
    pub lenfquart: f64,
    pub lenmedian: f64,
    pub lentquart: f64,
    pub lenmax: u32,
    /// Adjacent arrivals whose sequence numbers decreased.
    pub reorder: u64,
    /// Bandwidth estimate in bits/second. Always 0: no delay model yet.
    pub bwe: f64,
    /// Bandwidth used in bits/second.
    pub bwu: f64,
    pub recvsum: u64,
}

/// Per-session counters maintained alongside the sample buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    pub frames_sent: u64,
    pub sends_aborted: u64,
    pub send_failures: u64,
    pub frames_received: u64,
    pub protocol_errors: u64,
    pub frames_dropped: u64,
    pub duplicates: u64,
    pub gaps_skipped: u64,
    pub frames_decoded: u64,
}

/// The one summarization event emitted at session teardown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub ssrc: u32,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: f64,
    pub rtt: Option<RttReport>,
    pub bandwidth: Option<BandwidthReport>,
    pub encode_time: Option<Summary>,
    pub encode_queue: Option<Summary>,
    pub decode_time: Option<Summary>,
    pub decode_queue: Option<Summary>,
    pub counters: SessionCounters,
    /// Raw `(frame length, rtt ms)` samples in arrival order, for charting.
    pub rtt_samples: Vec<(u32, f64)>,
}
