/// Session statistics: sample buckets, passive bandwidth accounting and
/// counters. Buckets are append-only during the session and summarized
/// once at teardown.
///
/// Shared between pipeline tasks. Each bucket sits behind its own lock;
/// counters are atomic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use mediaecho_types::{BandwidthReport, RttReport, SessionCounters, SessionReport, Summary};

use crate::rtt::{RttEstimate, RttEstimator};

/// First quartile, median and third quartile of an ascending slice.
///
/// Quartiles interpolate between `all[f]` and `all[f + 1]` with
/// `f = floor((n + 1) / 4)` (third: `floor(3 (n + 1) / 4)`). Indices are
/// clamped to the last element for small `n`. The median is the middle
/// element, or the mean of the two middle elements for even `n`.
///
/// # Panics
/// Panics if `sorted` is empty.
pub fn quartiles(sorted: &[f64]) -> (f64, f64, f64) {
    let n = sorted.len();
    assert!(n > 0, "quartiles of an empty sample set");
    let last = n - 1;

    let interpolate = |pos: f64| {
        let base = pos.trunc();
        let frac = pos - base;
        let lo = (base as usize).min(last);
        let hi = (lo + 1).min(last);
        sorted[lo] + frac * (sorted[hi] - sorted[lo])
    };

    let n1 = (n + 1) as f64;
    let fquart = interpolate(n1 / 4.0);
    let tquart = interpolate(3.0 * n1 / 4.0);
    let half = n / 2;
    let median = if n % 2 == 1 {
        sorted[half]
    } else {
        (sorted[half - 1] + sorted[half]) / 2.0
    };
    (fquart, median, tquart)
}

/// Full sample list plus running min/max/sum/sum-of-squares.
#[derive(Debug, Clone)]
pub struct SampleBucket {
    all: Vec<f64>,
    min: f64,
    max: f64,
    sum: f64,
    sumsq: f64,
}

impl Default for SampleBucket {
    fn default() -> Self {
        Self {
            all: Vec::new(),
            min: f64::MAX,
            max: f64::MIN,
            sum: 0.0,
            sumsq: 0.0,
        }
    }
}

impl SampleBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, value: f64) {
        self.all.push(value);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.sumsq += value * value;
    }

    /// Sort the samples and summarize them. `None` when empty.
    pub fn summarize(&mut self) -> Option<Summary> {
        if self.all.is_empty() {
            return None;
        }
        self.all.sort_by(f64::total_cmp);
        let n = self.all.len();
        let (fquart, median, tquart) = quartiles(&self.all);
        let avg = self.sum / n as f64;
        let stdev = if n > 1 {
            ((self.sumsq - n as f64 * avg * avg) / (n - 1) as f64)
                .max(0.0)
                .sqrt()
        } else {
            0.0
        };
        Some(Summary {
            count: n,
            min: self.min,
            fquart,
            avg,
            median,
            tquart,
            max: self.max,
            stdev,
        })
    }
}

/// One received frame as seen by the bandwidth accounting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arrival {
    pub seq: u32,
    pub frame_len: u32,
    pub rtt_ms: f64,
}

/// Arrival log for loss, reordering and throughput.
#[derive(Debug, Clone, Default)]
pub struct BandwidthBucket {
    arrivals: Vec<Arrival>,
    seq_min: Option<u32>,
    seq_max: Option<u32>,
    len_min: Option<u32>,
    len_max: Option<u32>,
    recv_sum: u64,
}

impl BandwidthBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, seq: u32, frame_len: u32, rtt_ms: f64) {
        self.arrivals.push(Arrival {
            seq,
            frame_len,
            rtt_ms,
        });
        self.seq_min = Some(self.seq_min.map_or(seq, |m| m.min(seq)));
        self.seq_max = Some(self.seq_max.map_or(seq, |m| m.max(seq)));
        self.len_min = Some(self.len_min.map_or(frame_len, |m| m.min(frame_len)));
        self.len_max = Some(self.len_max.map_or(frame_len, |m| m.max(frame_len)));
        self.recv_sum += u64::from(frame_len);
    }

    /// Number of adjacent arrivals whose sequence number went down.
    pub fn reorder_count(&self) -> u64 {
        self.arrivals
            .windows(2)
            .filter(|w| w[1].seq < w[0].seq)
            .count() as u64
    }

    /// Summarize over a session of length `elapsed`. Sorts the arrival log by
    /// frame length, so reordering is counted first.
    pub fn report(&mut self, elapsed: Duration) -> Option<BandwidthReport> {
        let (seqmin, seqmax) = self.seq_min.zip(self.seq_max)?;
        let (lenmin, lenmax) = self.len_min.zip(self.len_max)?;
        let count = self.arrivals.len();
        let reorder = self.reorder_count();
        let loss = (i64::from(seqmax) - i64::from(seqmin) + 1) - count as i64;

        let mut lens: Vec<f64> = self.arrivals.iter().map(|a| f64::from(a.frame_len)).collect();
        lens.sort_by(f64::total_cmp);
        let (lenfquart, lenmedian, lentquart) = quartiles(&lens);

        let secs = elapsed.as_secs_f64();
        let bwu = if secs > 0.0 {
            8.0 * self.recv_sum as f64 / secs
        } else {
            0.0
        };

        Some(BandwidthReport {
            count,
            loss,
            seqmin,
            seqmax,
            lenmin,
            lenfquart,
            lenmedian,
            lentquart,
            lenmax,
            reorder,
            // TODO: derive from RTTmin = RTTtrans + (len * 8 + hdr) / bwe once
            // per-link header overhead is known.
            bwe: 0.0,
            bwu,
            recvsum: self.recv_sum,
        })
    }
}

#[derive(Debug, Default)]
struct Counters {
    frames_sent: AtomicU64,
    sends_aborted: AtomicU64,
    send_failures: AtomicU64,
    frames_received: AtomicU64,
    protocol_errors: AtomicU64,
    frames_dropped: AtomicU64,
    duplicates: AtomicU64,
    gaps_skipped: AtomicU64,
    frames_decoded: AtomicU64,
}

#[derive(Debug, Default)]
struct RttState {
    estimator: RttEstimator,
    samples: SampleBucket,
    chart: Vec<(u32, f64)>,
}

/// Everything measured during one session.
#[derive(Debug)]
pub struct SessionStats {
    started: Instant,
    started_at: chrono::DateTime<chrono::Utc>,
    rtt: Mutex<RttState>,
    bandwidth: Mutex<BandwidthBucket>,
    encode_time: Mutex<SampleBucket>,
    encode_queue: Mutex<SampleBucket>,
    decode_time: Mutex<SampleBucket>,
    decode_queue: Mutex<SampleBucket>,
    counters: Counters,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: chrono::Utc::now(),
            rtt: Mutex::new(RttState::default()),
            bandwidth: Mutex::new(BandwidthBucket::new()),
            encode_time: Mutex::new(SampleBucket::new()),
            encode_queue: Mutex::new(SampleBucket::new()),
            decode_time: Mutex::new(SampleBucket::new()),
            decode_queue: Mutex::new(SampleBucket::new()),
            counters: Counters::default(),
        }
    }

    /// A complete frame arrived: feeds the estimator, the RTT samples and
    /// the bandwidth log. Returns the updated estimate.
    pub fn record_arrival(&self, seq: u32, frame_len: u32, rtt_ms: f64) -> RttEstimate {
        let estimate = {
            let mut rtt = self.rtt.lock();
            rtt.samples.record(rtt_ms);
            rtt.chart.push((frame_len, rtt_ms));
            rtt.estimator.update(rtt_ms)
        };
        self.bandwidth.lock().record(seq, frame_len, rtt_ms);
        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);
        estimate
    }

    /// Estimator state, or the initial state derived from `default_rtt`.
    pub fn rtt_estimate(&self, default_rtt: Duration) -> RttEstimate {
        self.rtt.lock().estimator.estimate_or(default_rtt)
    }

    pub fn record_encode(&self, queue_depth: usize, submit_time: Duration) {
        self.encode_queue.lock().record(queue_depth as f64);
        self.encode_time.lock().record(submit_time.as_secs_f64() * 1000.0);
    }

    pub fn record_decode(&self, queue_depth: usize, submit_time: Duration) {
        self.decode_queue.lock().record(queue_depth as f64);
        self.decode_time.lock().record(submit_time.as_secs_f64() * 1000.0);
        self.counters.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_sent(&self) {
        self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_aborted(&self) {
        self.counters.sends_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_failed(&self) {
        self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.counters.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_dropped(&self) {
        self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_reorder_counts(&self, duplicates: u64, gaps_skipped: u64) {
        self.counters.duplicates.store(duplicates, Ordering::Relaxed);
        self.counters.gaps_skipped.store(gaps_skipped, Ordering::Relaxed);
    }

    pub fn counters(&self) -> SessionCounters {
        let c = &self.counters;
        SessionCounters {
            frames_sent: c.frames_sent.load(Ordering::Relaxed),
            sends_aborted: c.sends_aborted.load(Ordering::Relaxed),
            send_failures: c.send_failures.load(Ordering::Relaxed),
            frames_received: c.frames_received.load(Ordering::Relaxed),
            protocol_errors: c.protocol_errors.load(Ordering::Relaxed),
            frames_dropped: c.frames_dropped.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            gaps_skipped: c.gaps_skipped.load(Ordering::Relaxed),
            frames_decoded: c.frames_decoded.load(Ordering::Relaxed),
        }
    }

    /// Summarize every bucket. The buckets are drained: samples recorded
    /// after this call start from empty.
    pub fn take_report(&self, ssrc: u32) -> SessionReport {
        let elapsed = self.started.elapsed();

        let (rtt, rtt_samples) = {
            let mut state = self.rtt.lock();
            let estimate = state.estimator.estimate();
            let summary = state.samples.summarize();
            let chart = std::mem::take(&mut state.chart);
            state.samples = SampleBucket::new();
            let report = summary.zip(estimate).map(|(summary, e)| RttReport {
                summary,
                srtt: e.srtt,
                rttvar: e.rttvar,
                rto: e.rto,
            });
            (report, chart)
        };
        let bandwidth = std::mem::take(&mut *self.bandwidth.lock()).report(elapsed);
        let drain = |bucket: &Mutex<SampleBucket>| std::mem::take(&mut *bucket.lock()).summarize();

        SessionReport {
            ssrc,
            started_at: self.started_at,
            duration_ms: elapsed.as_secs_f64() * 1000.0,
            rtt,
            bandwidth,
            encode_time: drain(&self.encode_time),
            encode_queue: drain(&self.encode_queue),
            decode_time: drain(&self.decode_time),
            decode_queue: drain(&self.decode_queue),
            counters: self.counters(),
            rtt_samples,
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn quartiles_of_one_to_ten() {
        let data: Vec<f64> = (1..=10).map(f64::from).collect();
        let (f, m, t) = quartiles(&data);
        // f = floor(11/4) = 2, a1 = 0.75 -> 3 + 0.75 * (4 - 3)
        assert!(close(f, 3.75), "fquart = {f}");
        assert!(close(m, 5.5), "median = {m}");
        // t = floor(33/4) = 8, a3 = 0.25 -> 9 + 0.25 * (10 - 9)
        assert!(close(t, 9.25), "tquart = {t}");
    }

    #[test]
    fn quartiles_odd_count_median() {
        let data: Vec<f64> = (1..=9).map(f64::from).collect();
        let (f, m, t) = quartiles(&data);
        // f = floor(10/4) = 2, a1 = 0.5 -> 3.5 ; t = floor(7.5) = 7, a3 = 0.5 -> 8.5
        assert!(close(f, 3.5));
        assert!(close(m, 5.0));
        assert!(close(t, 8.5));
    }

    #[test]
    fn quartiles_small_sets_do_not_panic() {
        assert_eq!(quartiles(&[4.0]), (4.0, 4.0, 4.0));
        let (f, m, t) = quartiles(&[1.0, 3.0]);
        assert!(close(m, 2.0));
        assert!(f >= 1.0 && f <= 3.0);
        assert!(close(t, 3.0));
    }

    #[test]
    fn bucket_summary() {
        let mut b = SampleBucket::new();
        assert!(b.summarize().is_none());
        for v in [5.0, 1.0, 4.0, 2.0, 3.0] {
            b.record(v);
        }
        let s = b.summarize().unwrap();
        assert_eq!(s.count, 5);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 5.0);
        assert!(close(s.avg, 3.0));
        assert!(close(s.median, 3.0));
        // sample stdev of 1..5 = sqrt(2.5)
        assert!(close(s.stdev, 2.5f64.sqrt()));
    }

    #[test]
    fn bandwidth_loss_and_reorder() {
        let mut bw = BandwidthBucket::new();
        for seq in [2, 0, 1, 4, 3] {
            bw.record(seq, 100 + seq, 10.0);
        }
        assert_eq!(bw.reorder_count(), 2);
        let r = bw.report(Duration::from_secs(2)).unwrap();
        assert_eq!(r.count, 5);
        assert_eq!(r.loss, 0);
        assert_eq!(r.reorder, 2);
        assert_eq!((r.seqmin, r.seqmax), (0, 4));
        assert_eq!((r.lenmin, r.lenmax), (100, 104));
        assert_eq!(r.recvsum, 510);
        assert!(close(r.bwu, 8.0 * 510.0 / 2.0));
        assert_eq!(r.bwe, 0.0);
    }

    #[test]
    fn bandwidth_counts_missing_sequence_numbers() {
        let mut bw = BandwidthBucket::new();
        for seq in [0, 1, 5, 9] {
            bw.record(seq, 50, 1.0);
        }
        let r = bw.report(Duration::from_secs(1)).unwrap();
        assert_eq!(r.loss, 6);
        assert_eq!(r.reorder, 0);
        assert!(BandwidthBucket::new().report(Duration::from_secs(1)).is_none());
    }

    #[test]
    fn session_report_drains_buckets() {
        let stats = SessionStats::new();
        for (seq, rtt) in [(0, 10.0), (1, 20.0), (2, 30.0)] {
            stats.record_arrival(seq, 1000, rtt);
        }
        stats.record_encode(3, Duration::from_millis(2));
        stats.frame_sent();
        stats.send_aborted();

        let report = stats.take_report(7);
        assert_eq!(report.ssrc, 7);
        let rtt = report.rtt.unwrap();
        assert_eq!(rtt.summary.count, 3);
        assert!(close(rtt.summary.avg, 20.0));
        assert!(close(rtt.summary.stdev, 10.0));
        assert_eq!(report.rtt_samples, vec![(1000, 10.0), (1000, 20.0), (1000, 30.0)]);
        assert_eq!(report.encode_queue.unwrap().max, 3.0);
        assert!(report.decode_time.is_none());
        assert_eq!(report.counters.frames_sent, 1);
        assert_eq!(report.counters.sends_aborted, 1);
        assert_eq!(report.counters.frames_received, 3);

        let again = stats.take_report(7);
        assert!(again.rtt.is_none());
        assert!(again.bandwidth.is_none());
        // the estimator itself is not reset
        assert!(stats.rtt_estimate(Duration::from_millis(100)).srtt < 100.0);
    }
}
