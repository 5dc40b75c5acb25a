//! Operational statistics (spec.md §4.9): per-RPC-kind counters plus
//! running mean / variance (Welford) for size and latency series.

use std::time::Duration;

use crate::operation::{RpcKind, RPC_KIND_COUNT};

/// A Welford running accumulator for mean and variance.
#[derive(Debug, Clone, Copy, Default)]
pub struct Accumulator {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Accumulator {
    /// A sample is dropped if it is non-positive or exceeds one second,
    /// which for latency series is this module's defense against
    /// non-monotonic clocks across CPUs (spec.md §4.9); for size series the
    /// same bound is interpreted as "unreasonably large single sample".
    fn accepts(value: f64) -> bool {
        value > 0.0
    }

    fn observe(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance (`n - 1` denominator). `None` with fewer than two
    /// samples.
    pub fn variance(&self) -> Option<f64> {
        if self.count < 2 {
            None
        } else {
            Some(self.m2 / (self.count - 1) as f64)
        }
    }

    pub fn stddev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }
}

/// Latency is dropped (and not fed into its Accumulator) if the measured
/// interval is non-positive or exceeds one second (spec.md §4.9).
fn accept_latency(d: Duration) -> bool {
    !d.is_zero() && d.as_secs_f64() <= 1.0
}

/// Counters and distributions for one RPC kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct KindStats {
    pub ok: u64,
    pub err: u64,
    pub dropped: u64,
    pub send_size: Accumulator,
    pub receive_size: Accumulator,
    /// Declared per spec.md §4.9 but never fed: the core only ever handles
    /// an opaque encoded body (spec.md §1) and has no unencoded key to
    /// measure — that decoding belongs to the excluded codec layer. See
    /// DESIGN.md's Open Question decisions for the supplementing higher
    /// layer's options here (decode the key length itself and call
    /// `observe` through a future codec-facing accessor, or leave it at
    /// zero samples).
    pub key_length: Accumulator,
    pub value_length: Accumulator,
    pub total_latency: Accumulator,
    pub request_latency: Accumulator,
    pub response_latency: Accumulator,
}

/// Per-session operational statistics, keyed by `RpcKind`.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    by_kind: [KindStats; RPC_KIND_COUNT],
}

impl Stats {
    pub fn new() -> Stats {
        Stats {
            by_kind: [KindStats::default(); RPC_KIND_COUNT],
        }
    }

    pub fn kind(&self, kind: RpcKind) -> &KindStats {
        &self.by_kind[kind.index()]
    }

    pub fn record_ok(&mut self, kind: RpcKind, send_size: usize, receive_size: usize) {
        let entry = &mut self.by_kind[kind.index()];
        entry.ok += 1;
        if Accumulator::accepts(send_size as f64) {
            entry.send_size.observe(send_size as f64);
        }
        if Accumulator::accepts(receive_size as f64) {
            entry.receive_size.observe(receive_size as f64);
        }
    }

    pub fn record_err(&mut self, kind: RpcKind) {
        self.by_kind[kind.index()].err += 1;
    }

    /// Feed one sample into the value-length distribution for `kind`
    /// (spec.md §4.9). The core has no notion of key length — keys live
    /// inside the opaque encoded body, which only the (out-of-scope) codec
    /// can parse — so there is no matching `record_key_length`; see
    /// DESIGN.md.
    pub fn record_value_length(&mut self, kind: RpcKind, value_len: usize) {
        if Accumulator::accepts(value_len as f64) {
            self.by_kind[kind.index()].value_length.observe(value_len as f64);
        }
    }

    /// Record a dropped sample: increments `dropped` and decrements `ok`,
    /// per spec.md §4.9 ("counted in dropped, decrementing ok").
    pub fn record_dropped(&mut self, kind: RpcKind) {
        let entry = &mut self.by_kind[kind.index()];
        entry.dropped += 1;
        entry.ok = entry.ok.saturating_sub(1);
    }

    pub fn record_total_latency(&mut self, kind: RpcKind, latency: Duration) {
        if accept_latency(latency) {
            self.by_kind[kind.index()]
                .total_latency
                .observe(latency.as_secs_f64());
        } else {
            self.record_dropped(kind);
        }
    }

    pub fn record_request_latency(&mut self, kind: RpcKind, latency: Duration) {
        if accept_latency(latency) {
            self.by_kind[kind.index()]
                .request_latency
                .observe(latency.as_secs_f64());
        } else {
            self.record_dropped(kind);
        }
    }

    pub fn record_response_latency(&mut self, kind: RpcKind, latency: Duration) {
        if accept_latency(latency) {
            self.by_kind[kind.index()]
                .response_latency
                .observe(latency.as_secs_f64());
        } else {
            self.record_dropped(kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welford_matches_naive_mean_and_variance() {
        let mut acc = Accumulator::default();
        let samples = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        for s in samples {
            acc.observe(s);
        }
        let naive_mean: f64 = samples.iter().sum::<f64>() / samples.len() as f64;
        assert!((acc.mean() - naive_mean).abs() < 1e-9);

        let naive_var: f64 = samples.iter().map(|s| (s - naive_mean).powi(2)).sum::<f64>()
            / (samples.len() - 1) as f64;
        assert!((acc.variance().unwrap() - naive_var).abs() < 1e-9);
    }

    #[test]
    fn dropped_sample_decrements_ok() {
        let mut stats = Stats::new();
        stats.record_ok(RpcKind::Get, 10, 20);
        assert_eq!(stats.kind(RpcKind::Get).ok, 1);
        stats.record_total_latency(RpcKind::Get, Duration::from_secs(2));
        assert_eq!(stats.kind(RpcKind::Get).ok, 0);
        assert_eq!(stats.kind(RpcKind::Get).dropped, 1);
    }

    #[test]
    fn value_length_accumulates_across_samples() {
        let mut stats = Stats::new();
        stats.record_value_length(RpcKind::Get, 128);
        stats.record_value_length(RpcKind::Get, 256);
        assert_eq!(stats.kind(RpcKind::Get).value_length.count(), 2);
        assert!((stats.kind(RpcKind::Get).value_length.mean() - 192.0).abs() < 1e-9);
    }

    #[test]
    fn variance_undefined_below_two_samples() {
        let mut acc = Accumulator::default();
        assert!(acc.variance().is_none());
        acc.observe(1.0);
        assert!(acc.variance().is_none());
        acc.observe(2.0);
        assert!(acc.variance().is_some());
    }
}
