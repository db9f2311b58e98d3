//! Per-peer reputation metrics and the six-subscore rating function, spec
//! §3 (`PeerMetrics`) and §4.5.1.
//!
//! Grounded in the bounded-history peer-reputation shape of
//! `mimblewimble-grin`'s/`mwcproject-snape479-mwc-node`'s `p2p/src/peers.rs`
//! (a per-address record updated by connect/disconnect events and consulted
//! for peer selection), generalized to this spec's named subscores since
//! neither tracks a continuous rating.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use headers_common::TimestampMs;

/// Capacity of every bounded deque `PeerMetrics` carries.
const HISTORY_CAP: usize = 10;

/// A floor under every subscore so the geometric combination below never
/// multiplies by exactly zero.
const EPSILON: f64 = 0.01;

const MS_PER_DAY: f64 = 86_400_000.0;
const MS_PER_HOUR: f64 = 3_600_000.0;

/// The current wall-clock time in milliseconds since the epoch.
pub fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as TimestampMs)
        .unwrap_or(0)
}

/// One observed ping round-trip, timestamped for recency weighting.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PingSample {
    /// Round-trip time in milliseconds.
    pub duration_ms: i64,
    /// When the ping was observed.
    pub timestamp_ms: TimestampMs,
}

/// Persisted, per-address behavioral history. Every handler named in spec
/// §4.5.2 is a method here; all of them bump `last_seen_ms` (open question
/// §9: the source advances "seen" on every metric touch, which this
/// preserves) and are meant to be followed by a store write.
#[derive(Clone, Debug, Default)]
pub struct PeerMetrics {
    /// Most recent moment this peer was observed in any capacity.
    pub last_seen_ms: Option<TimestampMs>,
    /// Last 10 ping round-trips, most recent last.
    pub recent_pings: VecDeque<PingSample>,
    /// Last 10 timestamps of disconnects that happened before this session
    /// ever reached `Ready`.
    pub unintentional_disconnects_before_connect_ms: VecDeque<TimestampMs>,
    /// Last 10 timestamps of disconnects that happened at or after `Ready`.
    pub unintentional_disconnects_after_connect_ms: VecDeque<TimestampMs>,
    /// Last successful TCP connect.
    pub last_connect_ms: Option<TimestampMs>,
    /// Last successful full verify (connect + ping + onValidChain + sync).
    pub last_connect_and_test_ms: Option<TimestampMs>,
    /// Last time any payload was received from this peer.
    pub last_data_received_ms: Option<TimestampMs>,
    /// Last time this peer was observed significantly behind the chain.
    pub last_out_of_sync_ms: Option<TimestampMs>,
    /// Last time this peer served a descendant of a known-invalid hash.
    pub last_invalid_chain_ms: Option<TimestampMs>,
}

fn push_bounded<T>(deque: &mut VecDeque<T>, value: T) {
    deque.push_back(value);
    while deque.len() > HISTORY_CAP {
        deque.pop_front();
    }
}

impl PeerMetrics {
    fn touch_seen(&mut self, now: TimestampMs) {
        self.last_seen_ms = Some(self.last_seen_ms.map_or(now, |t| t.max(now)));
    }

    /// `addSeen`: an unambiguous liveness signal with no other metric
    /// attached.
    pub fn add_seen(&mut self, now: TimestampMs) {
        self.touch_seen(now);
    }

    /// `addPing`.
    pub fn add_ping(&mut self, duration_ms: i64, now: TimestampMs) {
        push_bounded(&mut self.recent_pings, PingSample { duration_ms, timestamp_ms: now });
        self.touch_seen(now);
    }

    /// `addLastConnect`.
    pub fn add_last_connect(&mut self, now: TimestampMs) {
        self.last_connect_ms = Some(now);
        self.touch_seen(now);
    }

    /// `addLastConnectAndTest`.
    pub fn add_last_connect_and_test(&mut self, now: TimestampMs) {
        self.last_connect_and_test_ms = Some(now);
        self.touch_seen(now);
    }

    /// `addDataReceived`.
    pub fn add_data_received(&mut self, now: TimestampMs) {
        self.last_data_received_ms = Some(now);
        self.touch_seen(now);
    }

    /// `addOutOfSync`.
    pub fn add_out_of_sync(&mut self, now: TimestampMs) {
        self.last_out_of_sync_ms = Some(now);
        self.touch_seen(now);
    }

    /// `addInvalidChain`.
    pub fn add_invalid_chain(&mut self, now: TimestampMs) {
        self.last_invalid_chain_ms = Some(now);
        self.touch_seen(now);
    }

    /// `addUnintentionalDisconnect`: routed to the after-connect history
    /// when it falls within 4 weeks of the most recent connect or ping,
    /// otherwise to the before-connect history.
    pub fn add_unintentional_disconnect(&mut self, now: TimestampMs, reached_ready: bool) {
        const FOUR_WEEKS_MS: i64 = 28 * 86_400_000;
        let recent_activity = self
            .last_connect_ms
            .into_iter()
            .chain(self.recent_pings.back().map(|p| p.timestamp_ms))
            .max();
        let within_four_weeks = recent_activity.map(|t| now - t <= FOUR_WEEKS_MS).unwrap_or(false);

        if reached_ready || within_four_weeks {
            push_bounded(&mut self.unintentional_disconnects_after_connect_ms, now);
        } else {
            push_bounded(&mut self.unintentional_disconnects_before_connect_ms, now);
        }
        self.touch_seen(now);
    }

    /// The weighted geometric-mean rating in `(0, 1]`, spec §4.5.1. Each
    /// subscore is clamped to `[EPSILON, 1]` and combined as
    /// `exp(Σ wᵢ·ln(scoreᵢ) / Σ wᵢ)` — a normalized weighted geometric mean,
    /// so the result stays in range regardless of how the six weights are
    /// tuned (see DESIGN.md for why a plain unnormalized product was
    /// rejected).
    pub fn rating(&self, now: TimestampMs) -> f64 {
        let subscores = [
            (self.ping_subscore(now), 0.60),
            (self.disconnect_before_connect_subscore(now), 0.30),
            (self.disconnect_after_connect_subscore(now), 0.30),
            (self.out_of_sync_subscore(now), 0.38),
            (self.invalid_chain_subscore(now), 0.50),
            (self.connect_recency_subscore(now), 0.20),
        ];

        let weight_sum: f64 = subscores.iter().map(|(_, w)| w).sum();
        let weighted_log_sum: f64 = subscores
            .iter()
            .map(|(score, w)| w * score.max(EPSILON).ln())
            .sum();
        (weighted_log_sum / weight_sum).exp()
    }

    fn ping_subscore(&self, now: TimestampMs) -> f64 {
        if self.recent_pings.is_empty() {
            return 0.25;
        }
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for sample in &self.recent_pings {
            let age_days = (now - sample.timestamp_ms).max(0) as f64 / MS_PER_DAY;
            let weight = (-age_days / 7.0).exp();
            let score = (1.0 / (1.0 + (0.0022 * (sample.duration_ms as f64 - 2000.0)).exp())).max(0.1);
            weighted_sum += weight * score;
            weight_total += weight;
        }
        if weight_total == 0.0 {
            0.25
        } else {
            weighted_sum / weight_total
        }
    }

    fn disconnect_before_connect_subscore(&self, now: TimestampMs) -> f64 {
        let Some(&last) = self.unintentional_disconnects_before_connect_ms.back() else {
            return 1.0;
        };
        let mut age_days = (now - last).max(0) as f64 / MS_PER_DAY;
        if let Some(seen) = self.last_seen_ms {
            if last < seen {
                age_days += 10.0;
            }
        }
        sigmoid(age_days, 0.4, 22.0)
    }

    fn disconnect_after_connect_subscore(&self, now: TimestampMs) -> f64 {
        let events = &self.unintentional_disconnects_after_connect_ms;
        if events.is_empty() {
            return 1.0;
        }
        let max_score = events
            .iter()
            .map(|&t_i| {
                let recency = (-((now - t_i).max(0) as f64) / (7.0 * MS_PER_DAY)).exp();
                let amplification: f64 = events
                    .iter()
                    .map(|&t_j| (-(t_i - t_j).abs() as f64 / (4.0 * MS_PER_HOUR)).exp())
                    .sum();
                recency * amplification
            })
            .fold(0.0_f64, f64::max);
        1.0 / (1.0 + 0.5 * (2.7 * max_score).powi(5))
    }

    fn out_of_sync_subscore(&self, now: TimestampMs) -> f64 {
        match self.last_out_of_sync_ms {
            None => 1.0,
            Some(t) => sigmoid((now - t).max(0) as f64 / MS_PER_DAY, 0.98, 3.0),
        }
    }

    fn invalid_chain_subscore(&self, now: TimestampMs) -> f64 {
        match self.last_invalid_chain_ms {
            None => 1.0,
            Some(t) => sigmoid((now - t).max(0) as f64 / MS_PER_DAY, 0.049, 70.0),
        }
    }

    fn connect_recency_subscore(&self, now: TimestampMs) -> f64 {
        let latest = [self.last_connect_ms, self.last_connect_and_test_ms, self.last_data_received_ms]
            .into_iter()
            .flatten()
            .max();
        let Some(latest) = latest else {
            return 0.5;
        };
        let age_days = (now - latest).max(0) as f64 / MS_PER_DAY;
        let raw = sigmoid(age_days, 0.25, 30.0);
        0.8 + 0.2 * raw
    }
}

/// A logistic curve increasing in `x`: `1 / (1 + e^(-k·(x - midpoint)))`.
/// Used throughout the rating subscores as "the longer since a bad event,
/// the closer this gets to 1".
fn sigmoid(x: f64, steepness: f64, midpoint: f64) -> f64 {
    1.0 / (1.0 + (-steepness * (x - midpoint)).exp())
}

/// Evaluate the rating function against the canonical borderline profiles
/// of spec §4.5.1 and return the maximum — the blacklist threshold. Cached
/// once at startup by the pool.
pub fn compute_blacklist_threshold() -> f64 {
    let now = 0i64; // profiles are expressed as ages relative to "now"; an
                    // absolute epoch of 0 keeps every `now - t` below exact
                    // and the arithmetic symmetric regardless of wall clock.
    let day = 86_400_000i64;

    let mut profiles = Vec::new();

    // 1. Three disconnects after connecting in the last 24h, otherwise a
    //    good ping history.
    let mut good_ping_recent_after_disconnects = PeerMetrics::default();
    good_ping_recent_after_disconnects.add_ping(150, now - 2 * 3_600_000);
    good_ping_recent_after_disconnects.add_last_connect(now - 2 * 3_600_000);
    for h in [2, 10, 20] {
        good_ping_recent_after_disconnects
            .add_unintentional_disconnect(now - h * 3_600_000, true);
    }
    profiles.push(good_ping_recent_after_disconnects);

    // 2. Out of sync 2 days ago, otherwise clean.
    let mut out_of_sync_recent = PeerMetrics::default();
    out_of_sync_recent.add_ping(200, now - day);
    out_of_sync_recent.add_out_of_sync(now - 2 * day);
    profiles.push(out_of_sync_recent);

    // 3. Invalid chain detected 60 days ago, otherwise clean.
    let mut invalid_chain_old = PeerMetrics::default();
    invalid_chain_old.add_ping(200, now - day);
    invalid_chain_old.add_invalid_chain(now - 60 * day);
    profiles.push(invalid_chain_old);

    // 4. Unintentional disconnect before ever connecting, 10 days ago.
    let mut before_connect_recent = PeerMetrics::default();
    before_connect_recent.add_unintentional_disconnect(now - 10 * day, false);
    profiles.push(before_connect_recent);

    // 5. Never connected at all — the neutral baseline.
    profiles.push(PeerMetrics::default());

    profiles
        .iter()
        .map(|p| p.rating(now))
        .fold(f64::MIN, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metrics_rate_at_the_neutral_baseline() {
        let metrics = PeerMetrics::default();
        let rating = metrics.rating(0);
        assert!(rating > 0.0 && rating <= 1.0);
    }

    #[test]
    fn recent_mass_disconnect_crashes_the_after_connect_subscore() {
        let mut metrics = PeerMetrics::default();
        let now = 10 * 86_400_000i64;
        for h in [0, 1, 2, 3, 4] {
            metrics.add_unintentional_disconnect(now - h * 3_600_000, true);
        }
        assert!(metrics.disconnect_after_connect_subscore(now) < 0.3);
    }

    #[test]
    fn old_invalid_chain_event_recovers_toward_one() {
        let mut metrics = PeerMetrics::default();
        metrics.add_invalid_chain(0);
        let far_future = 400 * 86_400_000i64;
        assert!(metrics.invalid_chain_subscore(far_future) > 0.9);
    }

    #[test]
    fn good_ping_history_rates_above_default() {
        let mut metrics = PeerMetrics::default();
        let now = 1_000_000i64;
        for _ in 0..5 {
            metrics.add_ping(50, now);
        }
        assert!(metrics.ping_subscore(now) > 0.9);
    }

    #[test]
    fn blacklist_threshold_is_strictly_below_a_perfectly_clean_rating() {
        let threshold = compute_blacklist_threshold();
        let clean = PeerMetrics::default().rating(0);
        assert!(threshold <= clean);
    }
}
