use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, SystemTime};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Inter-arrival times are rounded to this step so the attribute keeps a
/// small domain.
pub const QUANTUM: Duration = Duration::from_millis(100);

const NUM_SHARDS: usize = 64;

/// `address:port` identity of a flow. IPv6 addresses are bracketed.
pub fn flow_key(source: IpAddr, port: u16) -> String {
    SocketAddr::new(source, port).to_string()
}

/// Rounds to the nearest [`QUANTUM`]; halfway rounds up.
pub fn quantize(elapsed: Duration) -> Duration {
    let step = QUANTUM.as_nanos();
    let nanos = elapsed.as_nanos();
    let rem = nanos % step;
    let rounded = if rem * 2 < step {
        nanos - rem
    } else {
        nanos + (step - rem)
    };
    Duration::from_nanos(u64::try_from(rounded).unwrap_or(u64::MAX))
}

/// Renders a duration the way training files store it: `0s`, `300ms`,
/// `1.2s`, `1m5.3s`, `2h0m0s`.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    match nanos {
        0 => "0s".to_string(),
        1..=999 => format!("{nanos}ns"),
        1_000..=999_999 => format!("{}µs", decimal(nanos, 1_000)),
        1_000_000..=999_999_999 => format!("{}ms", decimal(nanos, 1_000_000)),
        _ => {
            let secs = d.as_secs();
            let (hours, minutes) = (secs / 3600, secs / 60 % 60);
            let seconds = decimal(
                u128::from(secs % 60) * 1_000_000_000 + u128::from(d.subsec_nanos()),
                1_000_000_000,
            );
            if hours > 0 {
                format!("{hours}h{minutes}m{seconds}s")
            } else if minutes > 0 {
                format!("{minutes}m{seconds}s")
            } else {
                format!("{seconds}s")
            }
        }
    }
}

fn decimal(value: u128, unit: u128) -> String {
    let (whole, frac) = (value / unit, value % unit);
    if frac == 0 {
        return whole.to_string();
    }
    let width = unit.ilog10() as usize;
    let digits = format!("{frac:0width$}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

/// Last-seen time per flow.
///
/// Backed by a sharded map: calls for different flows may interleave, calls
/// for one flow serialize on its shard. The pipeline must feed each flow in
/// arrival order.
pub struct FlowTracker {
    last_seen: DashMap<String, SystemTime>,
    max_flows: Option<usize>,
}

impl Default for FlowTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowTracker {
    /// Unbounded tracker; flows are never forgotten.
    pub fn new() -> Self {
        FlowTracker {
            last_seen: DashMap::with_shard_amount(NUM_SHARDS),
            max_flows: None,
        }
    }

    /// Tracker that forgets the least recently seen flow once more than
    /// `max_flows` are held.
    pub fn with_capacity_limit(max_flows: usize) -> Self {
        FlowTracker {
            last_seen: DashMap::with_capacity_and_shard_amount(max_flows.min(1 << 16), NUM_SHARDS),
            max_flows: Some(max_flows.max(1)),
        }
    }

    /// Quantized time since `key` was last seen; zero for a new flow or a
    /// clock that went backwards. Does not record `now`.
    pub fn elapsed(&self, key: &str, now: SystemTime) -> Duration {
        self.last_seen
            .get(key)
            .map(|seen| quantize(now.duration_since(*seen).unwrap_or_default()))
            .unwrap_or_default()
    }

    pub fn touch(&self, key: &str, now: SystemTime) {
        self.last_seen.insert(key.to_owned(), now);
        self.enforce_limit();
    }

    /// [`elapsed`](Self::elapsed) followed by [`touch`](Self::touch) under one
    /// shard lock.
    pub fn inter_arrival(&self, key: &str, now: SystemTime) -> Duration {
        let elapsed = match self.last_seen.entry(key.to_owned()) {
            Entry::Occupied(mut seen) => {
                let elapsed = quantize(now.duration_since(*seen.get()).unwrap_or_default());
                seen.insert(now);
                elapsed
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                Duration::ZERO
            }
        };
        self.enforce_limit();
        elapsed
    }

    pub fn last_seen(&self, key: &str) -> Option<SystemTime> {
        self.last_seen.get(key).map(|seen| *seen)
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }

    // Linear scan; only runs when a limit is configured and exceeded.
    fn enforce_limit(&self) {
        let Some(limit) = self.max_flows else {
            return;
        };
        while self.last_seen.len() > limit {
            let oldest = self
                .last_seen
                .iter()
                .min_by_key(|entry| *entry.value())
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.last_seen.remove(&key);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn at(millis: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_millis(millis)
    }

    #[test]
    fn test_inter_arrival_first_then_rounded() {
        let tracker = FlowTracker::new();
        assert_eq!(tracker.inter_arrival("10.0.0.1:5353", at(1_000)), Duration::ZERO);
        assert_eq!(
            tracker.inter_arrival("10.0.0.1:5353", at(2_230)),
            Duration::from_millis(1_200)
        );
        assert_eq!(tracker.last_seen("10.0.0.1:5353"), Some(at(2_230)));
    }

    #[test]
    fn test_flows_are_independent() {
        let tracker = FlowTracker::new();
        tracker.inter_arrival("a:1", at(0));
        tracker.inter_arrival("b:1", at(500));
        assert_eq!(tracker.inter_arrival("a:1", at(700)), Duration::from_millis(700));
        assert_eq!(tracker.inter_arrival("b:1", at(700)), Duration::from_millis(200));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_elapsed_does_not_record() {
        let tracker = FlowTracker::new();
        assert_eq!(tracker.elapsed("a:1", at(100)), Duration::ZERO);
        assert!(tracker.is_empty());
        tracker.touch("a:1", at(100));
        assert_eq!(tracker.elapsed("a:1", at(460)), Duration::from_millis(400));
        assert_eq!(tracker.last_seen("a:1"), Some(at(100)));
    }

    #[test]
    fn test_clock_going_backwards_is_zero() {
        let tracker = FlowTracker::new();
        tracker.touch("a:1", at(5_000));
        assert_eq!(tracker.inter_arrival("a:1", at(4_000)), Duration::ZERO);
    }

    #[test]
    fn test_quantize_rounding() {
        assert_eq!(quantize(Duration::from_millis(1_230)), Duration::from_millis(1_200));
        assert_eq!(quantize(Duration::from_millis(1_250)), Duration::from_millis(1_300));
        assert_eq!(quantize(Duration::from_millis(49)), Duration::ZERO);
        assert_eq!(quantize(Duration::from_millis(50)), Duration::from_millis(100));
        assert_eq!(quantize(Duration::from_millis(300)), Duration::from_millis(300));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_millis(300)), "300ms");
        assert_eq!(format_duration(Duration::from_millis(1_200)), "1.2s");
        assert_eq!(format_duration(Duration::from_secs(2)), "2s");
        assert_eq!(format_duration(Duration::from_millis(65_300)), "1m5.3s");
        assert_eq!(format_duration(Duration::from_secs(3_600)), "1h0m0s");
        assert_eq!(format_duration(Duration::from_micros(1_500)), "1.5ms");
        assert_eq!(format_duration(Duration::from_nanos(1_500)), "1.5µs");
        assert_eq!(format_duration(Duration::from_nanos(7)), "7ns");
    }

    #[test]
    fn test_capacity_limit_evicts_oldest() {
        let tracker = FlowTracker::with_capacity_limit(2);
        tracker.touch("a:1", at(0));
        tracker.touch("b:1", at(100));
        tracker.touch("a:1", at(200));
        tracker.touch("c:1", at(300));
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.last_seen("b:1"), None);
        assert_eq!(tracker.last_seen("a:1"), Some(at(200)));
        assert_eq!(tracker.elapsed("b:1", at(400)), Duration::ZERO);
    }

    #[test]
    fn test_flow_key_format() {
        assert_eq!(flow_key(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 7)), 53), "192.168.1.7:53");
        assert_eq!(flow_key("::1".parse().unwrap(), 5353), "[::1]:5353");
    }
}
