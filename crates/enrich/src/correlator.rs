use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct WaitEventSample {
    pub digest: Option<String>,
    pub wait_class: String,
    pub wait_time_ms: f64,
    pub captured_at: Instant,
}

#[derive(Debug, Clone)]
pub struct BlockingSample {
    pub blocker_digest: Option<String>,
    pub blocked_digest: Option<String>,
    pub duration_s: f64,
    pub captured_at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaitProfilePoint {
    pub digest: String,
    pub wait_class: String,
    pub wait_time_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockingPoint {
    pub blocker_digest: String,
    pub blocked_digest: String,
    pub duration_s: f64,
}

#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    pub window: Duration,
    pub max_buffer_size: usize,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self { window: Duration::from_secs(30), max_buffer_size: 10_000 }
    }
}

/// C6: joins wait-event and blocking-session samples against statement
/// digests as they arrive. Arrival order is not guaranteed, so a sample
/// whose digest is not yet known waits in a bounded buffer until either a
/// matching digest shows up or the window expires.
pub struct QueryCorrelator {
    config: CorrelatorConfig,
    known_digests: VecDeque<(String, Instant)>,
    pending_waits: VecDeque<WaitEventSample>,
    pending_blocking: VecDeque<BlockingSample>,
    pub buffer_overflows: AtomicU64,
}

impl QueryCorrelator {
    pub fn new(config: CorrelatorConfig) -> Self {
        Self {
            config,
            known_digests: VecDeque::new(),
            pending_waits: VecDeque::new(),
            pending_blocking: VecDeque::new(),
            buffer_overflows: AtomicU64::new(0),
        }
    }

    /// Registers a statement digest as "seen" (from a slow-query or
    /// individual-query sample), making it available to resolve any
    /// pending wait/blocking samples still inside the window.
    pub fn observe_digest(&mut self, digest: String, now: Instant) {
        self.reap_expired(now);
        self.known_digests.push_back((digest, now));
    }

    pub fn observe_wait(&mut self, sample: WaitEventSample) -> Option<WaitProfilePoint> {
        self.reap_expired(sample.captured_at);

        if let Some(digest) = sample.digest.clone() {
            return Some(WaitProfilePoint {
                digest,
                wait_class: sample.wait_class,
                wait_time_ms: sample.wait_time_ms,
            });
        }

        self.push_bounded_wait(sample);
        None
    }

    pub fn observe_blocking(&mut self, sample: BlockingSample) -> Option<BlockingPoint> {
        self.reap_expired(sample.captured_at);

        if let (Some(blocker), Some(blocked)) = (sample.blocker_digest.clone(), sample.blocked_digest.clone()) {
            return Some(BlockingPoint {
                blocker_digest: blocker,
                blocked_digest: blocked,
                duration_s: sample.duration_s,
            });
        }

        self.push_bounded_blocking(sample);
        None
    }

    /// Attempts to resolve any buffered samples against digests observed
    /// since they arrived; samples that age out of the window are dropped
    /// without emitting a point.
    pub fn drain_resolved(&mut self, now: Instant) -> (Vec<WaitProfilePoint>, Vec<BlockingPoint>) {
        self.reap_expired(now);

        let mut resolved_waits = Vec::new();
        let mut still_pending_waits = VecDeque::new();
        while let Some(sample) = self.pending_waits.pop_front() {
            if now.duration_since(sample.captured_at) > self.config.window {
                continue;
            }
            if let Some((digest, _)) = self.known_digests.back() {
                resolved_waits.push(WaitProfilePoint {
                    digest: digest.clone(),
                    wait_class: sample.wait_class.clone(),
                    wait_time_ms: sample.wait_time_ms,
                });
            } else {
                still_pending_waits.push_back(sample);
            }
        }
        self.pending_waits = still_pending_waits;

        let mut resolved_blocking = Vec::new();
        let mut still_pending_blocking = VecDeque::new();
        while let Some(sample) = self.pending_blocking.pop_front() {
            if now.duration_since(sample.captured_at) > self.config.window {
                continue;
            }
            if let Some((digest, _)) = self.known_digests.back() {
                resolved_blocking.push(BlockingPoint {
                    blocker_digest: sample.blocker_digest.clone().unwrap_or_else(|| digest.clone()),
                    blocked_digest: sample.blocked_digest.clone().unwrap_or_else(|| digest.clone()),
                    duration_s: sample.duration_s,
                });
            } else {
                still_pending_blocking.push_back(sample);
            }
        }
        self.pending_blocking = still_pending_blocking;

        (resolved_waits, resolved_blocking)
    }

    fn push_bounded_wait(&mut self, sample: WaitEventSample) {
        if self.pending_waits.len() >= self.config.max_buffer_size {
            self.pending_waits.pop_front();
            self.buffer_overflows.fetch_add(1, Ordering::Relaxed);
        }
        self.pending_waits.push_back(sample);
    }

    fn push_bounded_blocking(&mut self, sample: BlockingSample) {
        if self.pending_blocking.len() >= self.config.max_buffer_size {
            self.pending_blocking.pop_front();
            self.buffer_overflows.fetch_add(1, Ordering::Relaxed);
        }
        self.pending_blocking.push_back(sample);
    }

    fn reap_expired(&mut self, now: Instant) {
        while let Some((_, seen_at)) = self.known_digests.front() {
            if now.duration_since(*seen_at) > self.config.window {
                self.known_digests.pop_front();
            } else {
                break;
            }
        }
        while let Some(sample) = self.pending_waits.front() {
            if now.duration_since(sample.captured_at) > self.config.window {
                self.pending_waits.pop_front();
            } else {
                break;
            }
        }
        while let Some(sample) = self.pending_blocking.front() {
            if now.duration_since(sample.captured_at) > self.config.window {
                self.pending_blocking.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending_waits.len() + self.pending_blocking.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_immediately_when_digest_known() {
        let mut correlator = QueryCorrelator::new(CorrelatorConfig::default());
        let sample = WaitEventSample {
            digest: Some("d1".to_string()),
            wait_class: "IO".to_string(),
            wait_time_ms: 12.0,
            captured_at: Instant::now(),
        };
        let point = correlator.observe_wait(sample).unwrap();
        assert_eq!(point.digest, "d1");
    }

    #[test]
    fn buffers_unresolved_samples() {
        let mut correlator = QueryCorrelator::new(CorrelatorConfig::default());
        let sample = WaitEventSample {
            digest: None,
            wait_class: "IO".to_string(),
            wait_time_ms: 12.0,
            captured_at: Instant::now(),
        };
        assert!(correlator.observe_wait(sample).is_none());
        assert_eq!(correlator.pending_len(), 1);
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let mut correlator = QueryCorrelator::new(CorrelatorConfig { max_buffer_size: 2, ..Default::default() });
        for _ in 0..5 {
            correlator.observe_wait(WaitEventSample {
                digest: None,
                wait_class: "IO".to_string(),
                wait_time_ms: 1.0,
                captured_at: Instant::now(),
            });
        }
        assert!(correlator.pending_len() <= 2);
        assert!(correlator.buffer_overflows.load(Ordering::Relaxed) >= 1);
    }

    #[test]
    fn drain_resolved_emits_wait_and_blocking_once_digest_arrives() {
        let mut correlator = QueryCorrelator::new(CorrelatorConfig::default());
        let now = Instant::now();

        correlator.observe_wait(WaitEventSample {
            digest: None,
            wait_class: "IO".to_string(),
            wait_time_ms: 5.0,
            captured_at: now,
        });
        correlator.observe_blocking(BlockingSample {
            blocker_digest: None,
            blocked_digest: None,
            duration_s: 2.0,
            captured_at: now,
        });
        assert_eq!(correlator.pending_len(), 2);

        correlator.observe_digest("d1".to_string(), now);
        let (waits, blocking) = correlator.drain_resolved(now);

        assert_eq!(waits.len(), 1);
        assert_eq!(waits[0].digest, "d1");
        assert_eq!(blocking.len(), 1);
        assert_eq!(blocking[0].blocker_digest, "d1");
        assert_eq!(correlator.pending_len(), 0);
    }

    #[test]
    fn expired_samples_are_dropped_not_emitted() {
        let mut correlator = QueryCorrelator::new(CorrelatorConfig { window: Duration::from_millis(1), max_buffer_size: 10 });
        correlator.observe_wait(WaitEventSample {
            digest: None,
            wait_class: "IO".to_string(),
            wait_time_ms: 1.0,
            captured_at: Instant::now(),
        });
        std::thread::sleep(Duration::from_millis(5));
        let (waits, _) = correlator.drain_resolved(Instant::now());
        assert!(waits.is_empty());
        assert_eq!(correlator.pending_len(), 0);
    }
}
