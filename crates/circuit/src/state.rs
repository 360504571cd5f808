use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Outcome of one admitted call, reported back to the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Timeout,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitPhase {
    Closed,
    HalfOpen,
    Open,
}

struct Sample {
    outcome: Outcome,
    latency: Duration,
}

/// Per-database state. Owned exclusively by [`crate::CircuitBreaker`] —
/// nothing outside this crate ever sees a `&mut` to it.
pub struct CircuitState {
    phase: CircuitPhase,
    consecutive_failures: u32,
    consecutive_successes: u32,
    window: VecDeque<Sample>,
    window_size: usize,
    last_transition: Instant,
    next_probe_deadline: Instant,
    current_recovery_timeout: Duration,
    probe_in_flight: bool,
    pub opens: u64,
    pub half_opens: u64,
    pub closes: u64,
}

impl CircuitState {
    pub fn new(window_size: usize, recovery_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            phase: CircuitPhase::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            window: VecDeque::with_capacity(window_size),
            window_size,
            last_transition: now,
            next_probe_deadline: now,
            current_recovery_timeout: recovery_timeout,
            probe_in_flight: false,
            opens: 0,
            half_opens: 0,
            closes: 0,
        }
    }

    pub fn phase(&self) -> CircuitPhase {
        self.phase
    }

    /// Whether a non-probe call may proceed right now, given `now`. Moves
    /// `open` → eligible-for-probe bookkeeping but the phase transition to
    /// `half-open` only happens once a probe actually succeeds (§4.4).
    pub fn admit(&mut self, now: Instant) -> bool {
        match self.phase {
            CircuitPhase::Closed => true,
            CircuitPhase::HalfOpen => true,
            CircuitPhase::Open => {
                if !self.probe_in_flight && now >= self.next_probe_deadline {
                    self.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn report(&mut self, outcome: Outcome, latency: Duration, now: Instant, cfg: &super::config::CircuitBreakerConfig) {
        self.probe_in_flight = false;
        self.push_sample(outcome, latency);

        match self.phase {
            CircuitPhase::Closed => self.report_closed(outcome, now, cfg),
            CircuitPhase::HalfOpen => self.report_half_open(outcome, now, cfg),
            CircuitPhase::Open => {
                if outcome == Outcome::Success {
                    self.transition_half_open(now);
                } else {
                    self.schedule_next_probe(now);
                }
            }
        }
    }

    fn push_sample(&mut self, outcome: Outcome, latency: Duration) {
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(Sample { outcome, latency });
    }

    fn report_closed(&mut self, outcome: Outcome, now: Instant, cfg: &super::config::CircuitBreakerConfig) {
        match outcome {
            Outcome::Success => {
                self.consecutive_failures = 0;
            }
            Outcome::Timeout | Outcome::Error => {
                self.consecutive_failures += 1;
            }
        }

        if self.consecutive_failures >= cfg.max_consecutive_failures {
            self.transition_open(now, cfg.recovery_timeout);
            return;
        }

        if self.window.len() >= cfg.min_window_samples {
            let failures = self.window.iter().filter(|s| s.outcome != Outcome::Success).count();
            let failure_pct = failures as f64 / self.window.len() as f64 * 100.0;
            if failure_pct >= cfg.failure_threshold_percent {
                self.transition_open(now, cfg.recovery_timeout);
                return;
            }
        }

        if let Some(p95) = self.latency_p95() {
            if p95 > cfg.latency_p95_ceiling {
                self.transition_open(now, cfg.recovery_timeout);
            }
        }
    }

    fn report_half_open(&mut self, outcome: Outcome, now: Instant, cfg: &super::config::CircuitBreakerConfig) {
        match outcome {
            Outcome::Success => {
                self.consecutive_successes += 1;
                if self.consecutive_successes >= cfg.half_open_success_threshold {
                    self.transition_closed();
                }
            }
            Outcome::Timeout | Outcome::Error => {
                let backoff = (self.current_recovery_timeout * 2).min(cfg.max_recovery_timeout);
                self.current_recovery_timeout = backoff;
                self.transition_open(now, backoff);
            }
        }
    }

    fn transition_open(&mut self, now: Instant, recovery_timeout: Duration) {
        self.phase = CircuitPhase::Open;
        self.last_transition = now;
        self.next_probe_deadline = now + recovery_timeout;
        self.current_recovery_timeout = recovery_timeout;
        self.consecutive_successes = 0;
        self.probe_in_flight = false;
        self.opens += 1;
    }

    fn transition_half_open(&mut self, now: Instant) {
        self.phase = CircuitPhase::HalfOpen;
        self.last_transition = now;
        self.consecutive_successes = 0;
        self.half_opens += 1;
    }

    fn transition_closed(&mut self) {
        self.phase = CircuitPhase::Closed;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.window.clear();
        self.closes += 1;
    }

    fn schedule_next_probe(&mut self, now: Instant) {
        self.next_probe_deadline = now + self.current_recovery_timeout;
    }

    fn latency_p95(&self) -> Option<Duration> {
        if self.window.is_empty() {
            return None;
        }
        let mut latencies: Vec<Duration> = self.window.iter().map(|s| s.latency).collect();
        latencies.sort();
        let idx = ((latencies.len() as f64) * 0.95).ceil() as usize;
        let idx = idx.saturating_sub(1).min(latencies.len() - 1);
        Some(latencies[idx])
    }
}
