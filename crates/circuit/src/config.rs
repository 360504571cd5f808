use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub max_consecutive_failures: u32,
    pub failure_threshold_percent: f64,
    pub min_window_samples: usize,
    pub window_size: usize,
    pub latency_p95_ceiling: Duration,
    pub recovery_timeout: Duration,
    pub max_recovery_timeout: Duration,
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            failure_threshold_percent: 50.0,
            min_window_samples: 20,
            window_size: 100,
            latency_p95_ceiling: Duration::from_secs(5),
            recovery_timeout: Duration::from_secs(60),
            max_recovery_timeout: Duration::from_secs(15 * 60),
            half_open_success_threshold: 3,
        }
    }
}
