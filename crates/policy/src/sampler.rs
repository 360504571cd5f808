use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use telemetry_core::{MetricPoint, SampleCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Keep,
    Drop,
}

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub category_rates: HashMap<SampleCategory, f64>,
    pub global_rate_limit_per_sec: f64,
    pub slow_threshold_ms: f64,
    pub blocking_threshold_s: f64,
    pub critical_floor: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        let mut category_rates = HashMap::new();
        category_rates.insert(SampleCategory::SlowQuery, 1.0);
        category_rates.insert(SampleCategory::RegularQuery, 0.1);
        category_rates.insert(SampleCategory::PlanChange, 1.0);
        category_rates.insert(SampleCategory::Blocking, 1.0);
        category_rates.insert(SampleCategory::Health, 1.0);
        category_rates.insert(SampleCategory::Infra, 0.5);

        Self {
            category_rates,
            global_rate_limit_per_sec: 1000.0,
            slow_threshold_ms: 500.0,
            blocking_threshold_s: 1.0,
            critical_floor: 0.1,
        }
    }
}

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(refill_per_sec: f64) -> Self {
        Self { tokens: refill_per_sec, capacity: refill_per_sec, refill_per_sec, last_refill: Instant::now() }
    }

    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// C7: `decide(point) -> {keep, drop}`. Stateless with respect to any
/// individual point — the same point is never re-evaluated — but the
/// global token bucket and the pressure multiplier from C8 carry state
/// across calls.
pub struct AdaptiveSampler {
    config: SamplerConfig,
    bucket: Mutex<TokenBucket>,
}

impl AdaptiveSampler {
    pub fn new(config: SamplerConfig) -> Self {
        let bucket = TokenBucket::new(config.global_rate_limit_per_sec);
        Self { config, bucket: Mutex::new(bucket) }
    }

    /// `pressure` comes from [`crate::CostController::pressure`]; at 1.0
    /// analytical categories collapse to zero while critical categories
    /// never drop below `critical_floor`.
    pub fn decide(&self, point: &MetricPoint, pressure: f64) -> Decision {
        if self.always_keep(point) {
            return Decision::Keep;
        }

        let category = point.category();
        let base_rate = *self.config.category_rates.get(&category).unwrap_or(&1.0);
        let effective_rate = self.apply_pressure(category, base_rate, pressure);

        if !self.bucket.lock().unwrap().try_take() {
            return Decision::Drop;
        }

        if effective_rate >= 1.0 {
            Decision::Keep
        } else if effective_rate <= 0.0 {
            Decision::Drop
        } else {
            let digest = deterministic_unit_interval(point);
            if digest < effective_rate {
                Decision::Keep
            } else {
                Decision::Drop
            }
        }
    }

    fn always_keep(&self, point: &MetricPoint) -> bool {
        if point.attributes.contains_key("plan.changed") {
            return true;
        }
        if let Some(duration) = point.attributes.get("duration_ms").and_then(|v| v.parse::<f64>().ok()) {
            if duration > self.config.slow_threshold_ms {
                return true;
            }
        }
        if let Some(duration) = point.attributes.get("blocking.duration_s").and_then(|v| v.parse::<f64>().ok()) {
            if duration > self.config.blocking_threshold_s {
                return true;
            }
        }
        false
    }

    fn apply_pressure(&self, category: SampleCategory, base_rate: f64, pressure: f64) -> f64 {
        let floor = if matches!(category, SampleCategory::Blocking | SampleCategory::Health) {
            self.config.critical_floor
        } else {
            0.0
        };
        let scaled = base_rate * (1.0 - pressure);
        scaled.max(floor).min(base_rate)
    }
}

/// A deterministic pseudo-random value in `[0, 1)` derived from the
/// point's own content, so repeated evaluation of the same point (which
/// should never happen, but costs nothing to make safe) is idempotent.
fn deterministic_unit_interval(point: &MetricPoint) -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    point.name.hash(&mut hasher);
    point.timestamp.hash(&mut hasher);
    for (k, v) in point.attributes.iter() {
        k.hash(&mut hasher);
        v.hash(&mut hasher);
    }
    (hasher.finish() % 1_000_000) as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use telemetry_core::{DatabaseKind, MetricValue, ResourceAttributes};

    use super::*;

    fn point(name: &str, attrs: &[(&str, &str)]) -> MetricPoint {
        MetricPoint {
            name: name.to_string(),
            value: MetricValue::GaugeDouble(1.0),
            timestamp: Utc::now(),
            resource: ResourceAttributes {
                db_system: DatabaseKind::Postgresql,
                db_name: "db".to_string(),
                instance_endpoint: "localhost".to_string(),
                deployment_environment: "test".to_string(),
                host: "h".to_string(),
            },
            attributes: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn always_keeps_slow_queries() {
        let sampler = AdaptiveSampler::new(SamplerConfig::default());
        let p = point("query.duration", &[("duration_ms", "5000")]);
        assert_eq!(sampler.decide(&p, 0.0), Decision::Keep);
    }

    #[test]
    fn always_keeps_plan_changes_regardless_of_pressure() {
        let sampler = AdaptiveSampler::new(SamplerConfig::default());
        let p = point("query.plan.changed", &[("plan.changed", "true")]);
        assert_eq!(sampler.decide(&p, 1.0), Decision::Keep);
    }

    #[test]
    fn always_keeps_long_blocking_events() {
        let sampler = AdaptiveSampler::new(SamplerConfig::default());
        let p = point("query.blocking", &[("blocking.duration_s", "2.0")]);
        assert_eq!(sampler.decide(&p, 0.9), Decision::Keep);
    }

    #[test]
    fn analytical_collapses_under_full_pressure() {
        let mut config = SamplerConfig::default();
        config.category_rates.insert(SampleCategory::RegularQuery, 0.2);
        let sampler = AdaptiveSampler::new(config);
        let p = point("query.regular", &[]);
        assert_eq!(sampler.decide(&p, 1.0), Decision::Drop);
    }
}
