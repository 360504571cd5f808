use std::sync::Mutex;
use std::time::{Duration, Instant};

use telemetry_core::MetricPoint;

#[derive(Debug, Clone)]
pub struct CostControllerConfig {
    pub budget_per_minute_bytes: u64,
    pub enforcement: Enforcement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enforcement {
    Advisory,
    Enforce,
}

impl Default for CostControllerConfig {
    fn default() -> Self {
        Self { budget_per_minute_bytes: 10 * 1024 * 1024, enforcement: Enforcement::Enforce }
    }
}

/// Process-wide ledger (§3 `BudgetLedger`). Mutated only through
/// [`CostController::admit`]; read access for the pressure feedback value
/// is the only thing exposed outside this module.
struct BudgetLedger {
    minute_start: Instant,
    minute_bytes: u64,
    daily_total: u64,
    monthly_total: u64,
    pressure: f64,
}

impl BudgetLedger {
    fn new(now: Instant) -> Self {
        Self { minute_start: now, minute_bytes: 0, daily_total: 0, monthly_total: 0, pressure: 0.0 }
    }
}

/// C8: tracks estimated outbound data volume against a budget and exposes
/// a pressure value in `[0, 1]` that C7 uses to scale down sampling.
pub struct CostController {
    config: CostControllerConfig,
    ledger: Mutex<BudgetLedger>,
}

impl CostController {
    pub fn new(config: CostControllerConfig) -> Self {
        Self { config, ledger: Mutex::new(BudgetLedger::new(Instant::now())) }
    }

    /// Estimated serialised size: a linear function of name length plus
    /// the sum of attribute key+value lengths (§4.8).
    pub fn estimate_size(point: &MetricPoint) -> u64 {
        let mut size = point.name.len();
        for (k, v) in point.attributes.iter() {
            size += k.len() + v.len();
        }
        size as u64
    }

    /// Accumulates `point`'s estimated size into the current minute bucket
    /// and returns the refreshed pressure value.
    pub fn admit(&self, point: &MetricPoint) -> f64 {
        let size = Self::estimate_size(point);
        let now = Instant::now();
        let mut ledger = self.ledger.lock().unwrap();

        if now.duration_since(ledger.minute_start) >= Duration::from_secs(60) {
            ledger.minute_start = now;
            ledger.minute_bytes = 0;
        }

        ledger.minute_bytes += size;
        ledger.daily_total += size;
        ledger.monthly_total += size;
        ledger.pressure = (ledger.minute_bytes as f64 / self.config.budget_per_minute_bytes as f64).min(1.0);
        ledger.pressure
    }

    pub fn pressure(&self) -> f64 {
        if matches!(self.config.enforcement, Enforcement::Advisory) {
            return 0.0;
        }
        self.ledger.lock().unwrap().pressure
    }

    pub fn minute_bytes(&self) -> u64 {
        self.ledger.lock().unwrap().minute_bytes
    }
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
    fn pressure_rises_with_accumulated_bytes() {
        let controller = CostController::new(CostControllerConfig { budget_per_minute_bytes: 100, ..Default::default() });
        let p = point("a", &[("k", "v".repeat(40).as_str())]);
        let pressure = controller.admit(&p);
        assert!(pressure > 0.0);
    }

    #[test]
    fn pressure_caps_at_one() {
        let controller = CostController::new(CostControllerConfig { budget_per_minute_bytes: 10, ..Default::default() });
        let p = point("a", &[("k", &"v".repeat(1000))]);
        let pressure = controller.admit(&p);
        assert_eq!(pressure, 1.0);
    }

    #[test]
    fn advisory_mode_reports_zero_pressure() {
        let controller = CostController::new(CostControllerConfig {
            budget_per_minute_bytes: 10,
            enforcement: Enforcement::Advisory,
        });
        let p = point("a", &[("k", &"v".repeat(1000))]);
        controller.admit(&p);
        assert_eq!(controller.pressure(), 0.0);
    }
}
