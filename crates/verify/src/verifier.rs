use telemetry_core::MetricPoint;
use tracing::debug;

use crate::cardinality::CardinalityGuard;
use crate::redact::Redactor;

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub pii_patterns: Vec<String>,
    pub max_cardinality: usize,
    pub max_field_length: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self { pii_patterns: Vec::new(), max_cardinality: 10_000, max_field_length: 1024 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    MissingRequiredAttribute,
}

/// C9, last stage before handoff. Runs redaction, the required-attribute
/// check, the cardinality guard, and the length clamp, in that order —
/// redaction must happen before cardinality tracking ever sees a raw
/// value.
pub struct Verifier {
    redactor: Redactor,
    cardinality: CardinalityGuard,
    max_field_length: usize,
}

impl Verifier {
    pub fn new(config: VerifierConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            redactor: Redactor::new(&config.pii_patterns)?,
            cardinality: CardinalityGuard::new(config.max_cardinality),
            max_field_length: config.max_field_length,
        })
    }

    /// Returns `Ok(point)` with attributes redacted, cardinality-guarded,
    /// and length-clamped, or `Err(reason)` if the point must be dropped.
    pub fn verify(&self, mut point: MetricPoint) -> Result<MetricPoint, DropReason> {
        if !self.has_required_attributes(&point) {
            debug!(metric = %point.name, "dropping point: missing required attribute");
            return Err(DropReason::MissingRequiredAttribute);
        }

        for value in point.attributes.values_mut() {
            *value = self.redactor.redact(value);
        }

        let keys: Vec<String> = point.attributes.keys().cloned().collect();
        for key in keys {
            let value = point.attributes.get(&key).cloned().unwrap_or_default();
            let guarded = self.cardinality.check(&key, &value);
            point.attributes.insert(key, guarded);
        }

        for value in point.attributes.values_mut() {
            if value.len() > self.max_field_length {
                value.truncate(self.max_field_length);
                value.push_str("<truncated>");
            }
        }

        Ok(point)
    }

    fn has_required_attributes(&self, point: &MetricPoint) -> bool {
        point.has_required_attributes()
            && !point.resource.db_name.is_empty()
            && !point.name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use telemetry_core::{DatabaseKind, MetricValue, ResourceAttributes};

    use super::*;

    fn point(db_name: &str, attrs: &[(&str, &str)]) -> MetricPoint {
        MetricPoint {
            name: "query.slow".to_string(),
            value: MetricValue::GaugeDouble(1.0),
            timestamp: Utc::now(),
            resource: ResourceAttributes {
                db_system: DatabaseKind::Postgresql,
                db_name: db_name.to_string(),
                instance_endpoint: "localhost".to_string(),
                deployment_environment: "test".to_string(),
                host: "h".to_string(),
            },
            attributes: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn drops_point_missing_db_name() {
        let verifier = Verifier::new(VerifierConfig::default()).unwrap();
        let p = point("", &[]);
        assert_eq!(verifier.verify(p).unwrap_err(), DropReason::MissingRequiredAttribute);
    }

    #[test]
    fn redacts_pii_before_returning() {
        let verifier = Verifier::new(VerifierConfig::default()).unwrap();
        let p = point("db1", &[("query_text", "SELECT * WHERE email = 'a@b.com'")]);
        let verified = verifier.verify(p).unwrap();
        assert_eq!(verified.attributes.get("query_text").unwrap(), "<redacted>");
    }

    #[test]
    fn clamps_overlong_values() {
        let verifier = Verifier::new(VerifierConfig { max_field_length: 5, ..Default::default() }).unwrap();
        let p = point("db1", &[("q", "abcdefghij")]);
        let verified = verifier.verify(p).unwrap();
        assert!(verified.attributes.get("q").unwrap().starts_with("abcde"));
    }

    #[test]
    fn enforces_cardinality_guard() {
        let verifier = Verifier::new(VerifierConfig { max_cardinality: 1, ..Default::default() }).unwrap();
        verifier.verify(point("db1", &[("tenant", "a")])).unwrap();
        let verified = verifier.verify(point("db1", &[("tenant", "b")])).unwrap();
        assert_eq!(verified.attributes.get("tenant").unwrap(), "<high-cardinality>");
    }
}
