use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use lru::LruCache;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_LRU_CAPACITY: usize = 4096;
const DEFAULT_MIN_OBSERVATIONS: u32 = 10;
const DEFAULT_REGRESSION_FACTOR: f64 = 1.5;
const DEFAULT_MAX_PLAN_LENGTH: usize = 4096;
const DEFAULT_MIN_POST_CHANGE_SAMPLES: u32 = 10;

lazy_static! {
    static ref STRING_LITERAL: Regex = Regex::new(r#"'[^']*'"#).unwrap();
    static ref NUMERIC_LITERAL: Regex = Regex::new(r"\b\d+(\.\d+)?\b").unwrap();
}

fn severity_from_history(history: &DigestHistory, config: &PlanExtractorConfig) -> PlanChangeSeverity {
    if history.post_change_samples >= config.min_post_change_samples {
        match (history.pre_change_mean_ms, history.post_change_mean_ms) {
            (Some(pre), Some(post)) if post > pre * config.regression_factor => PlanChangeSeverity::RegressionConfirmed,
            (Some(_), Some(_)) => PlanChangeSeverity::Info,
            _ => PlanChangeSeverity::RegressionSuspected,
        }
    } else {
        PlanChangeSeverity::RegressionSuspected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanChangeSeverity {
    Info,
    RegressionSuspected,
    RegressionConfirmed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanChangeEvent {
    pub digest: String,
    pub previous_fingerprint: u64,
    pub new_fingerprint: u64,
    pub severity: PlanChangeSeverity,
}

struct DigestHistory {
    fingerprint: u64,
    observations: u32,
    pre_change_mean_ms: Option<f64>,
    pre_change_samples: u32,
    post_change_mean_ms: Option<f64>,
    post_change_samples: u32,
    /// Fingerprint this digest had before its most recent change, kept
    /// around so the escalation event fired once enough post-change
    /// samples accrue can still report what it changed from.
    previous_fingerprint: Option<u64>,
    /// Whether a severity event has already been emitted for the current
    /// post-change streak, once `post_change_samples` crossed
    /// `min_post_change_samples` — avoids re-emitting one every tick.
    escalation_reported: bool,
    first_seen: Instant,
    last_seen: Instant,
}

#[derive(Debug, Clone)]
pub struct PlanExtractorConfig {
    pub lru_capacity: usize,
    pub min_observations: u32,
    pub regression_factor: f64,
    pub max_plan_length: usize,
    pub min_post_change_samples: u32,
}

impl Default for PlanExtractorConfig {
    fn default() -> Self {
        Self {
            lru_capacity: DEFAULT_LRU_CAPACITY,
            min_observations: DEFAULT_MIN_OBSERVATIONS,
            regression_factor: DEFAULT_REGRESSION_FACTOR,
            max_plan_length: DEFAULT_MAX_PLAN_LENGTH,
            min_post_change_samples: DEFAULT_MIN_POST_CHANGE_SAMPLES,
        }
    }
}

/// C5: canonicalises a captured execution plan into a stable 64-bit
/// fingerprint and tracks regression state per statement digest. The LRU
/// bound is the enrichment layer's only source of unbounded-growth risk,
/// so its capacity is the one knob that matters for memory.
pub struct PlanExtractor {
    config: PlanExtractorConfig,
    history: LruCache<String, DigestHistory>,
}

impl PlanExtractor {
    pub fn new(config: PlanExtractorConfig) -> Self {
        let capacity = std::num::NonZeroUsize::new(config.lru_capacity.max(1)).unwrap();
        Self { config, history: LruCache::new(capacity) }
    }

    /// Walks the plan tree depth-first, hashing `(node-type, access-method,
    /// join-type, sort-key-arity)` at each node. Literal values and
    /// estimated row counts never enter the hash, so the fingerprint is
    /// stable across re-executions of the same plan shape.
    pub fn fingerprint(plan: &Value) -> u64 {
        let mut hasher = DefaultHasher::new();
        Self::hash_node(plan, &mut hasher);
        hasher.finish()
    }

    fn hash_node(node: &Value, hasher: &mut DefaultHasher) {
        let node_type = node.get("Node Type").or_else(|| node.get("node_type")).and_then(Value::as_str).unwrap_or("?");
        let access_method = node.get("Access Method").or_else(|| node.get("access_type")).and_then(Value::as_str).unwrap_or("");
        let join_type = node.get("Join Type").and_then(Value::as_str).unwrap_or("");
        let sort_keys = node.get("Sort Key").and_then(Value::as_array).map(|a| a.len()).unwrap_or(0);

        node_type.hash(hasher);
        access_method.hash(hasher);
        join_type.hash(hasher);
        sort_keys.hash(hasher);

        if let Some(children) = node.get("Plans").and_then(Value::as_array) {
            for child in children {
                Self::hash_node(child, hasher);
            }
        }
    }

    /// Replaces literal values in serialised plan text with placeholders
    /// and truncates plans over `max_plan_length`, returning the text and
    /// whether it was truncated.
    pub fn anonymize_and_clamp(&self, plan_text: &str) -> (String, bool) {
        let anonymized = NUMERIC_LITERAL.replace_all(&STRING_LITERAL.replace_all(plan_text, "'…'"), "<number>");
        if anonymized.len() > self.config.max_plan_length {
            let mut truncated: String = anonymized.chars().take(self.config.max_plan_length).collect();
            truncated.push_str("...<truncated>");
            (truncated, true)
        } else {
            (anonymized.into_owned(), false)
        }
    }

    /// Observes a freshly captured plan for `digest`, returning a change
    /// event if the fingerprint differs from the last one recorded for
    /// this digest and the digest has enough history to make the change
    /// meaningful (`min_observations`).
    pub fn observe(&mut self, digest: &str, plan: &Value, exec_time_ms: f64) -> Option<PlanChangeEvent> {
        let fingerprint = Self::fingerprint(plan);
        let now = Instant::now();

        let existing = self.history.get_mut(digest);
        match existing {
            None => {
                self.history.put(
                    digest.to_string(),
                    DigestHistory {
                        fingerprint,
                        observations: 1,
                        pre_change_mean_ms: Some(exec_time_ms),
                        pre_change_samples: 1,
                        post_change_mean_ms: None,
                        post_change_samples: 0,
                        previous_fingerprint: None,
                        escalation_reported: false,
                        first_seen: now,
                        last_seen: now,
                    },
                );
                None
            }
            Some(history) => {
                history.last_seen = now;
                history.observations += 1;

                if history.fingerprint == fingerprint {
                    Self::accumulate_mean(history, exec_time_ms);

                    if history.post_change_samples >= self.config.min_post_change_samples
                        && !history.escalation_reported
                    {
                        history.escalation_reported = true;
                        if let Some(previous) = history.previous_fingerprint {
                            return Some(PlanChangeEvent {
                                digest: digest.to_string(),
                                previous_fingerprint: previous,
                                new_fingerprint: fingerprint,
                                severity: severity_from_history(history, &self.config),
                            });
                        }
                    }

                    return None;
                }

                let had_enough_history = history.observations > self.config.min_observations;
                let previous = history.fingerprint;
                let pre_change_mean = history.pre_change_mean_ms;

                history.fingerprint = fingerprint;
                history.pre_change_mean_ms = history.post_change_mean_ms.or(pre_change_mean);
                history.pre_change_samples = history.post_change_samples;
                history.post_change_mean_ms = Some(exec_time_ms);
                history.post_change_samples = 1;
                history.previous_fingerprint = Some(previous);
                history.escalation_reported = false;

                if !had_enough_history {
                    return None;
                }

                if history.post_change_samples >= self.config.min_post_change_samples {
                    history.escalation_reported = true;
                }

                Some(PlanChangeEvent {
                    digest: digest.to_string(),
                    previous_fingerprint: previous,
                    new_fingerprint: fingerprint,
                    severity: severity_from_history(history, &self.config),
                })
            }
        }
    }

    /// Current severity for `digest`'s most recent change, reflecting
    /// whatever post-change sample count has accumulated so far.
    pub fn severity_for(&self, digest: &str) -> PlanChangeSeverity {
        match self.history.peek(digest) {
            Some(history) => severity_from_history(history, &self.config),
            None => PlanChangeSeverity::Info,
        }
    }

    fn accumulate_mean(history: &mut DigestHistory, exec_time_ms: f64) {
        if history.post_change_samples > 0 {
            let n = history.post_change_samples as f64;
            let mean = history.post_change_mean_ms.unwrap_or(exec_time_ms);
            history.post_change_mean_ms = Some((mean * n + exec_time_ms) / (n + 1.0));
            history.post_change_samples += 1;
        } else {
            let n = history.pre_change_samples as f64;
            let mean = history.pre_change_mean_ms.unwrap_or(exec_time_ms);
            history.pre_change_mean_ms = Some((mean * n + exec_time_ms) / (n + 1.0));
            history.pre_change_samples += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn capacity(&self) -> usize {
        self.config.lru_capacity
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn seq_plan(node_type: &str) -> Value {
        json!({ "Node Type": node_type, "Plans": [] })
    }

    #[test]
    fn fingerprint_ignores_literal_values() {
        let a = json!({"Node Type": "Seq Scan", "Filter": "id = 1"});
        let b = json!({"Node Type": "Seq Scan", "Filter": "id = 999999"});
        assert_eq!(PlanExtractor::fingerprint(&a), PlanExtractor::fingerprint(&b));
    }

    #[test]
    fn fingerprint_differs_on_node_type() {
        let a = seq_plan("Seq Scan");
        let b = seq_plan("Index Scan");
        assert_ne!(PlanExtractor::fingerprint(&a), PlanExtractor::fingerprint(&b));
    }

    #[test]
    fn fingerprint_is_deterministic_across_instances() {
        let plan = json!({"Node Type": "Hash Join", "Join Type": "Inner", "Plans": [seq_plan("Seq Scan")]});
        let first = PlanExtractor::fingerprint(&plan);
        let second = PlanExtractor::fingerprint(&plan);
        assert_eq!(first, second);
    }

    #[test]
    fn lru_is_strictly_bounded() {
        let mut extractor = PlanExtractor::new(PlanExtractorConfig { lru_capacity: 4, ..Default::default() });
        for i in 0..20 {
            extractor.observe(&format!("digest-{i}"), &seq_plan("Seq Scan"), 1.0);
        }
        assert!(extractor.len() <= 4);
    }

    #[test]
    fn no_event_below_min_observations() {
        let mut extractor = PlanExtractor::new(PlanExtractorConfig::default());
        let digest = "d1";
        for _ in 0..5 {
            extractor.observe(digest, &seq_plan("Seq Scan"), 1.0);
        }
        let event = extractor.observe(digest, &seq_plan("Index Scan"), 1.0);
        assert!(event.is_none());
    }

    #[test]
    fn emits_event_once_min_observations_exceeded() {
        let mut extractor = PlanExtractor::new(PlanExtractorConfig { min_observations: 3, ..Default::default() });
        let digest = "d1";
        for _ in 0..4 {
            extractor.observe(digest, &seq_plan("Seq Scan"), 1.0);
        }
        let event = extractor.observe(digest, &seq_plan("Index Scan"), 1.0);
        assert!(event.is_some());
    }

    #[test]
    fn anonymizes_and_clamps_plan_text() {
        let extractor = PlanExtractor::new(PlanExtractorConfig { max_plan_length: 10, ..Default::default() });
        let (text, truncated) = extractor.anonymize_and_clamp("id = '12345' and val = 6789");
        assert!(truncated);
        assert!(text.len() <= 30);
    }

    #[test]
    fn escalates_to_regression_confirmed_once_post_change_samples_accrue() {
        let mut extractor =
            PlanExtractor::new(PlanExtractorConfig { min_observations: 3, min_post_change_samples: 5, ..Default::default() });
        let digest = "d1";

        for _ in 0..20 {
            extractor.observe(digest, &seq_plan("Seq Scan"), 50.0);
        }

        let initial = extractor.observe(digest, &seq_plan("Index Scan"), 120.0).unwrap();
        assert_eq!(initial.severity, PlanChangeSeverity::RegressionSuspected);

        // `initial` already counted as post-change sample 1; four more
        // bring the streak to `min_post_change_samples = 5`.
        let mut escalation = None;
        for _ in 0..4 {
            escalation = extractor.observe(digest, &seq_plan("Index Scan"), 120.0);
        }

        let escalation = escalation.expect("expected an escalation event once min_post_change_samples was reached");
        assert_eq!(escalation.severity, PlanChangeSeverity::RegressionConfirmed);
        assert_eq!(escalation.previous_fingerprint, initial.previous_fingerprint);
        assert_eq!(escalation.new_fingerprint, initial.new_fingerprint);
    }

    #[test]
    fn no_duplicate_escalation_once_reported() {
        let mut extractor =
            PlanExtractor::new(PlanExtractorConfig { min_observations: 1, min_post_change_samples: 2, ..Default::default() });
        let digest = "d1";

        extractor.observe(digest, &seq_plan("Seq Scan"), 10.0);
        extractor.observe(digest, &seq_plan("Seq Scan"), 10.0);
        extractor.observe(digest, &seq_plan("Index Scan"), 100.0);

        let first = extractor.observe(digest, &seq_plan("Index Scan"), 100.0);
        assert!(first.is_some());

        let second = extractor.observe(digest, &seq_plan("Index Scan"), 100.0);
        assert!(second.is_none(), "escalation event should only fire once per change streak");
    }
}
