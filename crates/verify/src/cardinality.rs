use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const ROLLING_WINDOW: Duration = Duration::from_secs(3600);
const HIGH_CARDINALITY_MARKER: &str = "<high-cardinality>";

struct AttributeWindow {
    started_at: Instant,
    seen: HashSet<String>,
}

/// C9 cardinality guard: a per-attribute unique-value counter over a
/// rolling hour. Once an attribute exceeds `max_cardinality`, new values
/// are replaced with a high-cardinality marker rather than the point
/// being dropped.
pub struct CardinalityGuard {
    max_cardinality: usize,
    windows: Mutex<HashMap<String, AttributeWindow>>,
}

impl CardinalityGuard {
    pub fn new(max_cardinality: usize) -> Self {
        Self { max_cardinality, windows: Mutex::new(HashMap::new()) }
    }

    pub fn check(&self, attribute_key: &str, value: &str) -> String {
        let mut windows = self.windows.lock().unwrap();
        let now = Instant::now();
        let window = windows.entry(attribute_key.to_string()).or_insert_with(|| AttributeWindow {
            started_at: now,
            seen: HashSet::new(),
        });

        if now.duration_since(window.started_at) > ROLLING_WINDOW {
            window.started_at = now;
            window.seen.clear();
        }

        if window.seen.contains(value) {
            return value.to_string();
        }

        if window.seen.len() >= self.max_cardinality {
            return HIGH_CARDINALITY_MARKER.to_string();
        }

        window.seen.insert(value.to_string());
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_values_under_the_limit() {
        let guard = CardinalityGuard::new(3);
        assert_eq!(guard.check("db.name", "a"), "a");
        assert_eq!(guard.check("db.name", "b"), "b");
        assert_eq!(guard.check("db.name", "c"), "c");
    }

    #[test]
    fn replaces_values_past_the_limit() {
        let guard = CardinalityGuard::new(2);
        guard.check("db.name", "a");
        guard.check("db.name", "b");
        assert_eq!(guard.check("db.name", "c"), "<high-cardinality>");
    }

    #[test]
    fn previously_seen_values_stay_stable() {
        let guard = CardinalityGuard::new(1);
        guard.check("db.name", "a");
        assert_eq!(guard.check("db.name", "a"), "a");
    }

    #[test]
    fn attributes_are_isolated_from_each_other() {
        let guard = CardinalityGuard::new(1);
        guard.check("a", "x");
        assert_eq!(guard.check("b", "y"), "y");
    }
}
