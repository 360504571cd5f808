use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use telemetry_core::DatabaseId;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::CircuitBreakerConfig;
use crate::state::{CircuitPhase, CircuitState, Outcome};

/// C4: the only authority on whether a query runs. `admit`/`report` are the
/// entire public surface; `CircuitState` never escapes this crate.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    databases: RwLock<HashMap<DatabaseId, Arc<Mutex<CircuitState>>>>,
}

pub enum Admission {
    Permit,
    /// Permit granted while `Open`: this is the single recovery probe
    /// §4.4 allows through past the deadline, not a normal call.
    Probe,
    Deny,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { config, databases: RwLock::new(HashMap::new()) }
    }

    async fn entry(&self, db: &DatabaseId) -> Arc<Mutex<CircuitState>> {
        if let Some(state) = self.databases.read().await.get(db) {
            return state.clone();
        }
        let mut write = self.databases.write().await;
        write
            .entry(db.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(CircuitState::new(self.config.window_size, self.config.recovery_timeout)))
            })
            .clone()
    }

    pub async fn admit(&self, db: &DatabaseId) -> Admission {
        let entry = self.entry(db).await;
        let mut state = entry.lock().await;
        let was_open = matches!(state.phase(), CircuitPhase::Open);
        if state.admit(Instant::now()) {
            if was_open {
                Admission::Probe
            } else {
                Admission::Permit
            }
        } else {
            Admission::Deny
        }
    }

    pub async fn report(&self, db: &DatabaseId, outcome: Outcome, latency: Duration) {
        let entry = self.entry(db).await;
        let mut state = entry.lock().await;
        let phase_before = state.phase();
        state.report(outcome, latency, Instant::now(), &self.config);
        let phase_after = state.phase();
        drop(state);

        if phase_before != phase_after {
            log_transition(db, phase_before, phase_after);
        }
    }

    /// Current phase, for the health/readiness surface (§4.10). Returns
    /// `Closed` for a database the breaker has never seen a call for.
    pub async fn phase(&self, db: &DatabaseId) -> CircuitPhase {
        if let Some(state) = self.databases.read().await.get(db) {
            state.lock().await.phase()
        } else {
            CircuitPhase::Closed
        }
    }

    pub async fn snapshot(&self) -> Vec<(DatabaseId, CircuitPhase)> {
        let map = self.databases.read().await;
        let mut out = Vec::with_capacity(map.len());
        for (db, state) in map.iter() {
            out.push((db.clone(), state.lock().await.phase()));
        }
        out
    }
}

fn log_transition(db: &DatabaseId, before: CircuitPhase, after: CircuitPhase) {
    match after {
        CircuitPhase::Open => warn!(database = %db, "circuit opened"),
        CircuitPhase::HalfOpen => info!(database = %db, "circuit half-open, probing"),
        CircuitPhase::Closed => info!(database = %db, "circuit closed"),
    }
    let _ = before;
}
