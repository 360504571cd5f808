pub mod breaker;
pub mod config;
pub mod state;

pub use breaker::{Admission, CircuitBreaker};
pub use config::CircuitBreakerConfig;
pub use state::{CircuitPhase, Outcome};

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use telemetry_core::DatabaseId;

    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_consecutive_failures: 3,
            min_window_samples: 4,
            recovery_timeout: Duration::from_millis(20),
            half_open_success_threshold: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new(fast_config());
        let db = DatabaseId::from("db1");

        for _ in 0..3 {
            assert!(matches!(breaker.admit(&db).await, Admission::Permit));
            breaker.report(&db, Outcome::Error, Duration::from_millis(1)).await;
        }

        assert!(matches!(breaker.phase(&db).await, CircuitPhase::Open));
        assert!(matches!(breaker.admit(&db).await, Admission::Deny));
    }

    #[tokio::test]
    async fn recovers_through_half_open_on_probe_success() {
        let breaker = CircuitBreaker::new(fast_config());
        let db = DatabaseId::from("db1");

        for _ in 0..3 {
            breaker.report(&db, Outcome::Error, Duration::from_millis(1)).await;
        }
        assert!(matches!(breaker.phase(&db).await, CircuitPhase::Open));

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(matches!(breaker.admit(&db).await, Admission::Probe));
        breaker.report(&db, Outcome::Success, Duration::from_millis(1)).await;
        assert!(matches!(breaker.phase(&db).await, CircuitPhase::HalfOpen));

        breaker.report(&db, Outcome::Success, Duration::from_millis(1)).await;
        assert!(matches!(breaker.phase(&db).await, CircuitPhase::Closed));
    }

    #[tokio::test]
    async fn half_open_failure_reopens_with_backoff() {
        let breaker = CircuitBreaker::new(fast_config());
        let db = DatabaseId::from("db1");

        for _ in 0..3 {
            breaker.report(&db, Outcome::Error, Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(matches!(breaker.admit(&db).await, Admission::Probe));
        breaker.report(&db, Outcome::Success, Duration::from_millis(1)).await;
        assert!(matches!(breaker.phase(&db).await, CircuitPhase::HalfOpen));

        breaker.report(&db, Outcome::Error, Duration::from_millis(1)).await;
        assert!(matches!(breaker.phase(&db).await, CircuitPhase::Open));
    }

    #[tokio::test]
    async fn per_database_isolation() {
        let breaker = CircuitBreaker::new(fast_config());
        let db1 = DatabaseId::from("db1");
        let db2 = DatabaseId::from("db2");

        for _ in 0..3 {
            breaker.report(&db1, Outcome::Error, Duration::from_millis(1)).await;
        }
        assert!(matches!(breaker.phase(&db1).await, CircuitPhase::Open));
        assert!(matches!(breaker.phase(&db2).await, CircuitPhase::Closed));
        assert!(matches!(breaker.admit(&db2).await, Admission::Permit));
    }

    #[tokio::test]
    async fn single_probe_while_open() {
        let breaker = CircuitBreaker::new(fast_config());
        let db = DatabaseId::from("db1");

        for _ in 0..3 {
            breaker.report(&db, Outcome::Error, Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(matches!(breaker.admit(&db).await, Admission::Probe));
        assert!(matches!(breaker.admit(&db).await, Admission::Deny));
    }
}
