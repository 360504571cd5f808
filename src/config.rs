use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use telemetry_core::SampleCategory;
use telemetry_policy::cost::Enforcement;

/// The structured configuration the runtime receives at start (§6). Every
/// field here is one the core recognises; anything the layered loader
/// finds beyond this shape is ignored rather than rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub databases: Vec<DatabaseConfig>,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub sampler: SamplerSettings,
    #[serde(default)]
    pub cost: CostSettings,
    #[serde(default)]
    pub plan: PlanSettings,
    #[serde(default)]
    pub verify: VerifySettings,
    #[serde(default)]
    pub otlp_endpoint: String,
    #[serde(default = "default_health_addr")]
    pub health_addr: String,
    #[serde(default = "default_shutdown_drain")]
    pub shutdown_drain_secs: u64,
    /// TTL for capability re-detection (§4.1); also the fallback interval
    /// when no reconnect or capability-probe error fires sooner.
    #[serde(default = "default_capability_refresh")]
    pub capability_refresh_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKindConfig {
    Postgresql,
    Mysql,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub ca_cert_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub id: String,
    pub kind: DatabaseKindConfig,
    pub endpoint: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default = "default_collection_interval")]
    pub collection_interval_secs: u64,
    #[serde(default)]
    pub deployment_environment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    pub max_consecutive_failures: u32,
    pub failure_threshold_percent: f64,
    pub recovery_timeout_secs: u64,
    pub per_database: bool,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            failure_threshold_percent: 50.0,
            recovery_timeout_secs: 60,
            per_database: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerSettings {
    pub category_rates: HashMap<String, f64>,
    pub always_keep_predicates: Vec<String>,
    pub global_rate_limit: f64,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        let mut category_rates = HashMap::new();
        category_rates.insert("slow-query".to_string(), 1.0);
        category_rates.insert("regular-query".to_string(), 0.1);
        category_rates.insert("plan-change".to_string(), 1.0);
        category_rates.insert("blocking".to_string(), 1.0);
        category_rates.insert("health".to_string(), 1.0);
        category_rates.insert("infra".to_string(), 0.5);
        Self { category_rates, always_keep_predicates: Vec::new(), global_rate_limit: 1000.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostSettings {
    pub budget_per_minute_bytes: u64,
    pub enforcement: String,
}

impl Default for CostSettings {
    fn default() -> Self {
        Self { budget_per_minute_bytes: 10 * 1024 * 1024, enforcement: "enforce".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSettings {
    pub lru_capacity: usize,
    pub regression_threshold: f64,
}

impl Default for PlanSettings {
    fn default() -> Self {
        Self { lru_capacity: 4096, regression_threshold: 1.5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifySettings {
    pub pii_patterns: Vec<String>,
    pub max_cardinality: usize,
    pub max_field_length: usize,
}

impl Default for VerifySettings {
    fn default() -> Self {
        Self { pii_patterns: Vec::new(), max_cardinality: 10_000, max_field_length: 1024 }
    }
}

fn default_health_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_drain() -> u64 {
    10
}

fn default_collection_interval() -> u64 {
    60
}

fn default_capability_refresh() -> u64 {
    600
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("TELEMETRY").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.databases.is_empty() {
            return Err("at least one database must be configured".to_string());
        }
        for db in &self.databases {
            if db.collection_interval_secs == 0 {
                return Err(format!("database {}: collection_interval must be > 0", db.id));
            }
        }
        if !self.circuit_breaker.per_database {
            return Err("circuit_breaker.per_database must be true (§4.4 requires per-database isolation)".to_string());
        }
        if self.cost.enforcement != "advisory" && self.cost.enforcement != "enforce" {
            return Err("cost.enforcement must be advisory or enforce".to_string());
        }
        Ok(())
    }

    pub fn enforcement(&self) -> Enforcement {
        match self.cost.enforcement.as_str() {
            "advisory" => Enforcement::Advisory,
            _ => Enforcement::Enforce,
        }
    }

    pub fn category_rates(&self) -> HashMap<SampleCategory, f64> {
        let mut out = HashMap::new();
        for (key, rate) in &self.sampler.category_rates {
            if let Some(category) = parse_category(key) {
                out.insert(category, *rate);
            }
        }
        out
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker.recovery_timeout_secs)
    }

    pub fn capability_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.capability_refresh_secs)
    }
}

fn parse_category(key: &str) -> Option<SampleCategory> {
    match key {
        "slow-query" => Some(SampleCategory::SlowQuery),
        "regular-query" => Some(SampleCategory::RegularQuery),
        "plan-change" => Some(SampleCategory::PlanChange),
        "blocking" => Some(SampleCategory::Blocking),
        "health" => Some(SampleCategory::Health),
        "infra" => Some(SampleCategory::Infra),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db(id: &str, interval: u64) -> DatabaseConfig {
        DatabaseConfig {
            id: id.to_string(),
            kind: DatabaseKindConfig::Postgresql,
            endpoint: "localhost:5432".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            tls: TlsConfig::default(),
            collection_interval_secs: interval,
            deployment_environment: "test".to_string(),
        }
    }

    fn config_with(databases: Vec<DatabaseConfig>) -> PipelineConfig {
        PipelineConfig {
            databases,
            circuit_breaker: CircuitBreakerSettings::default(),
            sampler: SamplerSettings::default(),
            cost: CostSettings::default(),
            plan: PlanSettings::default(),
            verify: VerifySettings::default(),
            otlp_endpoint: "http://localhost:4317".to_string(),
            health_addr: default_health_addr(),
            shutdown_drain_secs: default_shutdown_drain(),
            capability_refresh_secs: default_capability_refresh(),
        }
    }

    #[test]
    fn rejects_empty_database_list() {
        let config = config_with(vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_interval() {
        let config = config_with(vec![db("pg1", 0)]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_config() {
        let config = config_with(vec![db("pg1", 60)]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn category_rates_parse_known_keys_only() {
        let mut config = config_with(vec![db("pg1", 60)]);
        config.sampler.category_rates.insert("not-a-category".to_string(), 0.5);
        let rates = config.category_rates();
        assert!(!rates.contains_key(&SampleCategory::Infra) || rates[&SampleCategory::Infra] == 0.5);
        assert_eq!(rates.len(), config.sampler.category_rates.len() - 1);
    }
}
