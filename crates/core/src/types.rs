use serde::{Deserialize, Serialize};

/// Which relational engine a configured database speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Postgresql,
    Mysql,
}

impl DatabaseKind {
    pub fn as_db_system(&self) -> &'static str {
        match self {
            DatabaseKind::Postgresql => "postgresql",
            DatabaseKind::Mysql => "mysql",
        }
    }
}

/// Cloud provider hosting a database instance, as detected by the feature
/// detector or inferred from endpoint shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloudProvider {
    AwsRds,
    GcpCloudsql,
    AzureSql,
    SelfHosted,
    Unknown,
}

impl Default for CloudProvider {
    fn default() -> Self {
        CloudProvider::Unknown
    }
}

/// Identifies one configured database instance across the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseId(pub String);

impl std::fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DatabaseId {
    fn from(value: &str) -> Self {
        DatabaseId(value.to_string())
    }
}
