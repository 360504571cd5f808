use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::CloudProvider;

/// Immutable record of what a `(database-instance, epoch)` can do. Created
/// by the feature detector on connect, replaced (never mutated) on
/// reconnect or schema-change signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub epoch: u64,
    pub server_version: ServerVersion,
    pub extensions: HashSet<String>,
    pub accessible_views: HashSet<String>,
    pub view_columns: HashMap<String, HashSet<String>>,
    pub cloud_provider: CloudProvider,
    pub boot_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl CapabilitySet {
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    pub fn has_view(&self, view: &str) -> bool {
        self.accessible_views.contains(view)
    }

    pub fn view_has_column(&self, view: &str, column: &str) -> bool {
        self.view_columns
            .get(view)
            .map(|cols| cols.contains(column))
            .unwrap_or(false)
    }

    pub fn is_rds(&self) -> bool {
        matches!(self.cloud_provider, CloudProvider::AwsRds)
    }
}
