//! Search filter criteria
//!
//! The pacer never interprets these; they are handed to the search provider
//! and recorded on the run session.

use serde::{Deserialize, Serialize};

/// Filter dimensions for a search run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SearchFilters {
    /// Industry / sector
    pub sector: Option<String>,

    /// Job title or function
    pub role: Option<String>,

    /// Geographic location
    pub location: Option<String>,

    /// Connection degree ("2nd", "3rd")
    pub connection_degree: Option<String>,
}

impl SearchFilters {
    /// Attribute keys used for each dimension
    pub const SECTOR: &'static str = "sector";
    pub const ROLE: &'static str = "role";
    pub const LOCATION: &'static str = "location";
    pub const CONNECTION_DEGREE: &'static str = "connection-degree";

    /// Set dimensions as `(attribute key, value)` pairs, skipping blanks
    pub fn dimensions(&self) -> Vec<(&'static str, &str)> {
        [
            (Self::SECTOR, self.sector.as_deref()),
            (Self::ROLE, self.role.as_deref()),
            (Self::LOCATION, self.location.as_deref()),
            (Self::CONNECTION_DEGREE, self.connection_degree.as_deref()),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(str::trim).filter(|v| !v.is_empty()).map(|v| (key, v)))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions().is_empty()
    }

    /// Overlay non-empty values from `other`
    pub fn merged_with(&self, other: &SearchFilters) -> SearchFilters {
        fn pick(over: &Option<String>, base: &Option<String>) -> Option<String> {
            over.clone()
                .filter(|v| !v.trim().is_empty())
                .or_else(|| base.clone())
        }
        SearchFilters {
            sector: pick(&other.sector, &self.sector),
            role: pick(&other.role, &self.role),
            location: pick(&other.location, &self.location),
            connection_degree: pick(&other.connection_degree, &self.connection_degree),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl std::fmt::Display for SearchFilters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dims = self.dimensions();
        if dims.is_empty() {
            return write!(f, "(no filters)");
        }
        let parts: Vec<String> = dims.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{}", parts.join(", "))
    }
}
