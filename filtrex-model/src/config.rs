use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transformation::TransformationKind;

/// Errors raised while validating a filter-list job before compilation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error("configuration name must not be empty")]
    EmptyName,

    #[error("configuration must declare at least one source")]
    NoSources,

    #[error("source {index} has an empty location")]
    EmptySourceLocation { index: usize },

    #[error("duplicate source name '{name}'")]
    DuplicateSourceName { name: String },
}

/// Syntax family a source is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Adblock,
    Hosts,
}

impl Default for SourceType {
    fn default() -> Self {
        SourceType::Adblock
    }
}

/// One source of a filter-list job: a remote URL or a local path, plus the
/// per-source filtering and transformation settings applied before merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    /// URL or local filesystem path the rules are fetched from.
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceType>,

    /// Transformations applied to this source before merging.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformations: Vec<TransformationKind>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inclusions: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclusions: Vec<String>,

    /// A strict source aborts the whole compilation when it cannot be
    /// obtained; non-strict sources degrade to an empty contribution.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub strict: bool,
}

impl SourceConfig {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            name: None,
            source_type: None,
            transformations: Vec::new(),
            inclusions: Vec::new(),
            exclusions: Vec::new(),
            strict: false,
        }
    }

    /// Stable identifier for snapshot and health keys: the declared name
    /// when present, otherwise the location itself.
    pub fn id(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.source)
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type.unwrap_or_default()
    }
}

/// A filter-list job: named metadata, an ordered list of sources, and the
/// global wildcard filters and transformations applied after merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterListConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub sources: Vec<SourceConfig>,

    /// Transformations applied to the merged list, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformations: Vec<TransformationKind>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inclusions: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclusions: Vec<String>,
}

impl FilterListConfig {
    pub fn new(name: impl Into<String>, sources: Vec<SourceConfig>) -> Self {
        Self {
            name: name.into(),
            description: None,
            homepage: None,
            license: None,
            version: None,
            sources,
            transformations: Vec::new(),
            inclusions: Vec::new(),
            exclusions: Vec::new(),
        }
    }

    /// Check the invariants every compilation relies on.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigValidationError::EmptyName);
        }
        if self.sources.is_empty() {
            return Err(ConfigValidationError::NoSources);
        }
        for (index, source) in self.sources.iter().enumerate() {
            if source.source.trim().is_empty() {
                return Err(ConfigValidationError::EmptySourceLocation { index });
            }
        }
        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if let Some(name) = &source.name
                && !seen.insert(name.as_str())
            {
                return Err(ConfigValidationError::DuplicateSourceName {
                    name: name.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_sources(sources: Vec<SourceConfig>) -> FilterListConfig {
        FilterListConfig::new("test-list", sources)
    }

    #[test]
    fn rejects_empty_source_list() {
        let config = config_with_sources(vec![]);
        assert_eq!(config.validate(), Err(ConfigValidationError::NoSources));
    }

    #[test]
    fn rejects_blank_source_location() {
        let config = config_with_sources(vec![SourceConfig::new("  ")]);
        assert_eq!(
            config.validate(),
            Err(ConfigValidationError::EmptySourceLocation { index: 0 })
        );
    }

    #[test]
    fn rejects_duplicate_source_names() {
        let mut a = SourceConfig::new("https://example.com/a.txt");
        a.name = Some("ads".to_string());
        let mut b = SourceConfig::new("https://example.com/b.txt");
        b.name = Some("ads".to_string());

        let config = config_with_sources(vec![a, b]);
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::DuplicateSourceName { .. })
        ));
    }

    #[test]
    fn source_id_prefers_declared_name() {
        let mut source = SourceConfig::new("https://example.com/a.txt");
        assert_eq!(source.id(), "https://example.com/a.txt");
        source.name = Some("easylist".to_string());
        assert_eq!(source.id(), "easylist");
    }

    #[test]
    fn config_round_trips_through_json() {
        let mut source = SourceConfig::new("https://example.com/a.txt");
        source.source_type = Some(SourceType::Hosts);
        source.transformations = vec![TransformationKind::Deduplicate];
        let config = config_with_sources(vec![source]);

        let json = serde_json::to_string(&config).unwrap();
        let parsed: FilterListConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
        assert!(json.contains("\"type\":\"hosts\""));
    }
}
