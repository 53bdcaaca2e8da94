//! Product version and release channel resolution

use crate::search::error::{SearchError, SearchResult};
use crate::search::params::{Operator, SearchParam};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Channel whose versions are matched by excluding every pre-release channel
pub const RELEASE_CHANNEL: &str = "release";

/// Channel whose builds share one version string and need build ids
pub const BETA_CHANNEL: &str = "beta";

const VERSION_FIELD: &str = "version";

/// What is known about one `product:version` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub release_channel: String,
    pub major_version: String,
    #[serde(default)]
    pub build_ids: BTreeSet<String>,
}

/// Source of version metadata
#[async_trait]
pub trait VersionInfoProvider: Send + Sync {
    /// Look up the given `product:version` keys; unknown keys are simply absent
    async fn versions_info(&self, keys: &[String]) -> SearchResult<HashMap<String, VersionInfo>>;
}

/// Version table held in memory, keyed case-insensitively
#[derive(Debug, Clone, Default)]
pub struct StaticVersionInfo {
    table: HashMap<String, VersionInfo>,
}

impl StaticVersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, info: VersionInfo) -> Self {
        self.table.insert(key.to_lowercase(), info);
        self
    }

    pub fn from_json(json: &str) -> SearchResult<Self> {
        let raw: HashMap<String, VersionInfo> = serde_json::from_str(json).map_err(|e| {
            SearchError::InvalidConfiguration(format!("invalid version info table: {}", e))
        })?;
        Ok(raw
            .into_iter()
            .fold(Self::new(), |table, (key, info)| table.with(&key, info)))
    }

    pub fn from_path(path: &Path) -> SearchResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            SearchError::InvalidConfiguration(format!(
                "cannot read version info from {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[async_trait]
impl VersionInfoProvider for StaticVersionInfo {
    async fn versions_info(&self, keys: &[String]) -> SearchResult<HashMap<String, VersionInfo>> {
        Ok(keys
            .iter()
            .filter_map(|key| {
                self.table
                    .get(&key.to_lowercase())
                    .map(|info| (key.clone(), info.clone()))
            })
            .collect())
    }
}

/// Channel constraint attached to one resolved version
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ChannelFilter {
    /// `release_channel` must equal this channel
    Only(String),
    /// `release_channel` must not be any of these
    Exclude(Vec<String>),
}

/// Conjunction of conditions standing for one `product:version` key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedVersionFilter {
    pub product: String,
    pub version: String,
    pub channel: Option<ChannelFilter>,
    /// Only set for beta versions; an empty set matches nothing
    pub build_ids: Option<Vec<String>>,
}

/// Split `product:version`; anything else is not a version key
pub fn split_version_key(key: &str) -> Option<(&str, &str)> {
    let (product, version) = key.split_once(':')?;
    let (product, version) = (product.trim(), version.trim());
    if product.is_empty() || version.is_empty() {
        return None;
    }
    Some((product, version))
}

/// Pull `product:version` values out of the version parameters.
///
/// Only plain or `=` positive parameters qualify; whatever remains (bare versions,
/// other operators) stays an ordinary filter.
pub fn extract_version_keys(params: &mut Vec<SearchParam>) -> Vec<String> {
    let mut keys = Vec::new();

    for param in params.iter_mut() {
        if param.name() != VERSION_FIELD
            || param.negated
            || !matches!(param.operator, Operator::Any | Operator::Equal)
        {
            continue;
        }
        let (versioned, plain): (Vec<String>, Vec<String>) = param
            .values
            .drain(..)
            .partition(|v| split_version_key(v).is_some());
        for key in versioned {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        param.values = plain;
    }

    params.retain(|p| p.name() != VERSION_FIELD || !p.values.is_empty() || p.operator == Operator::IsNull);
    keys
}

/// Rewrite version keys into concrete filters, in key order
pub fn resolve(
    keys: &[String],
    version_info: &HashMap<String, VersionInfo>,
    restricted_channels: &[String],
) -> Vec<ResolvedVersionFilter> {
    keys.iter()
        .filter_map(|key| {
            let (product, version) = split_version_key(key)?;
            Some(resolve_one(
                product,
                version,
                version_info.get(key),
                restricted_channels,
            ))
        })
        .collect()
}

fn resolve_one(
    product: &str,
    version: &str,
    info: Option<&VersionInfo>,
    restricted_channels: &[String],
) -> ResolvedVersionFilter {
    let literal = ResolvedVersionFilter {
        product: product.to_lowercase(),
        version: version.to_string(),
        channel: None,
        build_ids: None,
    };

    let Some(info) = info else {
        return literal;
    };
    let channel = info.release_channel.to_lowercase();

    if restricted_channels.iter().any(|c| c.eq_ignore_ascii_case(&channel)) {
        let build_ids = (channel == BETA_CHANNEL)
            .then(|| info.build_ids.iter().cloned().collect());
        return ResolvedVersionFilter {
            version: info.major_version.clone(),
            channel: Some(ChannelFilter::Only(channel)),
            build_ids,
            ..literal
        };
    }

    if channel == RELEASE_CHANNEL {
        return ResolvedVersionFilter {
            channel: Some(ChannelFilter::Exclude(
                restricted_channels.iter().map(|c| c.to_lowercase()).collect(),
            )),
            ..literal
        };
    }

    literal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::fields::FieldCatalog;

    fn restricted() -> Vec<String> {
        vec!["beta".to_string(), "aurora".to_string(), "nightly".to_string()]
    }

    fn info(channel: &str, major: &str, builds: &[&str]) -> VersionInfo {
        VersionInfo {
            release_channel: channel.to_string(),
            major_version: major.to_string(),
            build_ids: builds.iter().map(|b| b.to_string()).collect(),
        }
    }

    #[test]
    fn test_split_version_key() {
        assert_eq!(split_version_key("Firefox:3.0"), Some(("Firefox", "3.0")));
        assert_eq!(split_version_key("3.0"), None);
        assert_eq!(split_version_key("Firefox:"), None);
    }

    #[test]
    fn test_beta_resolves_to_major_version_and_builds() {
        let mut table = HashMap::new();
        table.insert("alpha:3.0b2".to_string(), info("beta", "3.0", &["1001", "1002"]));

        let resolved = resolve(&["alpha:3.0b2".to_string()], &table, &restricted());
        assert_eq!(
            resolved,
            vec![ResolvedVersionFilter {
                product: "alpha".to_string(),
                version: "3.0".to_string(),
                channel: Some(ChannelFilter::Only("beta".to_string())),
                build_ids: Some(vec!["1001".to_string(), "1002".to_string()]),
            }]
        );
    }

    #[test]
    fn test_nightly_requires_channel_only() {
        let mut table = HashMap::new();
        table.insert("alpha:4.0a1".to_string(), info("Nightly", "4.0", &["9"]));

        let resolved = resolve(&["alpha:4.0a1".to_string()], &table, &restricted());
        assert_eq!(resolved[0].version, "4.0");
        assert_eq!(resolved[0].channel, Some(ChannelFilter::Only("nightly".to_string())));
        assert_eq!(resolved[0].build_ids, None);
    }

    #[test]
    fn test_release_excludes_prerelease_channels() {
        let mut table = HashMap::new();
        table.insert("alpha:3.0".to_string(), info("release", "3.0", &[]));

        let resolved = resolve(&["alpha:3.0".to_string()], &table, &restricted());
        assert_eq!(resolved[0].version, "3.0");
        assert_eq!(resolved[0].channel, Some(ChannelFilter::Exclude(restricted())));
    }

    #[test]
    fn test_unknown_version_passes_through() {
        let resolved = resolve(&["Alpha:0.9".to_string()], &HashMap::new(), &restricted());
        assert_eq!(resolved[0].product, "alpha");
        assert_eq!(resolved[0].version, "0.9");
        assert_eq!(resolved[0].channel, None);
    }

    #[test]
    fn test_extract_version_keys_leaves_plain_versions() {
        let catalog = FieldCatalog::builtin().unwrap();
        let version = catalog.lookup("version").unwrap().clone();
        let mut params = vec![
            SearchParam::new(
                version.clone(),
                Operator::Any,
                vec!["alpha:3.0".to_string(), "4.0".to_string()],
            ),
            SearchParam::new(version.clone(), Operator::Any, vec!["beta:1.0".to_string()]).negated(),
        ];

        let keys = extract_version_keys(&mut params);
        assert_eq!(keys, vec!["alpha:3.0"]);
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].values, vec!["4.0"]);
        assert!(params[1].negated);
    }

    #[tokio::test]
    async fn test_static_provider_is_case_insensitive() {
        let provider = StaticVersionInfo::new().with("Alpha:3.0", info("beta", "3.0", &["1"]));
        let found = provider
            .versions_info(&["alpha:3.0".to_string(), "alpha:9.9".to_string()])
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found["alpha:3.0"].major_version, "3.0");
    }

    #[test]
    fn test_static_provider_from_json() {
        let json = r#"{"Alpha:3.0": {"release_channel": "beta", "major_version": "3.0", "build_ids": ["1001"]}}"#;
        let provider = StaticVersionInfo::from_json(json).unwrap();
        assert_eq!(provider.len(), 1);
        assert!(StaticVersionInfo::from_json("[]").is_err());
    }
}
