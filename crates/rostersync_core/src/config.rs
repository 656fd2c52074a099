use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::extract::{DEFAULT_KEY_FIELD, DEFAULT_KEY_PREFIX, ExtractOptions};
use crate::list::{DuplicatePolicy, MergeOptions};
use crate::rich_text::RenderOptions;

pub const DEFAULT_CONFIG_FILENAME: &str = "rostersync.toml";
pub const DEFAULT_ENDPOINT: &str = "https://ukraine-dao.notion.site/api/v3/queryCollection?src=reset";
pub const DEFAULT_COLLECTION_ID: &str = "4ddfb2b0-d852-4d08-8294-c2c227010358";
pub const DEFAULT_COLLECTION_VIEW_ID: &str = "a35f82d0-6dbf-46d6-9ebb-aaf1fefa57a5";
pub const DEFAULT_SPACE_ID: &str = "3434855b-af4b-426e-80fa-4f5994281327";
pub const DEFAULT_USER_AGENT: &str = "rostersync/0.1";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SyncConfig {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub extract: ExtractSection,
    #[serde(default)]
    pub render: RenderOptions,
    #[serde(default)]
    pub merge: MergeSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ServiceSection {
    pub endpoint: Option<String>,
    pub collection_id: Option<String>,
    pub collection_view_id: Option<String>,
    pub space_id: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    /// Largest size hint accepted for the full fetch.
    pub max_limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ExtractSection {
    pub key_field: Option<String>,
    pub key_prefix: Option<String>,
    #[serde(default)]
    pub skip_archived: bool,
    #[serde(default)]
    pub renames: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MergeSection {
    pub duplicates: Option<String>,
}

/// Identifies the collection view queried on the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionTarget {
    pub collection_id: String,
    pub collection_view_id: String,
    pub space_id: String,
}

impl SyncConfig {
    /// Resolve the endpoint: env ROSTERSYNC_ENDPOINT > config > DEFAULT_ENDPOINT.
    pub fn endpoint(&self) -> String {
        env_override("ROSTERSYNC_ENDPOINT")
            .or_else(|| self.service.endpoint.clone())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
    }

    /// Resolve user agent: env ROSTERSYNC_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("ROSTERSYNC_USER_AGENT")
            .or_else(|| self.service.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    /// Resolve the request timeout: env ROSTERSYNC_HTTP_TIMEOUT_MS > config > none.
    pub fn timeout_ms(&self) -> Option<u64> {
        parse_timeout_override(env_override("ROSTERSYNC_HTTP_TIMEOUT_MS"))
            .or(self.service.timeout_ms)
    }

    pub fn target(&self) -> CollectionTarget {
        CollectionTarget {
            collection_id: self
                .service
                .collection_id
                .clone()
                .unwrap_or_else(|| DEFAULT_COLLECTION_ID.to_string()),
            collection_view_id: self
                .service
                .collection_view_id
                .clone()
                .unwrap_or_else(|| DEFAULT_COLLECTION_VIEW_ID.to_string()),
            space_id: self
                .service
                .space_id
                .clone()
                .unwrap_or_else(|| DEFAULT_SPACE_ID.to_string()),
        }
    }

    pub fn key_field(&self) -> &str {
        self.extract.key_field.as_deref().unwrap_or(DEFAULT_KEY_FIELD)
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            key_field: self.key_field().to_string(),
            key_prefix: self
                .extract
                .key_prefix
                .clone()
                .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            renames: self.extract.renames.clone(),
            skip_archived: self.extract.skip_archived,
            render: self.render,
        }
    }

    /// Merge options; the flag value, when given, wins over `[merge] duplicates`.
    pub fn merge_options(&self, duplicates_flag: Option<&str>) -> Result<MergeOptions> {
        let duplicates = match duplicates_flag.or(self.merge.duplicates.as_deref()) {
            Some(value) => DuplicatePolicy::parse(value)?,
            None => DuplicatePolicy::default(),
        };
        Ok(MergeOptions {
            key_field: self.key_field().to_string(),
            duplicates,
        })
    }
}

/// Load and parse a SyncConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<SyncConfig> {
    if !config_path.exists() {
        return Ok(SyncConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: SyncConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Config file location: flag > env ROSTERSYNC_CONFIG > `rostersync.toml` in `cwd`.
pub fn resolve_config_path(flag: Option<&Path>, cwd: &Path) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    if let Some(value) = env_override("ROSTERSYNC_CONFIG") {
        return PathBuf::from(value);
    }
    cwd.join(DEFAULT_CONFIG_FILENAME)
}

fn parse_timeout_override(raw: Option<String>) -> Option<u64> {
    let raw = raw?;
    match raw.parse::<u64>() {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(value = %raw, %error, "ignoring unparsable ROSTERSYNC_HTTP_TIMEOUT_MS");
            None
        }
    }
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_targets_builtin_collection() {
        let config = SyncConfig::default();
        let target = config.target();
        assert_eq!(target.collection_id, DEFAULT_COLLECTION_ID);
        assert_eq!(target.collection_view_id, DEFAULT_COLLECTION_VIEW_ID);
        assert_eq!(target.space_id, DEFAULT_SPACE_ID);
        assert_eq!(config.key_field(), "Twitter");
        assert!(config.render.escape_link_text);
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/rostersync.toml")).expect("load config");
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn load_config_parses_all_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("rostersync.toml");
        fs::write(
            &config_path,
            r##"
[service]
endpoint = "https://example.notion.site/api/v3/queryCollection"
collection_id = "c-1"
collection_view_id = "v-1"
space_id = "s-1"
timeout_ms = 5000
max_limit = 1000

[extract]
key_field = "Handle"
key_prefix = "#"
skip_archived = true

[extract.renames]
"Long name" = "Short"

[render]
escape_link_text = false

[merge]
duplicates = "keep-first"
"##,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(
            config.service.endpoint.as_deref(),
            Some("https://example.notion.site/api/v3/queryCollection")
        );
        assert_eq!(config.target().collection_id, "c-1");
        assert_eq!(config.service.timeout_ms, Some(5000));
        assert_eq!(config.service.max_limit, Some(1000));

        let extract = config.extract_options();
        assert_eq!(extract.key_field, "Handle");
        assert_eq!(extract.key_prefix, "#");
        assert!(extract.skip_archived);
        assert_eq!(extract.rename_field("Long name"), "Short");
        assert!(!extract.render.escape_link_text);

        let merge = config.merge_options(None).expect("merge options");
        assert_eq!(merge.key_field, "Handle");
        assert_eq!(merge.duplicates, DuplicatePolicy::KeepFirst);
    }

    #[test]
    fn duplicates_flag_wins_over_config() {
        let config = SyncConfig {
            merge: MergeSection {
                duplicates: Some("keep-first".to_string()),
            },
            ..SyncConfig::default()
        };
        let merge = config.merge_options(Some("merge")).expect("merge options");
        assert_eq!(merge.duplicates, DuplicatePolicy::Merge);
    }

    #[test]
    fn invalid_duplicate_policy_is_an_error() {
        let config = SyncConfig {
            merge: MergeSection {
                duplicates: Some("latest".to_string()),
            },
            ..SyncConfig::default()
        };
        assert!(config.merge_options(None).is_err());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("rostersync.toml");
        fs::write(&config_path, "[service\nendpoint = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn explicit_config_flag_is_used_verbatim() {
        let path = resolve_config_path(Some(Path::new("/etc/roster.toml")), Path::new("/work"));
        assert_eq!(path, PathBuf::from("/etc/roster.toml"));
    }

    #[test]
    fn timeout_override_accepts_digits_only() {
        assert_eq!(parse_timeout_override(Some("2500".to_string())), Some(2500));
        assert_eq!(parse_timeout_override(Some("25s".to_string())), None);
        assert_eq!(parse_timeout_override(None), None);
    }

    #[test]
    fn builtin_rename_survives_config_without_renames() {
        let extract = SyncConfig::default().extract_options();
        assert_eq!(
            extract.rename_field("Summary/Reason for being on this list"),
            "Summary"
        );
    }
}
