//! Layered configuration documents
//!
//! Suites read two YAML documents, a user-level one and a project-level one,
//! and merge them: later layers win per key, nested mappings merge
//! recursively, scalars and sequences are replaced wholesale. The merged
//! document is then deserialized into [`EnvironmentConfig`].

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{Error, Result};

/// Environment variable naming the user-level configuration file
pub const USER_CONFIG_ENV: &str = "TESTBED_USER_CONFIG";

/// Environment variable naming the project-level configuration file
pub const PROJECT_CONFIG_ENV: &str = "TESTBED_CONFIG";

/// Environment variable carrying the runtime headless flag
pub const HEADLESS_ENV: &str = "TESTBED_HEADLESS";

/// Merge `overlay` into `base`.
///
/// Mappings are merged key by key and recursively; any other overlay value
/// replaces the base value. A null overlay (an empty section) overrides
/// nothing.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Default configuration layers, lowest precedence first
pub fn default_config_paths() -> Vec<PathBuf> {
    let user = std::env::var_os(USER_CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| crate::default_store_path().join("config.yaml"));
    let project = std::env::var_os(PROJECT_CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("testbed.yaml"));
    vec![user, project]
}

/// Read and merge every existing file in `paths`, in order.
///
/// Missing files are skipped. It is an error if none of them exists.
pub fn load_layers(paths: &[PathBuf]) -> Result<Value> {
    let mut merged = Value::Mapping(Mapping::new());
    let mut loaded = 0;

    for path in paths {
        if !path.exists() {
            debug!("Config layer {} not present, skipping", path.display());
            continue;
        }
        let layer = read_document(path)?;
        merge(&mut merged, layer);
        loaded += 1;
        info!("Loaded config layer {}", path.display());
    }

    if loaded == 0 {
        return Err(Error::Config(format!(
            "no configuration found (looked in {})",
            paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    Ok(merged)
}

fn read_document(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Value::Mapping(Mapping::new()));
    }
    let value: Value = serde_yaml::from_str(&content)?;
    match value {
        Value::Mapping(_) => Ok(value),
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        _ => Err(Error::Config(format!(
            "{} must contain a mapping at the top level",
            path.display()
        ))),
    }
}

/// Runtime context that is not part of the configuration files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeContext {
    /// Headless override, when present
    pub headless: Option<bool>,
}

impl RuntimeContext {
    /// Read the runtime context from the process environment
    pub fn from_env() -> Result<Self> {
        let headless = match std::env::var(HEADLESS_ENV) {
            Ok(raw) => Some(parse_flag(&raw).ok_or_else(|| {
                Error::Config(format!("{} must be a boolean, got {:?}", HEADLESS_ENV, raw))
            })?),
            Err(_) => None,
        };
        Ok(Self { headless })
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// The merged environment configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentConfig {
    /// Base URL of the application under test
    pub server_name: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Hosted (cloud) deployment
    #[serde(default)]
    pub hosted: bool,

    /// Enterprise license installed
    #[serde(default)]
    pub enterprise: bool,

    /// Trial instance
    #[serde(default)]
    pub trial: bool,

    #[serde(default)]
    pub browser: BrowserSection,

    #[serde(default)]
    pub database: Option<DatabaseSection>,

    #[serde(default)]
    pub api: ApiSection,
}

impl EnvironmentConfig {
    /// Load the default layers and apply the runtime context
    pub fn load() -> Result<Self> {
        let document = load_layers(&default_config_paths())?;
        let mut config = Self::from_document(document)?;
        config.apply_runtime(&RuntimeContext::from_env()?);
        Ok(config)
    }

    /// Build the typed configuration from a merged document
    pub fn from_document(document: Value) -> Result<Self> {
        let config: Self = serde_yaml::from_value(document)
            .map_err(|e| Error::Config(format!("malformed configuration: {}", e)))?;
        if config.server_name.trim().is_empty() {
            return Err(Error::Config("server_name must not be empty".to_string()));
        }
        Ok(config)
    }

    /// Parse a single YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_document(serde_yaml::from_str(yaml)?)
    }

    /// Fold the runtime context into the configuration
    pub fn apply_runtime(&mut self, context: &RuntimeContext) {
        if let Some(headless) = context.headless {
            self.browser.headless = Some(headless);
        }
    }

    /// Server URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.server_name.trim_end_matches('/')
    }
}

/// Browser section of the configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSection {
    /// Engine name, matched case-insensitively
    #[serde(default = "default_engine")]
    pub engine: String,

    #[serde(default)]
    pub headless: Option<bool>,

    #[serde(default)]
    pub window_size: Option<[u32; 2]>,

    #[serde(default)]
    pub accept_insecure_certs: bool,

    /// Extra command line arguments for the browser binary
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub page_load_timeout_secs: Option<u64>,

    #[serde(default)]
    pub script_timeout_secs: Option<u64>,

    /// Actions invoked on the session after acquisition
    #[serde(default)]
    pub actions: Vec<String>,

    /// WebDriver endpoint for the remote engine
    #[serde(default)]
    pub remote_endpoint: Option<String>,

    /// Extra capabilities merged into the session request
    #[serde(default)]
    pub capabilities: serde_json::Map<String, serde_json::Value>,

    /// Driver binary override for local engines
    #[serde(default)]
    pub driver_path: Option<PathBuf>,
}

fn default_engine() -> String {
    "chrome".to_string()
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            headless: None,
            window_size: None,
            accept_insecure_certs: false,
            args: Vec::new(),
            page_load_timeout_secs: None,
            script_timeout_secs: None,
            actions: Vec::new(),
            remote_endpoint: None,
            capabilities: serde_json::Map::new(),
            driver_path: None,
        }
    }
}

/// Database section of the configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    /// Dialect discriminator: mysql, mssql, local, hosted or sqlite
    pub dbtype: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Database name, or the file path for sqlite
    #[serde(default)]
    pub name: String,

    /// Script run before the suite
    #[serde(default)]
    pub setup: Option<PathBuf>,

    /// Script run after the suite
    #[serde(default)]
    pub teardown: Option<PathBuf>,

    /// Dump replayed after setup
    #[serde(default)]
    pub dump: Option<PathBuf>,

    /// Table that receives explicit key values during mssql dump replay
    #[serde(default)]
    pub identity_table: Option<String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

/// REST API section of the configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSection {
    /// Turn the API on through the admin UI during API suite setup
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Name prefix for the class project
    #[serde(default)]
    pub project_name: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            enabled: true,
            project_name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_merge_overrides_scalars_and_recurses() {
        let mut base = yaml(
            r#"
server_name: https://base
browser:
  engine: firefox
  headless: false
database:
  dbtype: mysql
  host: db
"#,
        );
        merge(
            &mut base,
            yaml(
                r#"
server_name: https://x
browser:
  headless: true
"#,
            ),
        );

        assert_eq!(base["server_name"], Value::from("https://x"));
        assert_eq!(base["browser"]["engine"], Value::from("firefox"));
        assert_eq!(base["browser"]["headless"], Value::from(true));
        assert_eq!(base["database"]["host"], Value::from("db"));
    }

    #[test]
    fn test_merge_replaces_sequences() {
        let mut base = yaml("args: [a, b]");
        merge(&mut base, yaml("args: [c]"));
        assert_eq!(base["args"], yaml("[c]"));
    }

    #[test]
    fn test_merge_empty_section_keeps_base() {
        let mut base = yaml("browser:\n  engine: firefox\n");
        merge(&mut base, yaml("browser:\n"));
        assert_eq!(base["browser"]["engine"], Value::from("firefox"));

        let mut doc = yaml("server_name: https://x\nbrowser:\n  engine: firefox\n");
        merge(&mut doc, yaml("browser:\n"));
        let config = EnvironmentConfig::from_document(doc).unwrap();
        assert_eq!(config.browser.engine, "firefox");
    }

    #[test]
    fn test_load_layers_later_file_wins() {
        let tmp = TempDir::new().unwrap();
        let user = tmp.path().join("user.yaml");
        let project = tmp.path().join("project.yaml");
        std::fs::write(&user, "server_name: https://user\nusername: me\n").unwrap();
        std::fs::write(&project, "server_name: https://project\n").unwrap();

        let merged = load_layers(&[user, project]).unwrap();
        let config = EnvironmentConfig::from_document(merged).unwrap();

        assert_eq!(config.server_name, "https://project");
        assert_eq!(config.username, "me");
    }

    #[test]
    fn test_load_layers_skips_missing_files() {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join("project.yaml");
        std::fs::write(&project, "server_name: https://x\n").unwrap();

        let merged = load_layers(&[tmp.path().join("absent.yaml"), project]).unwrap();
        assert_eq!(merged["server_name"], Value::from("https://x"));
    }

    #[test]
    fn test_load_layers_requires_one_file() {
        let tmp = TempDir::new().unwrap();
        let err = load_layers(&[tmp.path().join("absent.yaml")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_server_name_is_config_error() {
        let err = EnvironmentConfig::from_yaml("username: me\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_defaults() {
        let config = EnvironmentConfig::from_yaml("server_name: https://x/\n").unwrap();
        assert_eq!(config.browser.engine, "chrome");
        assert!(config.api.enabled);
        assert!(config.database.is_none());
        assert_eq!(config.base_url(), "https://x");
    }

    #[test]
    fn test_runtime_headless_overrides_file() {
        let mut config =
            EnvironmentConfig::from_yaml("server_name: https://x\nbrowser:\n  headless: false\n")
                .unwrap();
        config.apply_runtime(&RuntimeContext { headless: Some(true) });
        assert_eq!(config.browser.headless, Some(true));

        config.apply_runtime(&RuntimeContext::default());
        assert_eq!(config.browser.headless, Some(true));
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" 0 "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
