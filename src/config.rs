// Configuration management for structgraph

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::index::Language;

/// Name of the per-repository configuration file
pub const CONFIG_FILE: &str = ".structgraph.toml";

/// Environment variable overriding the store location
pub const CACHE_ENV: &str = "STRUCTGRAPH_CACHE";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub languages: LanguagesConfig,
    pub indexing: IndexingConfig,
    pub sync: SyncConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguagesConfig {
    pub enabled: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub exclude: Vec<String>,
    pub include: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub workers: usize,
    pub timeout_secs: u64,
    /// Above this share of changed files, every relationship is re-resolved
    pub full_resolution_ratio: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LanguagesConfig {
    fn default() -> Self {
        Self {
            enabled: Language::ALL.iter().map(|l| l.as_str().to_string()).collect(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            exclude: vec![
                ".git/".to_string(),
                "node_modules/".to_string(),
                "__pycache__/".to_string(),
                ".venv/".to_string(),
                "venv/".to_string(),
                "dist/".to_string(),
                "build/".to_string(),
                "*.d.ts".to_string(),
            ],
            include: vec![],
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            timeout_secs: 30,
            full_resolution_ratio: 0.5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `.structgraph.toml` from the repository root.
    ///
    /// `Ok(None)` when the file does not exist. Callers decide how to report an invalid file,
    /// since this runs before logging is set up.
    pub fn load<P: AsRef<Path>>(project_dir: P) -> anyhow::Result<Option<Self>> {
        let config_path = project_dir.as_ref().join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(None);
        }
        Self::from_file(&config_path)
            .map(Some)
            .with_context(|| format!("invalid config {}", config_path.display()))
    }

    /// Check if a repository-relative path should be analyzed
    pub fn should_index_file(&self, file_path: &str) -> bool {
        if self
            .indexing
            .exclude
            .iter()
            .any(|pattern| matches_pattern(file_path, pattern))
        {
            return false;
        }

        if !self.indexing.include.is_empty() {
            return self
                .indexing
                .include
                .iter()
                .any(|pattern| matches_pattern(file_path, pattern));
        }

        true
    }

    /// Enabled languages, in declaration order, ignoring unknown names
    pub fn enabled_languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self
            .languages
            .enabled
            .iter()
            .filter_map(|name| Language::from_str(name))
            .collect();
        languages.dedup();
        languages
    }

    /// Store location: explicit flag, then environment, then config, then home directory
    pub fn resolve_store_path(&self, flag: Option<&Path>) -> PathBuf {
        if let Some(path) = flag {
            return path.to_path_buf();
        }
        if let Some(path) = std::env::var_os(CACHE_ENV).filter(|v| !v.is_empty()) {
            return PathBuf::from(path);
        }
        if let Some(path) = &self.store.path {
            return path.clone();
        }
        default_store_path()
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.languages.enabled.is_empty() {
            return Err(anyhow::anyhow!("At least one language must be enabled"));
        }
        for lang in &self.languages.enabled {
            if Language::from_str(lang).is_none() {
                return Err(anyhow::anyhow!("Unsupported language: {}", lang));
            }
        }

        if self.sync.workers == 0 {
            return Err(anyhow::anyhow!("Worker count must be greater than 0"));
        }
        if self.sync.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Parse timeout must be greater than 0"));
        }
        let ratio = self.sync.full_resolution_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(anyhow::anyhow!(
                "full_resolution_ratio must be in (0, 1], got {}",
                ratio
            ));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!("Invalid log level: {}", self.logging.level));
        }
        let valid_formats = ["compact", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!("Invalid log format: {}", self.logging.format));
        }

        Ok(())
    }
}

/// `$HOME/.structgraph/graph.db`, or the working directory when no home is set
pub fn default_store_path() -> PathBuf {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".structgraph").join("graph.db")
}

/// Glob-style matching on repository-relative paths.
///
/// `dir/` matches a directory anywhere in the path, `*.ext` matches a file suffix,
/// `**/name/**` matches a directory component, anything else is a path prefix.
fn matches_pattern(file_path: &str, pattern: &str) -> bool {
    if let Some(dir) = pattern.strip_suffix('/') {
        file_path.starts_with(pattern) || file_path.contains(&format!("/{}/", dir))
    } else if let Some(inner) = pattern
        .strip_prefix("**/")
        .and_then(|rest| rest.strip_suffix("/**"))
    {
        file_path.starts_with(&format!("{}/", inner)) || file_path.contains(&format!("/{}/", inner))
    } else if let Some(suffix) = pattern.strip_prefix('*') {
        !suffix.contains('*') && file_path.ends_with(suffix)
    } else {
        file_path == pattern || file_path.starts_with(&format!("{}/", pattern.trim_end_matches('/')))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.enabled_languages(), vec![Language::Python, Language::TypeScript]);
        assert_eq!(config.sync.workers, 4);
        assert_eq!(config.sync.timeout_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_should_index_file() {
        let config = Config::default();

        assert!(config.should_index_file("src/app.ts"));
        assert!(config.should_index_file("lib/utils.py"));

        assert!(!config.should_index_file("node_modules/pkg/index.ts"));
        assert!(!config.should_index_file("web/node_modules/pkg/index.ts"));
        assert!(!config.should_index_file("pkg/__pycache__/mod.py"));
        assert!(!config.should_index_file("types/global.d.ts"));
    }

    #[test]
    fn test_include_patterns() {
        let mut config = Config::default();
        config.indexing.include = vec!["src".to_string()];

        assert!(config.should_index_file("src/app.ts"));
        assert!(!config.should_index_file("scripts/build.py"));
        assert!(!config.should_index_file("srcfoo/x.py"));
    }

    #[test]
    fn test_pattern_matching() {
        assert!(matches_pattern("target/debug/file", "target/"));
        assert!(matches_pattern("src/target/file", "target/"));
        assert!(!matches_pattern("src/targets/file", "target/"));

        assert!(matches_pattern("test.py", "*.py"));
        assert!(!matches_pattern("test.rs", "*.py"));

        assert!(matches_pattern("src/__tests__/test.py", "**/__tests__/**"));
        assert!(matches_pattern("__tests__/test.py", "**/__tests__/**"));
        assert!(!matches_pattern("src/tests_util.py", "**/__tests__/**"));
    }

    #[test]
    fn test_double_star_pattern_filters_files() {
        let mut config = Config::default();
        config.indexing.exclude.push("**/__tests__/**".to_string());
        assert!(!config.should_index_file("web/__tests__/view.test.ts"));
        assert!(config.should_index_file("web/view.ts"));

        config.indexing.include = vec!["**/api/**".to_string()];
        assert!(config.should_index_file("src/api/routes.py"));
        assert!(!config.should_index_file("src/models.py"));
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [languages]
            enabled = ["python"]

            [sync]
            workers = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.enabled_languages(), vec![Language::Python]);
        assert_eq!(config.sync.workers, 2);
        assert_eq!(config.sync.timeout_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.languages.enabled = vec!["cobol".to_string()];
        assert!(config.validate().is_err());
        config.languages.enabled = vec![];
        assert!(config.validate().is_err());
        config.languages.enabled = vec!["typescript".to_string()];

        config.sync.workers = 0;
        assert!(config.validate().is_err());
        config.sync.workers = 4;

        config.sync.timeout_secs = 0;
        assert!(config.validate().is_err());
        config.sync.timeout_secs = 30;

        config.sync.full_resolution_ratio = 1.5;
        assert!(config.validate().is_err());
        config.sync.full_resolution_ratio = 0.0;
        assert!(config.validate().is_err());
        config.sync.full_resolution_ratio = 1.0;

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
        config.logging.level = "info".to_string();

        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
        config.logging.format = "pretty".to_string();

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flag_wins_store_path() {
        let config = Config::default();
        let flag = PathBuf::from("/tmp/explicit.db");
        assert_eq!(config.resolve_store_path(Some(flag.as_path())), flag);
    }

    #[test]
    fn test_load_reports_missing_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(dir.path()).unwrap().is_none());

        std::fs::write(dir.path().join(CONFIG_FILE), "[sync]\nworkers = 0\n").unwrap();
        let err = Config::load(dir.path()).unwrap_err();
        assert!(format!("{:#}", err).contains(CONFIG_FILE));

        std::fs::write(dir.path().join(CONFIG_FILE), "[sync]\nworkers = 2\n").unwrap();
        let config = Config::load(dir.path()).unwrap().unwrap();
        assert_eq!(config.sync.workers, 2);
    }
}
