// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for SnapSort

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::apply::ApplyAction;
use crate::classifier::RetryPolicy;
use crate::entry::ClassificationMode;
use crate::session::{RunOptions, SessionSettings};
use crate::{Result, SnapsortError};

/// Upper bound for parallel classifier requests
pub const MAX_CONCURRENCY: usize = 10;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    /// Vision classifier settings
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Worker pool and image preparation
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Category selection
    #[serde(default)]
    pub categories: CategoryConfig,

    /// Where and how results are placed
    #[serde(default)]
    pub output: OutputConfig,

    /// Result cache persistence
    #[serde(default)]
    pub cache: CacheConfig,

    /// Apply journal
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_dimension")]
    pub max_image_dimension: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CategoryConfig {
    /// Let the classifier pick categories
    #[serde(default = "default_true")]
    pub auto: bool,
    /// Fixed category names, used when `auto` is off
    #[serde(default)]
    pub names: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_folder_name")]
    pub folder_name: String,
    #[serde(default)]
    pub action: ApplyAction,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_db_path")]
    pub database: String,
    #[serde(default = "default_flush_debounce")]
    pub flush_debounce_ms: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_history_path")]
    pub path: String,
}

// Default value functions
fn default_url() -> String { crate::classifier::gemini::DEFAULT_BASE_URL.to_string() }
fn default_model() -> String { "gemini-2.0-flash".to_string() }
fn default_timeout() -> u64 { 60 }
fn default_attempts() -> u32 { 3 }
fn default_backoff_base() -> u64 { 1000 }
fn default_backoff_cap() -> u64 { 4000 }
fn default_concurrency() -> usize { 3 }
fn default_max_dimension() -> u32 { crate::imaging::DEFAULT_MAX_DIMENSION }
fn default_true() -> bool { true }
fn default_folder_name() -> String { crate::session::DEFAULT_OUTPUT_FOLDER.to_string() }
fn default_db_path() -> String { "snapsort.db".to_string() }
fn default_flush_debounce() -> u64 { 2000 }
fn default_max_entries() -> usize { crate::cache::MAX_CACHE_SIZE }
fn default_history_path() -> String { "snapsort_history.jsonl".to_string() }

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            model: default_model(),
            timeout_secs: default_timeout(),
            max_attempts: default_attempts(),
            backoff_base_ms: default_backoff_base(),
            backoff_cap_ms: default_backoff_cap(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_image_dimension: default_max_dimension(),
        }
    }
}

impl Default for CategoryConfig {
    fn default() -> Self {
        Self {
            auto: true,
            names: Vec::new(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            folder_name: default_folder_name(),
            action: ApplyAction::Copy,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            database: default_db_path(),
            flush_debounce_ms: default_flush_debounce(),
            max_entries: default_max_entries(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| SnapsortError::Config(format!("Failed to parse config: {}", e)))?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check value ranges; returns every problem found
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut problems = Vec::new();

        if !(1..=MAX_CONCURRENCY).contains(&self.pipeline.concurrency) {
            problems.push(format!(
                "pipeline.concurrency must be between 1 and {}, got {}",
                MAX_CONCURRENCY, self.pipeline.concurrency
            ));
        }
        if self.pipeline.max_image_dimension == 0 {
            problems.push("pipeline.max_image_dimension must be positive".to_string());
        }
        if self.classifier.max_attempts == 0 {
            problems.push("classifier.max_attempts must be at least 1".to_string());
        }
        if self.classifier.backoff_cap_ms < self.classifier.backoff_base_ms {
            problems.push("classifier.backoff_cap_ms is below backoff_base_ms".to_string());
        }
        if self.classifier.model.trim().is_empty() {
            problems.push("classifier.model is empty".to_string());
        }
        if !self.classifier.url.starts_with("http://") && !self.classifier.url.starts_with("https://") {
            problems.push(format!("classifier.url is not an HTTP URL: {}", self.classifier.url));
        }
        if self.cache.max_entries == 0 {
            problems.push("cache.max_entries must be positive".to_string());
        }

        let folder = self.output.folder_name.trim();
        if folder.is_empty() || folder.contains(['/', '\\']) || folder == "." || folder == ".." {
            problems.push(format!(
                "output.folder_name must be a single directory name, got '{}'",
                self.output.folder_name
            ));
        }
        if !self.categories.auto && self.categories.names.iter().all(|n| n.trim().is_empty()) {
            problems.push("categories.names is empty while categories.auto is off".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.classifier.max_attempts,
            base_delay: Duration::from_millis(self.classifier.backoff_base_ms),
            max_delay: Duration::from_millis(self.classifier.backoff_cap_ms),
        }
    }

    pub fn classification_mode(&self) -> ClassificationMode {
        if self.categories.auto {
            ClassificationMode::Auto
        } else {
            ClassificationMode::fixed(&self.categories.names)
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            concurrency: self.pipeline.concurrency,
            mode: self.classification_mode(),
            max_image_dimension: self.pipeline.max_image_dimension,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            output_folder: self.output.folder_name.clone(),
            flush_debounce: Duration::from_millis(self.cache.flush_debounce_ms),
            cache_capacity: self.cache.max_entries,
            history: Some(PathBuf::from(&self.history.path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.concurrency, 3);
        assert_eq!(config.output.folder_name, "OrganizedImages");
        assert_eq!(config.output.action, ApplyAction::Copy);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.classification_mode(), ClassificationMode::Auto);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{ "pipeline": { "concurrency": 5 }, "output": { "action": "move" } }"#,
        )
        .unwrap();
        assert_eq!(config.pipeline.concurrency, 5);
        assert_eq!(config.pipeline.max_image_dimension, 1280);
        assert_eq!(config.output.action, ApplyAction::Move);
        assert_eq!(config.cache.max_entries, 10_000);
    }

    #[test]
    fn test_validate_reports_all_problems() {
        let mut config = AppConfig::default();
        config.pipeline.concurrency = 11;
        config.output.folder_name = "../out".to_string();
        config.categories.auto = false;

        let problems = config.validate().unwrap_err();
        assert_eq!(problems.len(), 3);
    }

    #[test]
    fn test_fixed_categories_mode() {
        let mut config = AppConfig::default();
        config.categories.auto = false;
        config.categories.names = vec!["cats".into(), "dogs".into()];
        assert_eq!(
            config.run_options().mode,
            ClassificationMode::FixedList(vec!["cats".into(), "dogs".into()])
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let mut config = AppConfig::default();
        config.classifier.model = "gemini-custom".to_string();
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.classifier.model, "gemini-custom");

        let missing = AppConfig::load(&dir.path().join("missing.json")).unwrap();
        assert_eq!(missing.classifier.model, "gemini-2.0-flash");
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(SnapsortError::Config(_))));
    }
}
