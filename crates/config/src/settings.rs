// Core settings
// Loaded from ~/.config/sheetwright/settings.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Session
    #[serde(rename = "session.workbookTtlSecs")]
    pub workbook_ttl_secs: u64,

    #[serde(rename = "session.idleTimeoutSecs")]
    pub idle_timeout_secs: u64,

    #[serde(rename = "session.maxRetries")]
    pub max_retries: u32,

    // Classifier
    #[serde(rename = "classifier.confidenceThreshold")]
    pub confidence_threshold: f64,

    #[serde(rename = "classifier.timeoutMs")]
    pub classifier_timeout_ms: u64,

    // Compiler
    #[serde(rename = "compiler.fuzzyThreshold")]
    pub fuzzy_threshold: f64,

    // Analysis
    #[serde(rename = "analysis.sampleLimit")]
    pub sample_limit: usize,

    #[serde(rename = "analysis.categoryMaxDistinct")]
    pub category_max_distinct: usize,

    #[serde(rename = "analysis.maxQuestions")]
    pub max_questions: usize,

    // Artifacts
    #[serde(rename = "artifacts.retentionSecs")]
    pub retention_secs: u64,

    #[serde(rename = "artifacts.dir")]
    pub artifacts_dir: Option<PathBuf>, // None = in-memory store
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            // Session
            workbook_ttl_secs: 3600,
            idle_timeout_secs: 900,
            max_retries: 3,
            // Classifier
            confidence_threshold: 0.6,
            classifier_timeout_ms: 2000,
            // Compiler
            fuzzy_threshold: 0.85,
            // Analysis
            sample_limit: 200,
            category_max_distinct: 20,
            max_questions: 8,
            // Artifacts
            retention_secs: 86_400,
            artifacts_dir: None,
        }
    }
}

/// Error reading an explicitly named settings file.
#[derive(Debug)]
pub enum SettingsError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(serde_json::Error),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "cannot read {}: {}", path.display(), source),
            Self::Parse(e) => write!(f, "invalid settings: {}", e),
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(e) => Some(e),
        }
    }
}

/// Drop whole-line `//` comments so the file can be annotated.
fn strip_comments(contents: &str) -> String {
    contents
        .lines()
        .filter(|line| !line.trim().starts_with("//"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sheetwright");
        config_dir.join("settings.json")
    }

    /// Parse settings text. Missing keys keep their defaults.
    pub fn from_json_str(contents: &str) -> Result<Self, SettingsError> {
        serde_json::from_str(&strip_comments(contents)).map_err(SettingsError::Parse)
    }

    /// Read an explicit settings file. Errors are returned, not swallowed.
    pub fn from_path(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Load settings from the default location, falling back to defaults
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            log::debug!("no settings at {}, using defaults", path.display());
            return Self::default();
        }

        match Self::from_path(&path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("{e}; using default settings");
                Self::default()
            }
        }
    }

    /// Write the default settings file, with comments, if none exists.
    pub fn write_default_file() -> Result<PathBuf, String> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        fs::write(&path, DEFAULT_FILE).map_err(|e| e.to_string())?;
        Ok(path)
    }

    pub fn workbook_ttl(&self) -> Duration {
        Duration::from_secs(self.workbook_ttl_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_millis(self.classifier_timeout_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

const DEFAULT_FILE: &str = r#"{
    // Session lifetimes (seconds)
    "session.workbookTtlSecs": 3600,
    "session.idleTimeoutSecs": 900,

    // Unresolved free-text turns before falling back to no changes
    "session.maxRetries": 3,

    // Intent classifier
    "classifier.confidenceThreshold": 0.6,
    "classifier.timeoutMs": 2000,

    // Column name matching (0.0 - 1.0)
    "compiler.fuzzyThreshold": 0.85,

    // Schema analysis
    "analysis.sampleLimit": 200,
    "analysis.categoryMaxDistinct": 20,
    "analysis.maxQuestions": 8,

    // Artifacts (null dir = keep in memory)
    "artifacts.retentionSecs": 86400,
    "artifacts.dir": null
}
"#;
