//! Application configuration for MediaLens.
//!
//! User config lives at `~/.medialens/medialens.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MediaLensError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "medialens.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".medialens";

// ---------------------------------------------------------------------------
// Config structs (matching medialens.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Question sets handed to the interpreter.
    #[serde(default)]
    pub questions: QuestionsConfig,

    /// Subprocess collaborator bridge.
    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub deploy: DeployConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root directory of job artifacts and staged output.
    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    /// Path of the libSQL state database.
    #[serde(default = "default_state_db")]
    pub state_db: String,

    /// Sites in presentation order.
    #[serde(default = "default_sites")]
    pub sites: Vec<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
            state_db: default_state_db(),
            sites: default_sites(),
        }
    }
}

fn default_working_dir() -> String {
    "working".into()
}
fn default_state_db() -> String {
    "working/state/medialens.db".into()
}
fn default_sites() -> Vec<String> {
    vec![
        "www.cnn.com".into(),
        "www.bbc.com".into(),
        "www.foxnews.com".into(),
    ]
}

/// `[questions]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionsConfig {
    #[serde(default = "default_daily_questions")]
    pub daily: Vec<String>,

    #[serde(default = "default_weekly_questions")]
    pub weekly: Vec<String>,
}

impl Default for QuestionsConfig {
    fn default() -> Self {
        Self {
            daily: default_daily_questions(),
            weekly: default_weekly_questions(),
        }
    }
}

fn default_daily_questions() -> Vec<String> {
    vec![
        "What are the most important news stories today?".into(),
        "Which topics does this outlet emphasise most?".into(),
        "What is the overall tone of the coverage?".into(),
    ]
}
fn default_weekly_questions() -> Vec<String> {
    vec![
        "What were the dominant stories of the week?".into(),
        "How did the outlet's focus shift over the week?".into(),
        "Which stories received sustained coverage?".into(),
    ]
}

/// `[bridge]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Interpreter used to launch the bridge script.
    #[serde(default = "default_bridge_cmd")]
    pub cmd: String,

    /// Bridge script path; relative paths resolve from the bridge working directory.
    #[serde(default = "default_bridge_script")]
    pub script: String,

    /// Working directory of the bridge process. Defaults to the current directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            cmd: default_bridge_cmd(),
            script: default_bridge_script(),
            working_dir: None,
        }
    }
}

fn default_bridge_cmd() -> String {
    "python3".into()
}
fn default_bridge_script() -> String {
    "bridge/main.py".into()
}

/// `[deploy]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Prefix prepended to every published object path.
    #[serde(default = "default_remote_prefix")]
    pub remote_prefix: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            remote_prefix: default_remote_prefix(),
        }
    }
}

fn default_remote_prefix() -> String {
    "public_html".into()
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub working_dir: PathBuf,
    pub state_db: PathBuf,
    /// Sites in presentation order; governs merge order inside windows.
    pub sites: Vec<String>,
    pub daily_questions: Vec<String>,
    pub weekly_questions: Vec<String>,
    pub remote_prefix: String,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            working_dir: PathBuf::from(&config.defaults.working_dir),
            state_db: PathBuf::from(&config.defaults.state_db),
            sites: config.defaults.sites.clone(),
            daily_questions: config.questions.daily.clone(),
            weekly_questions: config.questions.weekly.clone(),
            remote_prefix: config.deploy.remote_prefix.clone(),
        }
    }
}

impl PipelineConfig {
    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sites.is_empty() {
            return Err(MediaLensError::config("at least one site must be configured"));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = self.sites.iter().find(|s| !seen.insert(s.as_str())) {
            return Err(MediaLensError::config(format!("site '{dup}' listed twice")));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.medialens/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| MediaLensError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.medialens/medialens.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| MediaLensError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| MediaLensError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| MediaLensError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = render_config(&AppConfig::default())?;

    std::fs::write(&path, content).map_err(|e| MediaLensError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Serialize a config as pretty TOML.
pub fn render_config(config: &AppConfig) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| MediaLensError::config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let toml_str = render_config(&AppConfig::default()).expect("serialize default config");
        assert!(toml_str.contains("working_dir"));
        assert!(toml_str.contains("www.foxnews.com"));
        assert!(toml_str.contains("remote_prefix"));
    }

    #[test]
    fn config_roundtrip() {
        let toml_str = render_config(&AppConfig::default()).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.sites.len(), 3);
        assert_eq!(parsed.bridge.cmd, "python3");
        assert!(parsed.bridge.working_dir.is_none());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
sites = ["b.example", "a.example"]

[deploy]
remote_prefix = "site"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.sites, vec!["b.example", "a.example"]);
        assert_eq!(config.defaults.working_dir, "working");
        assert_eq!(config.deploy.remote_prefix, "site");
        assert!(!config.questions.daily.is_empty());
    }

    #[test]
    fn pipeline_config_from_app_config() {
        let pipeline = PipelineConfig::from(&AppConfig::default());
        assert_eq!(pipeline.working_dir, PathBuf::from("working"));
        assert_eq!(pipeline.sites[0], "www.cnn.com");
        assert!(pipeline.validate().is_ok());
    }

    #[test]
    fn pipeline_config_rejects_bad_sites() {
        let mut pipeline = PipelineConfig::from(&AppConfig::default());
        pipeline.sites.clear();
        assert!(pipeline.validate().is_err());

        pipeline.sites = vec!["a.example".into(), "a.example".into()];
        let err = pipeline.validate().unwrap_err();
        assert!(err.to_string().contains("listed twice"));
    }
}
