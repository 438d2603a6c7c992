//! Trainer configuration stored under `.trainer/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use super::write_atomic;

/// Trainer configuration (TOML).
///
/// Edited by humans; every field is optional and missing fields fall back to
/// the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrainerConfig {
    /// Wall-clock bound for a single check.
    pub check_timeout_secs: u64,

    /// Keep at most this many bytes of stdout and of stderr per check.
    pub output_limit_bytes: usize,

    /// Quiet period before a burst of edits to one exercise triggers a check.
    pub debounce_ms: u64,

    /// How many times to try establishing the filesystem watcher.
    pub watch_retries: u32,

    /// Check the focused exercise as soon as `watch` starts.
    pub check_on_start: bool,

    pub run_all: RunAllConfig,

    pub toolchain: ToolchainConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunAllConfig {
    pub scope: RunAllScope,
    /// Keep checking after the first failure instead of stopping there.
    pub continue_on_failure: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunAllScope {
    /// Every exercise up to and including the first one that is not done.
    #[default]
    UpToFirstOpen,
    /// The whole collection.
    All,
}

/// How exercises are executed. The engine never decides this itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Command for `run` mode; the exercise path is appended.
    pub run: Vec<String>,
    /// Command for `test` mode; the exercise path is appended.
    pub test: Vec<String>,
    /// Working directory for checks, relative to the workspace root.
    pub workdir: Option<PathBuf>,
    /// Extra environment variables for checks.
    pub env: BTreeMap<String, String>,
}

impl Default for RunAllConfig {
    fn default() -> Self {
        Self {
            scope: RunAllScope::UpToFirstOpen,
            continue_on_failure: false,
        }
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            run: vec!["python3".to_string()],
            test: ["python3", "-m", "pytest", "-q", "--tb=short", "--no-header"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            workdir: None,
            env: BTreeMap::new(),
        }
    }
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            check_timeout_secs: 10,
            output_limit_bytes: 100_000,
            debounce_ms: 200,
            watch_retries: 3,
            check_on_start: true,
            run_all: RunAllConfig::default(),
            toolchain: ToolchainConfig::default(),
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.check_timeout_secs == 0 {
            return Err(anyhow!("check_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.debounce_ms == 0 {
            return Err(anyhow!("debounce_ms must be > 0"));
        }
        if self.watch_retries == 0 {
            return Err(anyhow!("watch_retries must be > 0"));
        }
        if self.toolchain.run.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!("toolchain.run must be a non-empty array"));
        }
        if self.toolchain.test.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!("toolchain.test must be a non-empty array"));
        }
        Ok(())
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `TrainerConfig::default()`.
pub fn load_config(path: &Path) -> Result<TrainerConfig> {
    if !path.exists() {
        let cfg = TrainerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: TrainerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &TrainerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf).with_context(|| format!("write config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, TrainerConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = TrainerConfig::default();
        cfg.run_all.scope = RunAllScope::All;
        cfg.toolchain.env.insert("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string());
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "check_timeout_secs = 3\n\n[run_all]\ncontinue_on_failure = true\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.check_timeout(), Duration::from_secs(3));
        assert!(cfg.run_all.continue_on_failure);
        assert_eq!(cfg.run_all.scope, RunAllScope::UpToFirstOpen);
        assert_eq!(cfg.toolchain, ToolchainConfig::default());
    }

    #[test]
    fn empty_toolchain_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[toolchain]\nrun = []\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("toolchain.run"), "{err:#}");
    }
}
