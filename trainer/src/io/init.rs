//! Workspace layout and `.trainer/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use super::backup::snapshot_exercises;
use super::catalog::load_catalog;
use super::config::{TrainerConfig, write_config};

/// All canonical paths for a trainer workspace root.
#[derive(Debug, Clone)]
pub struct TrainerPaths {
    pub root: PathBuf,
    pub exercises_dir: PathBuf,
    pub catalog_path: PathBuf,
    /// Paired test files, mirroring the exercise layout.
    pub tests_dir: PathBuf,
    /// Reference solutions, mirroring the exercise layout.
    pub solutions_dir: PathBuf,
    pub state_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub progress_path: PathBuf,
    pub backups_dir: PathBuf,
}

impl TrainerPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let exercises_dir = root.join("exercises");
        let state_dir = root.join(".trainer");
        Self {
            root: root.clone(),
            exercises_dir: exercises_dir.clone(),
            catalog_path: exercises_dir.join("info.toml"),
            tests_dir: root.join("tests"),
            solutions_dir: root.join("solutions"),
            state_dir: state_dir.clone(),
            gitignore_path: state_dir.join(".gitignore"),
            config_path: state_dir.join("config.toml"),
            progress_path: state_dir.join("progress.json"),
            backups_dir: state_dir.join("backups"),
        }
    }

    /// Absolute location of an exercise file given its catalog path.
    pub fn exercise_file(&self, relative: &Path) -> PathBuf {
        self.exercises_dir.join(relative)
    }

    /// Location of the pristine copy used by reset.
    pub fn backup_file(&self, relative: &Path) -> PathBuf {
        self.backups_dir.join(relative)
    }
}

/// Options for `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing config and existing backups.
    pub force: bool,
}

/// Create `.trainer/` in `root`: default config plus a backup of every
/// exercise file as it is right now.
///
/// Fails if `.trainer/` already exists unless `options.force` is set.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<TrainerPaths> {
    let paths = TrainerPaths::new(root);
    if paths.state_dir.exists() && !options.force {
        return Err(anyhow!(
            "trainer init: .trainer already exists (use --force to overwrite)"
        ));
    }
    if paths.state_dir.exists() && !paths.state_dir.is_dir() {
        return Err(anyhow!(
            "trainer init: .trainer exists but is not a directory"
        ));
    }

    let collection = load_catalog(&paths.catalog_path, &paths.exercises_dir, &paths.tests_dir)
        .context("trainer init needs a valid catalog")?;

    fs::create_dir_all(&paths.state_dir)
        .with_context(|| format!("create directory {}", paths.state_dir.display()))?;
    fs::write(&paths.gitignore_path, TRAINER_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &TrainerConfig::default())?;
    let copied = snapshot_exercises(&paths, &collection, options.force)?;

    info!(exercises = collection.len(), backups = copied, "workspace initialized");
    Ok(paths)
}

const TRAINER_GITIGNORE: &str = "progress.json\n*.tmp\n";
