use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::layout::{Col2ImStrategy, ExecutionMode, Executor, Parallel, DEFAULT_PARALLEL_THRESHOLD};

/// Environment variable overriding the dataset root.
pub const DATA_DIR_ENV: &str = "EXLIB_DATA_DIR";

/// Runtime settings for the layout executor and the dataset loaders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExlibConfig {
    /// Which realization runs im2col/col2im.
    pub execution: ExecutionMode,
    /// Column size (elements) at which `auto` switches to parallel.
    pub parallel_threshold: usize,
    /// Size of a dedicated rayon pool; `None` shares the global pool.
    pub num_threads: Option<usize>,
    pub col2im_strategy: Col2ImStrategy,
    /// Root directory holding the decoded corpora.
    pub data_dir: PathBuf,
}

impl Default for ExlibConfig {
    fn default() -> Self {
        Self {
            execution: ExecutionMode::Auto,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            num_threads: None,
            col2im_strategy: Col2ImStrategy::Gather,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl ExlibConfig {
    /// Defaults, overlaid with `path` (JSON) when given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("cannot read config {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("invalid config {}", path.display()))?
            }
            None => Self::default(),
        };
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
            log::debug!("{DATA_DIR_ENV} overrides data_dir");
            config.data_dir = PathBuf::from(dir);
        }
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.num_threads != Some(0),
            "num_threads must be at least 1 when set"
        );
        Ok(())
    }

    /// Build the executor these settings describe.
    pub fn executor(&self) -> Result<Executor> {
        self.validate()?;
        let parallel = match self.num_threads {
            Some(n) => Parallel::with_threads(n).context("failed to build rayon thread pool")?,
            None => Parallel::new(),
        };
        Ok(Executor::new(self.execution)
            .with_threshold(self.parallel_threshold)
            .with_parallel(parallel.with_strategy(self.col2im_strategy)))
    }

    /// Resolve the dataset directory, searching standard locations.
    ///
    /// Search order:
    /// 1. The configured `data_dir` (if it exists)
    /// 2. `./data`
    /// 3. `{exe_dir}/../data`, `{exe_dir}/../../data`, `{exe_dir}/data`
    ///
    /// Falls back to the configured path so error messages name it.
    pub fn resolve_data_dir(&self) -> PathBuf {
        let canonicalize = |p: PathBuf| -> PathBuf { p.canonicalize().unwrap_or(p) };

        if self.data_dir.is_dir() {
            return canonicalize(self.data_dir.clone());
        }
        let cwd = PathBuf::from("data");
        if cwd.is_dir() {
            return canonicalize(cwd);
        }
        if let Ok(exe) = std::env::current_exe() {
            if let Some(exe_dir) = exe.parent() {
                for rel in &["../data", "../../data", "data"] {
                    let candidate = exe_dir.join(rel);
                    if candidate.is_dir() {
                        return canonicalize(candidate);
                    }
                }
            }
        }
        self.data_dir.clone()
    }
}
