//! `depot.toml` configuration
//!
//! The configuration supplies everything around the packaging core: the cache
//! key, the paths to package, codec and hash choices, the overwrite policy and
//! where archives are staged and stored.

use crate::key::CacheKey;
use crate::logging::LoggingConfig;
use crate::{Error, Result};
use depot_archive::{
    CompressionAlgorithm, HashAlgorithm, OverwritePolicy, PathSet, Resolved, RestoreOptions,
    WriteOptions,
};
use dirs::{cache_dir, home_dir};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name searched for by [`DepotConfig::discover`]
pub const CONFIG_FILE_NAME: &str = "depot.toml";

/// Environment variable providing the branch when the file does not
pub const BRANCH_ENV: &str = "DEPOT_BRANCH";

/// Environment variable overriding the store directory
pub const STORE_DIR_ENV: &str = "DEPOT_STORE_DIR";

/// What a digest mismatch after restore does
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyMode {
    /// Mismatch is an error
    #[default]
    Strict,
    /// Mismatch is logged and reported
    Warn,
}

/// Depot configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DepotConfig {
    /// Project identity used in the cache key
    pub project: String,

    /// Branch identity; falls back to `DEPOT_BRANCH`, then `main`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Branches tried in order when the branch has no entry
    #[serde(default)]
    pub fallback_branches: Vec<String>,

    /// Absolute paths to cache
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    /// Paths relative to `project_root`
    #[serde(default)]
    pub relative_paths: Vec<PathBuf>,

    /// Base for `relative_paths`; defaults to the directory of the config file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_root: Option<PathBuf>,

    /// Codec for stored archives
    #[serde(default)]
    pub compression: CompressionAlgorithm,

    /// Codec level, codec default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_level: Option<i32>,

    /// Digest algorithm
    #[serde(default)]
    pub hash: HashAlgorithm,

    /// Conflict handling on restore
    #[serde(default)]
    pub overwrite: OverwritePolicy,

    /// Directory archive entries are restored under
    #[serde(default = "default_restore_root")]
    pub restore_root: PathBuf,

    /// Normalize tar headers for reproducible archives
    #[serde(default)]
    pub deterministic: bool,

    /// Digest mismatch handling
    #[serde(default)]
    pub verify: VerifyMode,

    /// Local object store root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,

    /// Where staging files are created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,

    /// Tracing setup
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_restore_root() -> PathBuf {
    PathBuf::from("/")
}

impl DepotConfig {
    /// Minimal configuration for `project` with every other field defaulted
    #[must_use]
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            branch: None,
            fallback_branches: Vec::new(),
            paths: Vec::new(),
            relative_paths: Vec::new(),
            project_root: None,
            compression: CompressionAlgorithm::default(),
            compression_level: None,
            hash: HashAlgorithm::default(),
            overwrite: OverwritePolicy::default(),
            restore_root: default_restore_root(),
            deterministic: false,
            verify: VerifyMode::default(),
            store_dir: None,
            temp_dir: None,
            logging: LoggingConfig::default(),
        }
    }

    /// Load and validate a config file; `project_root` defaults to its directory
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::configuration(format!("Failed to read {}: {e}", path.display())))?;
        let mut config = Self::from_toml_str(&content)?;
        if config.project_root.is_none() {
            config.project_root = path.parent().map(Path::to_path_buf);
        }
        debug!(path = %path.display(), project = %config.project, "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::configuration(format!("Failed to parse configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::configuration(format!("Failed to serialize configuration: {e}")))
    }

    /// Find the nearest `depot.toml` in `start` or one of its ancestors
    #[must_use]
    pub fn discover(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.project.trim().is_empty() {
            return Err(Error::configuration("project must not be empty"));
        }
        if let Some(level) = self.compression_level {
            self.compression.check_level(level)?;
        }
        if let Some(branch) = &self.branch
            && branch.trim().is_empty()
        {
            return Err(Error::configuration("branch must not be empty"));
        }
        if self.fallback_branches.iter().any(|b| b.trim().is_empty()) {
            return Err(Error::configuration("fallback branches must not be empty"));
        }
        Ok(())
    }

    /// Effective branch: configured, else `DEPOT_BRANCH`, else `main`
    #[must_use]
    pub fn branch(&self) -> String {
        self.branch
            .clone()
            .or_else(|| non_empty_env(BRANCH_ENV))
            .unwrap_or_else(|| "main".to_string())
    }

    /// Key of the entry this configuration saves to
    pub fn cache_key(&self) -> Result<CacheKey> {
        CacheKey::new(self.project.clone(), self.branch())
    }

    /// Keys tried on restore, primary branch first
    pub fn restore_candidates(&self) -> Result<Vec<CacheKey>> {
        self.cache_key()?
            .candidates(self.fallback_branches.iter().cloned())
    }

    /// Base for relative paths: configured root, else the working directory
    pub fn project_root(&self) -> Result<PathBuf> {
        match &self.project_root {
            Some(root) => Ok(root.clone()),
            None => std::env::current_dir().map_err(|e| Error::io_no_path(e, "current_dir")),
        }
    }

    /// Merge, check and normalize the configured paths
    pub fn resolve_paths(&self) -> Result<Resolved> {
        let root = self.project_root()?;
        Ok(PathSet::resolve(&self.paths, &self.relative_paths, &root)?)
    }

    /// Directory for staging files
    #[must_use]
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Root of the local object store: configured, else the first writable default
    pub fn store_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.store_dir {
            return Ok(dir.clone());
        }
        store_root_from_inputs(StoreInputs {
            depot_store_dir: non_empty_env(STORE_DIR_ENV).map(PathBuf::from),
            xdg_cache_home: non_empty_env("XDG_CACHE_HOME").map(PathBuf::from),
            os_cache_dir: cache_dir(),
            home_dir: home_dir(),
            temp_dir: std::env::temp_dir(),
        })
    }

    /// Packaging options
    #[must_use]
    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            compression: self.compression,
            compression_level: self.compression_level,
            hash: self.hash,
            deterministic: self.deterministic,
        }
    }

    /// Restore options for an archive stored with `compression` and hashed with `hash`
    #[must_use]
    pub fn restore_options(
        &self,
        compression: CompressionAlgorithm,
        hash: HashAlgorithm,
    ) -> RestoreOptions {
        RestoreOptions {
            compression,
            hash,
            overwrite: self.overwrite,
            destination: self.restore_root.clone(),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

/// Inputs for determining the store directory
#[derive(Debug, Clone)]
struct StoreInputs {
    depot_store_dir: Option<PathBuf>,
    xdg_cache_home: Option<PathBuf>,
    os_cache_dir: Option<PathBuf>,
    home_dir: Option<PathBuf>,
    temp_dir: PathBuf,
}

fn store_root_from_inputs(inputs: StoreInputs) -> Result<PathBuf> {
    // Resolution order (first writable wins):
    // 1) DEPOT_STORE_DIR (explicit override)
    // 2) XDG_CACHE_HOME/depot/store
    // 3) OS cache dir/depot/store
    // 4) ~/.depot/store
    // 5) TMPDIR/depot/store (fallback)
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(dir) = inputs.depot_store_dir {
        candidates.push(dir);
    }
    if let Some(xdg) = inputs.xdg_cache_home {
        candidates.push(xdg.join("depot/store"));
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("depot/store"));
    }
    if let Some(home) = inputs.home_dir {
        candidates.push(home.join(".depot/store"));
    }
    candidates.push(inputs.temp_dir.join("depot/store"));

    for path in candidates {
        // Nix build sandboxes point HOME here
        if path.starts_with("/homeless-shelter") {
            continue;
        }
        // Existing directories may be read-only in CI
        if path.exists() {
            let probe = path.join(".write_probe");
            if std::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&probe)
                .is_ok()
            {
                let _ = std::fs::remove_file(&probe);
                return Ok(path);
            }
            continue;
        }
        if std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        }
    }
    Err(Error::configuration(
        "Failed to determine a writable store directory",
    ))
}
