//! Per-user directories for bhyve-image-builder.
//!
//! - Cache: `$XDG_CACHE_HOME/bhyve-image-builder/` (downloaded install media)
//! - Logs:  `$XDG_DATA_HOME/bhyve-image-builder/logs/`
//!
//! Falls back to `~/.cache` and `~/.local/share` when the XDG variables are
//! unset.

use std::path::{Path, PathBuf};

use tracing::info;

const APP_NAME: &str = "bhyve-image-builder";

#[derive(Debug, Clone)]
pub struct BuilderPaths {
    /// Regenerable downloads
    pub cache: PathBuf,
    /// File logs when `BHYVE_BUILD_LOG=1`
    pub logs: PathBuf,
}

impl BuilderPaths {
    /// Resolve all paths from the user's home directory.
    /// Nothing is created until `ensure()` is called.
    pub fn resolve() -> Option<Self> {
        let home = std::env::var("HOME").ok().map(PathBuf::from)?;
        Some(Self {
            cache: resolve_cache_dir(&home),
            logs: resolve_log_dir(&home),
        })
    }

    /// Create all directories that don't already exist.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [&self.cache, &self.logs] {
            if !dir.is_dir() {
                std::fs::create_dir_all(dir)?;
                info!("created directory: {}", dir.display());
            }
        }
        Ok(())
    }

    /// Where an install image downloaded from `url` is stored.
    pub fn iso_cache_file(&self, url: &url::Url) -> PathBuf {
        let name = url
            .path_segments()
            .and_then(|segments| segments.last())
            .filter(|s| !s.is_empty())
            .unwrap_or("install.iso");
        self.cache.join("iso").join(name)
    }
}

fn resolve_cache_dir(home: &Path) -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg).join(APP_NAME)
    } else {
        home.join(".cache").join(APP_NAME)
    }
}

fn resolve_log_dir(home: &Path) -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg).join(APP_NAME).join("logs")
    } else {
        home.join(".local").join("share").join(APP_NAME).join("logs")
    }
}
