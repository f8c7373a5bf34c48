//! Build result handed back to the caller.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use walkdir::WalkDir;

use crate::config::{BUILDER_ID, BuildConfig};

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactMetadata {
    pub generated_data: Map<String, Value>,
    pub disk_name: String,
    pub disk_size: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub builder_id: String,
    pub directory: PathBuf,
    pub files: Vec<PathBuf>,
    pub metadata: ArtifactMetadata,
}

/// Every regular file below `dir`, sorted.
pub fn list_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

impl Artifact {
    pub fn collect(config: &BuildConfig, generated_data: Map<String, Value>) -> Self {
        Self {
            builder_id: BUILDER_ID.to_string(),
            directory: config.output_directory.clone(),
            files: list_files(&config.output_directory),
            metadata: ArtifactMetadata {
                generated_data,
                disk_name: config.disk.name.clone(),
                disk_size: config.disk.size.clone(),
            },
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VM files in directory: {}", self.directory.display())?;
        for file in &self.files {
            write!(f, "\n  {}", file.display())?;
        }
        Ok(())
    }
}
