//! File state — the resolution table from planner-supplied filenames to
//! on-disk paths.
//!
//! The planner often names files the way the traceback did (`etl.py`) rather
//! than where they live (`src/etl.py`). Resolution walks a fixed chain:
//! explicit mapping, literal path under the working directory, the primary
//! error file, then the first discovered file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileState {
    /// Debugging-relevant files found during seeding, cwd-relative.
    pub discovered_files: Vec<String>,
    /// The file most implicated by the initial traceback, if any.
    pub primary_error_file: Option<String>,
    /// Short name → actual cwd-relative path.
    pub file_mappings: HashMap<String, String>,
    pub working_directory: PathBuf,
}

impl FileState {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            discovered_files: Vec::new(),
            primary_error_file: None,
            file_mappings: HashMap::new(),
            working_directory: working_directory.into(),
        }
    }

    /// Resolve a requested path to the best candidate. Falls back to the
    /// request unchanged so the caller's existence check produces the error.
    pub fn resolve(&self, requested: &str) -> String {
        if let Some(mapped) = self.file_mappings.get(requested) {
            return mapped.clone();
        }
        if self.working_directory.join(requested).is_file() {
            return requested.to_string();
        }
        if let Some(primary) = &self.primary_error_file {
            return primary.clone();
        }
        if let Some(first) = self.discovered_files.first() {
            return first.clone();
        }
        requested.to_string()
    }

    /// Build short-name mappings from traceback-mentioned files.
    ///
    /// Each traceback file's basename maps to a discovered file whose name
    /// equals the basename, or failing that contains the basename's stem.
    /// Only discovered files are ever mapped, so every target exists.
    pub fn build_mappings(&mut self, traceback_files: &[String]) {
        for traceback_file in traceback_files {
            let basename = Path::new(traceback_file)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| traceback_file.clone());
            let stem = Path::new(&basename)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| basename.clone());

            let target = self
                .discovered_files
                .iter()
                .find(|f| file_name_of(f) == basename)
                .or_else(|| {
                    self.discovered_files
                        .iter()
                        .find(|f| file_name_of(f).contains(&stem))
                });

            if let Some(target) = target {
                self.file_mappings.insert(basename, target.clone());
            }
        }
    }

    /// Normalize a possibly absolute path back to cwd-relative for cached state.
    pub fn relativize(&self, path: &str) -> String {
        Path::new(path)
            .strip_prefix(&self.working_directory)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| path.to_string())
    }
}

fn file_name_of(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}
