//! Knowledge-base seeding and project scanning.
//!
//! Before the first planner call the orchestrator eagerly analyzes the failing
//! command's output, scans the project structure, and derives the file state.
//! The planner therefore acts with full project awareness on step 1 without
//! spending a tool invocation on discovery.

use std::path::Path;

use chrono::Utc;

use crate::context::{
    AgentContext, AnalysisNote, FileEntry, FileStructure, NoteKind, StructureMetadata,
};
use crate::error::TriageResult;
use crate::evolution;

/// Extensions treated as source code by the relevance filter and listings.
pub const CODE_EXTENSIONS: [&str; 15] = [
    "py", "js", "ts", "jsx", "tsx", "java", "cpp", "c", "rb", "go", "rs", "php", "swift", "kt",
    "cs",
];

/// Extensions treated as configuration by the relevance filter.
pub const CONFIG_EXTENSIONS: [&str; 7] = ["yaml", "yml", "env", "toml", "ini", "cfg", "conf"];

/// Directories never descended into during scans.
const SKIPPED_DIRS: [&str; 4] = ["node_modules", "__pycache__", "target", ".git"];

pub fn is_code_extension(ext: &str) -> bool {
    CODE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

/// The predicate selecting which scanned files enter the knowledge base.
pub fn is_relevant(entry: &FileEntry) -> bool {
    let name_lower = entry.name.to_lowercase();
    let ext_lower = entry.extension.to_lowercase();

    if is_code_extension(&ext_lower) {
        return true;
    }
    if (entry.name == "package.json" && entry.depth <= 1) || entry.name == "package-lock.json" {
        return true;
    }
    if CONFIG_EXTENSIONS.contains(&ext_lower.as_str()) {
        return true;
    }
    if ext_lower == "md" && entry.depth <= 1 {
        return true;
    }
    if name_lower.contains("requirements")
        || name_lower.contains("dockerfile")
        || name_lower.contains("makefile")
    {
        return true;
    }
    if entry.is_hidden && entry.size_bytes < 5_000 {
        return true;
    }
    if entry.depth <= 1 && entry.size_bytes < 1_000 {
        return true;
    }
    false
}

/// Recursively collect files up to `max_depth` path components below `root`.
pub fn scan_files(
    root: &Path,
    max_depth: usize,
    include_hidden: bool,
) -> std::io::Result<Vec<FileEntry>> {
    let mut entries = Vec::new();
    scan_into(root, root, 1, max_depth, include_hidden, &mut entries)?;
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

fn scan_into(
    root: &Path,
    dir: &Path,
    depth: usize,
    max_depth: usize,
    include_hidden: bool,
    out: &mut Vec<FileEntry>,
) -> std::io::Result<()> {
    if depth > max_depth {
        return Ok(());
    }
    for dir_entry in std::fs::read_dir(dir)? {
        let dir_entry = dir_entry?;
        let name = dir_entry.file_name().to_string_lossy().to_string();
        let is_hidden = name.starts_with('.');
        let path = dir_entry.path();
        let file_type = dir_entry.file_type()?;

        if file_type.is_dir() {
            if SKIPPED_DIRS.contains(&name.as_str()) || (is_hidden && !include_hidden) {
                continue;
            }
            scan_into(root, &path, depth + 1, max_depth, include_hidden, out)?;
        } else if file_type.is_file() {
            if is_hidden && !include_hidden {
                continue;
            }
            let metadata = dir_entry.metadata()?;
            let extension = path
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_default();
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string();
            out.push(FileEntry {
                path: relative,
                is_code_file: is_code_extension(&extension),
                name,
                extension,
                size_bytes: metadata.len(),
                depth,
                is_hidden,
            });
        }
    }
    Ok(())
}

/// Human-readable size, matching the style of directory listings.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Render a textual tree of the project, files annotated with sizes.
pub fn render_tree(root: &Path, max_depth: usize, include_hidden: bool) -> std::io::Result<String> {
    let root_label = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| root.to_string_lossy().to_string());
    let mut lines = vec![format!("{root_label}/")];
    render_dir(root, 1, max_depth, include_hidden, "", &mut lines)?;
    Ok(lines.join("\n"))
}

fn render_dir(
    dir: &Path,
    depth: usize,
    max_depth: usize,
    include_hidden: bool,
    prefix: &str,
    lines: &mut Vec<String>,
) -> std::io::Result<()> {
    if depth > max_depth {
        return Ok(());
    }
    let mut children: Vec<(String, bool, u64, std::path::PathBuf)> = Vec::new();
    for dir_entry in std::fs::read_dir(dir)? {
        let dir_entry = dir_entry?;
        let name = dir_entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') && !include_hidden {
            continue;
        }
        let file_type = dir_entry.file_type()?;
        if file_type.is_dir() {
            if SKIPPED_DIRS.contains(&name.as_str()) {
                continue;
            }
            children.push((name, true, 0, dir_entry.path()));
        } else if file_type.is_file() {
            let size = dir_entry.metadata()?.len();
            children.push((name, false, size, dir_entry.path()));
        }
    }
    // Directories first, then files, each alphabetical.
    children.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let count = children.len();
    for (i, (name, is_dir, size, path)) in children.into_iter().enumerate() {
        let last = i + 1 == count;
        let connector = if last { "└── " } else { "├── " };
        if is_dir {
            lines.push(format!("{prefix}{connector}{name}/"));
            let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
            render_dir(&path, depth + 1, max_depth, include_hidden, &child_prefix, lines)?;
        } else {
            lines.push(format!("{prefix}{connector}{name} ({})", format_size(size)));
        }
    }
    Ok(())
}

/// Scan and assemble the cached [`FileStructure`].
pub fn build_structure(
    root: &Path,
    max_depth: usize,
    include_hidden: bool,
) -> std::io::Result<FileStructure> {
    let all = scan_files(root, max_depth, include_hidden)?;
    let relevant: Vec<FileEntry> = all.iter().filter(|e| is_relevant(e)).cloned().collect();

    let mut extensions: Vec<String> = relevant
        .iter()
        .map(|e| e.extension.to_lowercase())
        .filter(|e| !e.is_empty())
        .collect();
    extensions.sort();
    extensions.dedup();

    let metadata = StructureMetadata {
        total_files: all.len(),
        relevant_files: relevant.len(),
        code_files: relevant.iter().filter(|e| e.is_code_file).count(),
        relevant_extensions: extensions,
        project_root: root.to_string_lossy().to_string(),
    };

    Ok(FileStructure {
        tree_structure: render_tree(root, max_depth, include_hidden)?,
        flat_files: relevant,
        metadata,
        max_depth,
        included_hidden: include_hidden,
        cached_at: Utc::now(),
    })
}

/// Populate the knowledge base and file state before the first planner call.
pub fn seed_knowledge_base(context: &mut AgentContext) -> TriageResult<()> {
    let combined = context.initial_command_run.combined_output();

    // Error analysis first so file-state derivation can use the traceback.
    let parsed = evolution::parse_error(&combined, 0);
    if let Some(error) = &parsed {
        context.record_note(AnalysisNote::new(
            NoteKind::InitialAnalysis,
            format!("Initial command failed with {}: {}", error.kind, error.message),
        ));
        for file in &error.file_refs {
            context.record_note(AnalysisNote::new(
                NoteKind::Traceback,
                format!("Traceback references {file}"),
            ));
        }
        context.update_error_state(&combined, 0);
    }

    let cwd = context.current_working_directory.clone();
    let structure = build_structure(&cwd, 3, false)?;

    context.file_state.discovered_files =
        structure.flat_files.iter().map(|e| e.path.clone()).collect();

    if let Some(error) = &context.current_blocking_error {
        let refs = error.file_refs.clone();
        context.file_state.build_mappings(&refs);
        // Primary error file only when the traceback file is actually known.
        let primary = refs.first().and_then(|first| {
            let basename = Path::new(first)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| first.clone());
            context
                .file_state
                .file_mappings
                .get(&basename)
                .cloned()
                .or_else(|| {
                    context
                        .file_state
                        .discovered_files
                        .iter()
                        .find(|f| f.as_str() == basename)
                        .cloned()
                })
        });
        context.file_state.primary_error_file = primary;
    }

    context.cache_structure(structure);
    Ok(())
}
