//! Filesystem tools: directory listing, file reads, content search, and the
//! project-structure view. All paths are resolved against the session working
//! directory and stored cwd-relative.

use std::path::Path;

use chrono::Utc;
use serde_json::json;

use crate::context::{AgentContext, CachedSearch, FileMeta, SampledFile, SearchMatch};
use crate::seed;

use super::{FileStructureParams, ListDirectoryParams, ReadFileParams, SearchParams, ToolConfig, ToolOutcome};

fn mtime_secs(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .map(|t| chrono::DateTime::<Utc>::from(t).timestamp())
        .unwrap_or(0)
}

// ─── list_directory_contents ────────────────────────────────────────────────

pub fn list_directory_contents(
    context: &mut AgentContext,
    params: &ListDirectoryParams,
) -> ToolOutcome {
    let requested = params.directory_path.as_deref().unwrap_or(".");
    let is_root = matches!(requested, "." | "" | "/" | "./");

    // Root listings reuse the seeded discovery instead of re-scanning.
    if is_root && !context.file_state.discovered_files.is_empty() {
        if let Some(structure) = &context.knowledge_base.file_structure {
            let entries: Vec<serde_json::Value> = structure
                .flat_files
                .iter()
                .map(|e| {
                    json!({
                        "name": e.name,
                        "type": "file",
                        "is_hidden": e.is_hidden,
                        "path": e.path,
                        "size_bytes": e.size_bytes,
                        "size_formatted": seed::format_size(e.size_bytes),
                        "extension": e.extension,
                        "is_code_file": e.is_code_file,
                        "depth": e.depth,
                    })
                })
                .collect();
            return ToolOutcome::success(json!({
                "directory": ".",
                "source": "cached_discovery",
                "entries": entries,
            }));
        }
    }

    let relative = context.file_state.relativize(requested);
    let absolute = context.current_working_directory.join(&relative);
    if !absolute.is_dir() {
        return ToolOutcome::error(format!("Directory not found: {relative}"));
    }

    let read = match std::fs::read_dir(&absolute) {
        Ok(read) => read,
        Err(e) => return ToolOutcome::error(format!("Cannot list {relative}: {e}")),
    };

    let base_depth = if is_root {
        0
    } else {
        Path::new(&relative).components().count()
    };

    let mut entries = Vec::new();
    let mut observed = Vec::new();
    for dir_entry in read.flatten() {
        let name = dir_entry.file_name().to_string_lossy().to_string();
        let is_hidden = name.starts_with('.');
        let Ok(file_type) = dir_entry.file_type() else {
            continue;
        };
        let Ok(metadata) = dir_entry.metadata() else {
            continue;
        };
        let entry_path = if is_root {
            name.clone()
        } else {
            format!("{relative}/{name}")
        };
        let extension = Path::new(&name)
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let is_file = file_type.is_file();

        if is_file {
            observed.push(crate::context::FileEntry {
                path: entry_path.clone(),
                name: name.clone(),
                extension: extension.clone(),
                size_bytes: metadata.len(),
                depth: base_depth + 1,
                is_hidden,
                is_code_file: seed::is_code_extension(&extension),
            });
        }

        entries.push(json!({
            "name": name,
            "type": if is_file { "file" } else { "directory" },
            "is_hidden": is_hidden,
            "path": entry_path,
            "size_bytes": metadata.len(),
            "size_formatted": seed::format_size(metadata.len()),
            "extension": extension,
            "is_code_file": is_file && seed::is_code_extension(&extension),
            "depth": base_depth + 1,
        }));
    }
    entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

    // Fold newly observed relevant files into the cached structure.
    if let Some(structure) = &mut context.knowledge_base.file_structure {
        for entry in observed {
            let known = structure.flat_files.iter().any(|f| f.path == entry.path);
            if !known && seed::is_relevant(&entry) {
                if !context.file_state.discovered_files.contains(&entry.path) {
                    context.file_state.discovered_files.push(entry.path.clone());
                }
                structure.metadata.relevant_files += 1;
                if entry.is_code_file {
                    structure.metadata.code_files += 1;
                }
                structure.flat_files.push(entry);
            }
        }
    }

    ToolOutcome::success(json!({
        "directory": relative,
        "source": "filesystem",
        "entries": entries,
    }))
}

// ─── read_file_content ──────────────────────────────────────────────────────

pub fn read_file_content(
    context: &mut AgentContext,
    params: &ReadFileParams,
    step_no: usize,
    cache_window: usize,
) -> ToolOutcome {
    let resolved = context.file_state.resolve(&params.file_path);
    let relative = context.file_state.relativize(&resolved);
    let absolute = context.current_working_directory.join(&relative);

    if !absolute.is_file() {
        return ToolOutcome::error(format!("File not found: {relative}"));
    }

    let metadata = match std::fs::metadata(&absolute) {
        Ok(m) => m,
        Err(e) => return ToolOutcome::error(format!("Cannot stat {relative}: {e}")),
    };
    let current_mtime = mtime_secs(&metadata);

    // Serve a fresh-enough cached read when the file is unchanged.
    let cached = context.knowledge_base.file_metadata.get(&relative).and_then(|meta| {
        let fresh = meta.mtime_secs == current_mtime
            && meta
                .last_read_step
                .map(|s| step_no.saturating_sub(s) <= cache_window)
                .unwrap_or(false);
        if fresh {
            context.knowledge_base.files_read.get(&relative).cloned()
        } else {
            None
        }
    });

    let (content, from_cache) = match cached {
        Some(content) => (content, true),
        None => match std::fs::read_to_string(&absolute) {
            Ok(content) => (content, false),
            Err(e) => return ToolOutcome::error(format!("Cannot read {relative}: {e}")),
        },
    };

    let total_lines = content.lines().count();
    if !from_cache {
        context.cache_file_read(
            relative.clone(),
            content.clone(),
            FileMeta {
                mtime_secs: current_mtime,
                size: metadata.len(),
                last_checked: Utc::now(),
                last_read_step: Some(step_no),
            },
        );
    }

    let selected = match (params.start_line, params.end_line) {
        (None, None) => content,
        (start, end) => {
            let start = start.unwrap_or(1).max(1);
            let end = end.unwrap_or(total_lines).min(total_lines.max(1));
            if start > end || start > total_lines {
                return ToolOutcome::error(format!(
                    "Invalid line range {start}..{end} for {relative} ({total_lines} lines)"
                ));
            }
            content
                .lines()
                .skip(start - 1)
                .take(end - start + 1)
                .collect::<Vec<_>>()
                .join("\n")
        }
    };

    ToolOutcome::success(json!({
        "file_path": relative,
        "content": selected,
        "total_lines": total_lines,
        "start_line": params.start_line,
        "end_line": params.end_line,
        "from_cache": from_cache,
    }))
}

// ─── search_file_content ────────────────────────────────────────────────────

pub fn search_cache_key(params: &SearchParams) -> String {
    let mut extensions: Vec<String> = params
        .file_extensions
        .iter()
        .map(|e| e.to_lowercase())
        .collect();
    extensions.sort();
    format!(
        "{}:{}:{}",
        params.search_pattern,
        extensions.join(","),
        params.max_results
    )
}

fn cached_search_valid(context: &AgentContext, cached: &CachedSearch, config: &ToolConfig) -> bool {
    let age = Utc::now()
        .signed_duration_since(cached.timestamp)
        .num_seconds();
    if age >= config.search_cache_ttl_secs {
        return false;
    }
    cached
        .searched_files_metadata
        .iter()
        .take(config.search_cache_sample)
        .all(|sample| {
            context
                .current_working_directory
                .join(&sample.path)
                .metadata()
                .map(|m| mtime_secs(&m) == sample.mtime_secs)
                .unwrap_or(false)
        })
}

pub fn search_file_content(
    context: &mut AgentContext,
    params: &SearchParams,
    config: &ToolConfig,
) -> ToolOutcome {
    if params.search_pattern.is_empty() {
        return ToolOutcome::error("search_pattern must not be empty");
    }
    if params.max_results == 0 {
        return ToolOutcome::error("max_results must be at least 1");
    }

    let key = search_cache_key(params);
    if let Some(cached) = context.knowledge_base.search_results.get(&key) {
        if cached_search_valid(context, cached, config) {
            return ToolOutcome::success(json!({
                "pattern": params.search_pattern,
                "results": cached.results,
                "files_searched": cached.files_searched,
                "from_cache": true,
            }));
        }
    }

    let extensions: Vec<String> = params
        .file_extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_lowercase())
        .collect();
    let pattern_lower = params.search_pattern.to_lowercase();

    let files = match seed::scan_files(&context.current_working_directory, 3, false) {
        Ok(files) => files,
        Err(e) => return ToolOutcome::error(format!("Scan failed: {e}")),
    };

    let mut matches = Vec::new();
    let mut sampled = Vec::new();
    let mut files_searched = 0;
    'files: for file in &files {
        if !extensions.is_empty() && !extensions.contains(&file.extension.to_lowercase()) {
            continue;
        }
        let absolute = context.current_working_directory.join(&file.path);
        let Ok(content) = std::fs::read_to_string(&absolute) else {
            continue;
        };
        files_searched += 1;
        if sampled.len() < config.search_cache_sample {
            if let Ok(metadata) = absolute.metadata() {
                sampled.push(SampledFile {
                    path: file.path.clone(),
                    mtime_secs: mtime_secs(&metadata),
                    size: metadata.len(),
                });
            }
        }
        for (line_no, line) in content.lines().enumerate() {
            if line.to_lowercase().contains(&pattern_lower) {
                matches.push(SearchMatch {
                    path: file.path.clone(),
                    line_number: line_no + 1,
                    line_content: line.trim_end().to_string(),
                });
                if matches.len() >= params.max_results {
                    break 'files;
                }
            }
        }
    }

    context.cache_search(
        key,
        CachedSearch {
            results: matches.clone(),
            files_searched,
            searched_files_metadata: sampled,
            timestamp: Utc::now(),
        },
    );

    ToolOutcome::success(json!({
        "pattern": params.search_pattern,
        "results": matches,
        "files_searched": files_searched,
        "from_cache": false,
    }))
}

// ─── get_file_structure ─────────────────────────────────────────────────────

pub fn get_file_structure(context: &mut AgentContext, params: &FileStructureParams) -> ToolOutcome {
    if let Some(cached) = &context.knowledge_base.file_structure {
        if cached.max_depth >= params.max_depth && cached.included_hidden == params.include_hidden {
            return ToolOutcome::success(json!({
                "tree_structure": cached.tree_structure,
                "metadata": cached.metadata,
                "from_cache": true,
            }));
        }
    }

    let structure = match seed::build_structure(
        &context.current_working_directory,
        params.max_depth,
        params.include_hidden,
    ) {
        Ok(structure) => structure,
        Err(e) => return ToolOutcome::error(format!("Structure scan failed: {e}")),
    };

    let payload = json!({
        "tree_structure": structure.tree_structure,
        "metadata": structure.metadata,
        "from_cache": false,
    });
    context.cache_structure(structure);
    ToolOutcome::success(payload)
}
