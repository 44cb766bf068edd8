//! Derive a persisted-transcript JSONL path from a project directory
//! (spec.md §4.4 / §6): strip the leading `/`, replace every remaining
//! `/` with `-`, and prepend a single `-`, then join under
//! `~/.claude/projects/`.

use std::path::PathBuf;

/// `projects_root` is normally `~/.claude/projects`, passed in explicitly
/// rather than resolved from `$HOME` here so tests (and callers with a
/// non-standard home) can point it elsewhere.
pub fn session_log_dir(projects_root: &std::path::Path, project_dir: &str) -> PathBuf {
    let stripped = project_dir.strip_prefix('/').unwrap_or(project_dir);
    let mangled = format!("-{}", stripped.replace('/', "-"));
    projects_root.join(mangled)
}

pub fn session_log_path(
    projects_root: &std::path::Path,
    project_dir: &str,
    session_id: &str,
) -> PathBuf {
    session_log_dir(projects_root, project_dir).join(format!("{session_id}.jsonl"))
}
