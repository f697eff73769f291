//! Small filesystem helpers shared by the download and report stages.
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Collect every file under `root`, sorted for deterministic iteration.
pub fn collect_files_recursive(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !root.exists() {
        return Ok(files);
    }
    for entry in fs::read_dir(root).with_context(|| format!("read {}", root.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            files.extend(collect_files_recursive(&path)?);
        } else if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn display_path(path: &Path, base: Option<&Path>) -> String {
    if let Some(base) = base {
        if let Ok(relative) = path.strip_prefix(base) {
            return relative.display().to_string();
        }
    }
    path.display().to_string()
}

/// Copy one file, creating the destination's parent directories.
pub fn copy_file(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::copy(source, dest)
        .with_context(|| format!("copy {} to {}", source.display(), dest.display()))?;
    Ok(())
}

/// Recursively copy a directory tree.
pub fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    for file in collect_files_recursive(source)? {
        let rel = file.strip_prefix(source).context("strip copy prefix")?;
        copy_file(&file, &dest.join(rel))?;
    }
    Ok(())
}

/// Expand the configured glob under a base directory, returning matching
/// files relative to it.
pub fn glob_files(base: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = base.join(pattern);
    let full = full.to_string_lossy().to_string();
    let mut files = Vec::new();
    for entry in glob::glob(&full).with_context(|| format!("bad glob {pattern}"))? {
        let path = entry.context("walk glob")?;
        if path.is_file() {
            let rel = path.strip_prefix(base).unwrap_or(&path).to_path_buf();
            files.push(rel);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_files_returns_relative_sorted_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("g1/sub")).unwrap();
        fs::write(dir.path().join("g1/b.py"), "b").unwrap();
        fs::write(dir.path().join("g1/sub/a.py"), "a").unwrap();

        let files = glob_files(dir.path(), "**/*.py").unwrap();
        assert_eq!(
            files,
            vec![PathBuf::from("g1/b.py"), PathBuf::from("g1/sub/a.py")]
        );
    }

    #[test]
    fn copy_tree_preserves_layout() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::write(dir.path().join("src/nested/f.txt"), "body").unwrap();

        copy_tree(&dir.path().join("src"), &dir.path().join("dst")).unwrap();
        let copied = fs::read_to_string(dir.path().join("dst/nested/f.txt")).unwrap();
        assert_eq!(copied, "body");
    }
}
