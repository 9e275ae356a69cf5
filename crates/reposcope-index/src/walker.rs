//! Working-tree traversal with structural directory pruning.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{IndexError, Result};
use crate::languages::{Lang, detect_language};

/// Directory names that are never descended into.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    "__pycache__",
    ".next",
    "coverage",
    "target",
    ".venv",
    "venv",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
];

/// One file selected for chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub abs_path: PathBuf,
    /// Path relative to the walk root, `/`-separated.
    pub rel_path: String,
    pub lang: Lang,
}

/// Depth-first walker over a working tree.
#[derive(Debug, Clone)]
pub struct TreeWalker {
    excluded: Arc<HashSet<String>>,
}

impl Default for TreeWalker {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl TreeWalker {
    #[must_use]
    pub fn new(extra_excluded_dirs: &[String]) -> Self {
        let excluded = DEFAULT_EXCLUDED_DIRS
            .iter()
            .map(|s| (*s).to_string())
            .chain(extra_excluded_dirs.iter().cloned())
            .collect();
        Self {
            excluded: Arc::new(excluded),
        }
    }

    #[must_use]
    pub fn is_excluded(&self, dir_name: &str) -> bool {
        self.excluded.contains(dir_name)
    }

    /// Walk `root` and return every file with a supported extension and an
    /// enabled grammar.
    ///
    /// Entries are visited depth-first with siblings sorted by file name.
    /// Excluded directories are pruned before descent. Unreadable entries are
    /// logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error only if `root` is not a readable directory.
    pub fn walk(&self, root: &Path) -> Result<Vec<SourceFile>> {
        if !root.is_dir() {
            return Err(IndexError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("walk root is not a directory: {}", root.display()),
            )));
        }

        let excluded = Arc::clone(&self.excluded);
        let walker = ignore::WalkBuilder::new(root)
            .standard_filters(false)
            .follow_links(false)
            .sort_by_file_name(std::cmp::Ord::cmp)
            .filter_entry(move |entry| {
                if entry.depth() == 0 || !entry.file_type().is_some_and(|ft| ft.is_dir()) {
                    return true;
                }
                entry
                    .file_name()
                    .to_str()
                    .is_none_or(|name| !excluded.contains(name))
            })
            .build();

        let mut files = Vec::new();
        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let path = entry.path();
            let Some(lang) = detect_language(path).filter(|l| l.grammar().is_some()) else {
                continue;
            };
            files.push(SourceFile {
                abs_path: path.to_path_buf(),
                rel_path: relative_path(root, path),
                lang,
            });
        }

        tracing::debug!(root = %root.display(), files = files.len(), "walk complete");
        Ok(files)
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "x = 1\n").unwrap();
    }

    fn rel_paths(files: &[SourceFile]) -> Vec<&str> {
        files.iter().map(|f| f.rel_path.as_str()).collect()
    }

    #[test]
    fn excluded_dirs_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "src/app.py");
        touch(dir.path(), "node_modules/lib/index.js");
        touch(dir.path(), ".git/hooks/pre-commit.py");
        touch(dir.path(), "pkg/__pycache__/mod.py");
        touch(dir.path(), "dist/bundle.js");

        let files = TreeWalker::default().walk(dir.path()).unwrap();
        assert_eq!(rel_paths(&files), vec!["src/app.py"]);
    }

    #[test]
    fn unsupported_extensions_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "README.md");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "main.py");

        let files = TreeWalker::default().walk(dir.path()).unwrap();
        assert_eq!(rel_paths(&files), vec!["main.py"]);
        assert_eq!(files[0].lang, Lang::Python);
    }

    #[test]
    fn order_is_depth_first_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.py");
        touch(dir.path(), "a/z.py");
        touch(dir.path(), "a/m.py");
        touch(dir.path(), "c.py");

        let files = TreeWalker::default().walk(dir.path()).unwrap();
        assert_eq!(rel_paths(&files), vec!["a/m.py", "a/z.py", "b.py", "c.py"]);
    }

    #[test]
    fn extra_excluded_dirs_apply() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "vendor/x.py");
        touch(dir.path(), "src/y.py");

        let walker = TreeWalker::new(&["vendor".to_string()]);
        let files = walker.walk(dir.path()).unwrap();
        assert_eq!(rel_paths(&files), vec!["src/y.py"]);
    }

    #[test]
    fn excluded_name_as_file_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "build.py");

        let files = TreeWalker::default().walk(dir.path()).unwrap();
        assert_eq!(rel_paths(&files), vec!["build.py"]);
    }

    #[test]
    fn root_named_like_excluded_dir_is_walked() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("build");
        touch(&root, "main.py");

        let files = TreeWalker::default().walk(&root).unwrap();
        assert_eq!(rel_paths(&files), vec!["main.py"]);
    }

    #[test]
    fn hidden_files_are_not_filtered() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ".config/setup.py");

        let files = TreeWalker::default().walk(dir.path()).unwrap();
        assert_eq!(rel_paths(&files), vec![".config/setup.py"]);
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_subdirectory_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "ok/a.py");
        touch(dir.path(), "locked/b.py");
        let locked = dir.path().join("locked");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        if std::fs::read_dir(&locked).is_ok() {
            // Permission bits are not enforced for root.
            std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let result = TreeWalker::default().walk(dir.path());
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        let files = result.unwrap();
        assert_eq!(rel_paths(&files), vec!["ok/a.py"]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = TreeWalker::default().walk(&dir.path().join("nope"));
        assert!(matches!(result, Err(IndexError::Io(_))));
    }
}
