use std::net::TcpListener;
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::errors::BuildError;

/// Directory names excluded from listings and size scans. These are build
/// artifacts the agent regenerates; walking them would dominate the scan.
const EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "target",
    "dist",
    "build",
    ".next",
    "__pycache__",
];

/// Upper bound on sequential port probes before giving up.
const MAX_PORT_ATTEMPTS: u16 = 100;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FileEntry {
    /// Path relative to the listed directory, `/`-separated.
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileContent {
    pub content: String,
    pub size: u64,
    pub extension: Option<String>,
}

/// Allocates and inspects per-project workspace directories.
///
/// The workspace for a project is written only by that project's pipeline
/// task and the agent process it spawns; this type only ever creates
/// directories and reads, so concurrent browse calls never block a build.
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, BuildError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Idempotently create `<root>/<project_id>`. Filesystem errors
    /// propagate; an existing directory is not an error.
    pub fn create_workspace(&self, project_id: &str) -> Result<PathBuf, BuildError> {
        let path = self.root.join(project_id);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Depth-bounded recursive listing. Artifact directories are excluded
    /// by name; directories sort before files, then lexicographically.
    pub fn list_files(&self, path: &Path, max_depth: usize) -> Result<Vec<FileEntry>, BuildError> {
        let mut entries = Vec::new();
        for entry in WalkDir::new(path)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_excluded(e.path()))
        {
            let entry = entry.map_err(|e| {
                BuildError::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "walk error")
                }))
            })?;
            let relative = entry
                .path()
                .strip_prefix(path)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let metadata = entry.metadata().map_err(|e| {
                BuildError::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "metadata error")
                }))
            })?;
            entries.push(FileEntry {
                path: relative,
                is_dir: metadata.is_dir(),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
            });
        }
        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.path.cmp(&b.path)));
        Ok(entries)
    }

    /// Read a file inside a workspace. Fails with `ProjectNotFound`-adjacent
    /// `NotFound` semantics when the path is missing or escapes the
    /// workspace root (`..` traversal).
    pub fn read_file(&self, workspace: &Path, relative: &str) -> Result<FileContent, BuildError> {
        let rel = Path::new(relative);
        if rel.is_absolute() {
            return Err(not_found(relative));
        }
        let candidate = workspace.join(rel);

        // Canonicalization resolves `..` and symlinks; a missing file fails
        // here and maps to the same NotFound the caller sees for traversal.
        let resolved = candidate.canonicalize().map_err(|_| not_found(relative))?;
        let workspace_canonical = workspace.canonicalize().map_err(|_| not_found(relative))?;
        if !resolved.starts_with(&workspace_canonical) {
            return Err(not_found(relative));
        }

        let content = std::fs::read_to_string(&resolved)?;
        let size = content.len() as u64;
        let extension = resolved
            .extension()
            .map(|e| e.to_string_lossy().to_string());
        Ok(FileContent {
            content,
            size,
            extension,
        })
    }

    /// Probe sequentially upward from `start` for a bindable local port.
    /// Binds and immediately drops the listener; bounded at
    /// `MAX_PORT_ATTEMPTS` probes so the loop never runs away.
    pub fn find_free_port(&self, start: u16) -> Result<u16, BuildError> {
        for offset in 0..MAX_PORT_ATTEMPTS {
            let port = match start.checked_add(offset) {
                Some(p) => p,
                None => break,
            };
            if TcpListener::bind(("127.0.0.1", port)).is_ok() {
                return Ok(port);
            }
        }
        Err(BuildError::Io(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            format!(
                "No free port in range {}..{}",
                start,
                start.saturating_add(MAX_PORT_ATTEMPTS)
            ),
        )))
    }

    /// Recursive byte sum of a workspace, skipping artifact directories.
    pub fn workspace_size(&self, path: &Path) -> Result<u64, BuildError> {
        let mut total = 0u64;
        for entry in WalkDir::new(path)
            .into_iter()
            .filter_entry(|e| !is_excluded(e.path()))
            .flatten()
        {
            if entry.file_type().is_file() {
                if let Ok(metadata) = entry.metadata() {
                    total += metadata.len();
                }
            }
        }
        Ok(total)
    }
}

fn is_excluded(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| EXCLUDED_DIRS.contains(&name))
        .unwrap_or(false)
}

fn not_found(relative: &str) -> BuildError {
    BuildError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("File not found in workspace: {}", relative),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager() -> (TempDir, WorkspaceManager) {
        let dir = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(dir.path().join("workspaces")).unwrap();
        (dir, manager)
    }

    #[test]
    fn test_create_workspace_is_idempotent() {
        let (_dir, manager) = manager();
        let first = manager.create_workspace("p1").unwrap();
        let second = manager.create_workspace("p1").unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
    }

    #[test]
    fn test_list_files_excludes_artifact_dirs() {
        let (_dir, manager) = manager();
        let ws = manager.create_workspace("p1").unwrap();
        std::fs::create_dir_all(ws.join("src")).unwrap();
        std::fs::create_dir_all(ws.join("node_modules/react")).unwrap();
        std::fs::write(ws.join("src/index.ts"), "export {}").unwrap();
        std::fs::write(ws.join("node_modules/react/index.js"), "x").unwrap();
        std::fs::write(ws.join("package.json"), "{}").unwrap();

        let entries = manager.list_files(&ws, 5).unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"src"));
        assert!(paths.contains(&"src/index.ts"));
        assert!(paths.contains(&"package.json"));
        assert!(!paths.iter().any(|p| p.contains("node_modules")));
    }

    #[test]
    fn test_list_files_dirs_sort_before_files() {
        let (_dir, manager) = manager();
        let ws = manager.create_workspace("p1").unwrap();
        std::fs::write(ws.join("a.txt"), "a").unwrap();
        std::fs::create_dir_all(ws.join("zdir")).unwrap();

        let entries = manager.list_files(&ws, 2).unwrap();
        assert!(entries[0].is_dir, "directory should sort first: {:?}", entries);
        assert_eq!(entries[0].path, "zdir");
        assert_eq!(entries[1].path, "a.txt");
    }

    #[test]
    fn test_list_files_respects_max_depth() {
        let (_dir, manager) = manager();
        let ws = manager.create_workspace("p1").unwrap();
        std::fs::create_dir_all(ws.join("a/b/c")).unwrap();
        std::fs::write(ws.join("a/b/c/deep.txt"), "x").unwrap();

        let shallow = manager.list_files(&ws, 2).unwrap();
        assert!(shallow.iter().all(|e| !e.path.contains("deep.txt")));
        let deep = manager.list_files(&ws, 4).unwrap();
        assert!(deep.iter().any(|e| e.path == "a/b/c/deep.txt"));
    }

    #[test]
    fn test_read_file_returns_content_and_extension() {
        let (_dir, manager) = manager();
        let ws = manager.create_workspace("p1").unwrap();
        std::fs::write(ws.join("main.rs"), "fn main() {}").unwrap();

        let file = manager.read_file(&ws, "main.rs").unwrap();
        assert_eq!(file.content, "fn main() {}");
        assert_eq!(file.size, 12);
        assert_eq!(file.extension.as_deref(), Some("rs"));
    }

    #[test]
    fn test_read_file_missing_is_not_found() {
        let (_dir, manager) = manager();
        let ws = manager.create_workspace("p1").unwrap();
        let err = manager.read_file(&ws, "nope.txt").unwrap_err();
        match err {
            BuildError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            other => panic!("Expected Io(NotFound), got {:?}", other),
        }
    }

    #[test]
    fn test_read_file_rejects_traversal() {
        let (dir, manager) = manager();
        let ws = manager.create_workspace("p1").unwrap();
        // A real file outside the workspace that traversal would reach
        std::fs::write(dir.path().join("secret.txt"), "secret").unwrap();

        let err = manager
            .read_file(&ws, "../../secret.txt")
            .unwrap_err();
        match err {
            BuildError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            other => panic!("Expected Io(NotFound), got {:?}", other),
        }
    }

    #[test]
    fn test_read_file_rejects_absolute_path() {
        let (_dir, manager) = manager();
        let ws = manager.create_workspace("p1").unwrap();
        assert!(manager.read_file(&ws, "/etc/hostname").is_err());
    }

    #[test]
    fn test_find_free_port_skips_bound_port() {
        let (_dir, manager) = manager();
        // Hold a port open, then ask for a port starting at it
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let held = listener.local_addr().unwrap().port();

        let port = manager.find_free_port(held).unwrap();
        assert!(port > held);
        drop(listener);
    }

    #[test]
    fn test_workspace_size_skips_node_modules() {
        let (_dir, manager) = manager();
        let ws = manager.create_workspace("p1").unwrap();
        std::fs::write(ws.join("app.js"), vec![b'x'; 100]).unwrap();
        std::fs::create_dir_all(ws.join("node_modules")).unwrap();
        std::fs::write(ws.join("node_modules/big.js"), vec![b'x'; 10_000]).unwrap();

        assert_eq!(manager.workspace_size(&ws).unwrap(), 100);
    }
}
