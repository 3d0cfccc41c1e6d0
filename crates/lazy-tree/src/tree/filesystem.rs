//! Filesystem loader built on lazy nodes

use crate::load::{LoadOutcome, ProgressEvent, ProgressFanout, TaskRunner};
use crate::tree::{LazyTreeNode, Loader, TreeNode};
use anyhow::{bail, Context};
use derive_more::Display;
use log::{debug, trace};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Whether an entry can have children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EntryKind {
    /// A directory, loaded lazily
    #[display(fmt = "Directory")]
    Directory,
    /// Anything else
    #[display(fmt = "File")]
    File,
}

/// Metadata for one filesystem entry
#[derive(Debug, Clone)]
pub struct FsEntry {
    /// The entry's name (not full path)
    pub name: String,
    /// Full path on the filesystem
    pub path: PathBuf,
    /// Directory or file
    pub kind: EntryKind,
    /// File size in bytes (0 for directories)
    pub size: u64,
    /// Last modified timestamp
    pub modified: Option<SystemTime>,
    /// File extension (if any)
    pub extension: Option<String>,
}

impl FsEntry {
    fn from_metadata(path: PathBuf, metadata: &fs::Metadata) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let (kind, size, extension) = if metadata.is_dir() {
            (EntryKind::Directory, 0, None)
        } else {
            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|s| s.to_string());
            (EntryKind::File, metadata.len(), extension)
        };

        Self {
            name,
            path,
            kind,
            size,
            modified: metadata.modified().ok(),
            extension,
        }
    }

    /// Returns true for directories
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

impl std::fmt::Display for FsEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            EntryKind::Directory => write!(f, "{}/", self.name),
            EntryKind::File => write!(f, "{} ({} bytes)", self.name, self.size),
        }
    }
}

/// Loads directory contents into lazy nodes
///
/// Each load reads one directory. Subdirectories become unloaded lazy
/// children sharing this loader and runner; files become plain nodes.
/// Children are ordered directories first, then by name.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemLoader;

impl FilesystemLoader {
    /// Create an unloaded lazy node for the directory at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the path doesn't exist or isn't a directory.
    pub fn open(
        path: impl AsRef<Path>,
        runner: Arc<dyn TaskRunner>,
    ) -> anyhow::Result<LazyTreeNode<FsEntry>> {
        let path = path.as_ref();
        let metadata = fs::metadata(path)
            .with_context(|| format!("failed to read metadata for {}", path.display()))?;
        if !metadata.is_dir() {
            bail!("{} is not a directory", path.display());
        }

        debug!("opening filesystem tree at {}", path.display());
        let root = FsEntry::from_metadata(path.to_path_buf(), &metadata);
        Ok(LazyTreeNode::new(root, FilesystemLoader, runner))
    }

    fn read_entries(dir: &Path) -> anyhow::Result<Vec<FsEntry>> {
        let mut entries = Vec::new();
        let read_dir =
            fs::read_dir(dir).with_context(|| format!("failed to read directory {}", dir.display()))?;

        for entry in read_dir {
            let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
            let metadata = entry
                .metadata()
                .with_context(|| format!("failed to stat {}", entry.path().display()))?;
            entries.push(FsEntry::from_metadata(entry.path(), &metadata));
        }

        // Directories first, then files, alphabetically within each group
        entries.sort_by(|a, b| match (a.kind, b.kind) {
            (EntryKind::Directory, EntryKind::File) => std::cmp::Ordering::Less,
            (EntryKind::File, EntryKind::Directory) => std::cmp::Ordering::Greater,
            _ => a.name.cmp(&b.name),
        });
        Ok(entries)
    }
}

impl Loader<FsEntry> for FilesystemLoader {
    fn load(
        &self,
        node: &LazyTreeNode<FsEntry>,
        progress: &ProgressFanout,
    ) -> anyhow::Result<LoadOutcome> {
        let dir = node.with_value(|entry| entry.path.clone());
        let entries = Self::read_entries(&dir)?;
        let total = entries.len() as u64;

        // A reload replaces whatever an earlier load produced
        node.clear_children();

        for (index, entry) in entries.into_iter().enumerate() {
            if progress.is_cancel_requested() {
                debug!("stopping load of {} after {} entries", dir.display(), index);
                return Ok(LoadOutcome::Cancelled);
            }

            trace!("adding {}", entry.path.display());
            let event = ProgressEvent::new(index as u64 + 1, total).with_message(entry.name.clone());
            if entry.is_dir() {
                node.add_lazy(entry);
            } else {
                node.add(TreeNode::new(entry));
            }
            progress.report(event);
        }

        Ok(LoadOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::{InlineRunner, TaskState};
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_tree() -> (TempDir, LazyTreeNode<FsEntry>) {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        // Create test structure:
        // root/
        //   file1.txt
        //   dir1/
        //     file2.txt
        //     dir2/
        //       file3.txt

        fs::write(root.join("file1.txt"), "content1").unwrap();
        fs::create_dir(root.join("dir1")).unwrap();
        fs::write(root.join("dir1/file2.txt"), "content2").unwrap();
        fs::create_dir(root.join("dir1/dir2")).unwrap();
        fs::write(root.join("dir1/dir2/file3.txt"), "content3").unwrap();

        let tree = FilesystemLoader::open(root, Arc::new(InlineRunner)).unwrap();
        (temp, tree)
    }

    fn child_names(node: &TreeNode<FsEntry>) -> Vec<String> {
        node.children()
            .iter()
            .map(|c| c.with_value(|e| e.name.clone()))
            .collect()
    }

    #[test]
    fn test_filesystem_tree_creation() {
        let (_temp, tree) = create_test_tree();
        assert_eq!(tree.node_count(), 1); // Only root exists initially
        assert!(tree.value().is_dir());
        assert!(!tree.is_loaded());
    }

    #[test]
    fn test_lazy_loading() {
        let (_temp, tree) = create_test_tree();

        let task = tree.load();
        assert_eq!(task.state(), TaskState::Succeeded);
        assert!(tree.is_loaded());
        assert_eq!(child_names(&tree), vec!["dir1", "file1.txt"]);

        let dir1 = tree.child_at(0).unwrap().as_lazy().unwrap();
        assert!(!dir1.is_loaded());
        assert_eq!(dir1.child_count(), 1);

        let file1 = tree.child_at(1).unwrap();
        assert!(file1.as_lazy().is_none());
        assert_eq!(file1.value().size, 8);
        assert_eq!(file1.value().extension.as_deref(), Some("txt"));
    }

    #[test]
    fn test_recursive_loading() {
        let (_temp, tree) = create_test_tree();
        tree.load_recursive().unwrap();

        // root, file1, dir1, file2, dir2, file3
        assert_eq!(tree.node_count(), 6);
    }

    #[test]
    fn test_reload_replaces_children() {
        let (temp, tree) = create_test_tree();
        tree.load();
        fs::write(temp.path().join("file0.txt"), "new").unwrap();

        tree.load();
        assert_eq!(child_names(&tree), vec!["dir1", "file0.txt", "file1.txt"]);
    }

    #[test]
    fn test_open_rejects_files() {
        let (temp, _tree) = create_test_tree();
        let err = FilesystemLoader::open(temp.path().join("file1.txt"), Arc::new(InlineRunner))
            .unwrap_err();
        assert!(err.to_string().contains("is not a directory"));
        assert!(FilesystemLoader::open(temp.path().join("missing"), Arc::new(InlineRunner)).is_err());
    }

    #[test]
    fn test_vanished_directory_fails_load() {
        let (temp, tree) = create_test_tree();
        tree.load();
        let dir1 = tree.child_at(0).unwrap().as_lazy().unwrap();
        fs::remove_dir_all(temp.path().join("dir1")).unwrap();

        let task = dir1.load();
        assert_eq!(task.state(), TaskState::Failed);
        assert!(!dir1.is_loaded());
        assert!(dir1.current_task().is_none());
    }
}
