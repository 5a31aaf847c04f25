//! Knowledge-base source tree discovery.
//!
//! The knowledge base ships as a plain directory: every folder becomes a
//! directory in the database and every file becomes a note. This module
//! walks that directory and flattens it into a depth-first pre-order list
//! so the installer can insert parents before their children.

use anyhow::Result;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::install::InstallError;

/// Kind of a source entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A folder, imported as a directory.
    Dir,
    /// A file, imported as a note.
    Note,
}

/// A file or folder found under the source root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// Index of the parent entry in [`SourceTree::entries`], or `None` for
    /// immediate children of the source root.
    pub parent: Option<usize>,
    /// Base name exactly as it appears on disk
    pub name: String,
    /// Full path of the entry
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// The flattened contents of a knowledge-base source directory.
#[derive(Debug, Clone, Default)]
pub struct SourceTree {
    root: PathBuf,
    entries: Vec<SourceEntry>,
}

impl SourceTree {
    /// Scans `root` and everything below it.
    ///
    /// The root itself is not an entry. Siblings are ordered by name and
    /// symlinks are followed.
    pub fn scan(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(InstallError::MissingSourceDir(root.to_path_buf()).into());
        }

        let mut entries: Vec<SourceEntry> = Vec::new();
        // Entry indices of the directories on the current path, by depth.
        let mut ancestors: Vec<usize> = Vec::new();

        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name();

        for entry in walker {
            let entry = entry.map_err(|e| walk_error(root, e))?;
            let path = entry.path().to_path_buf();
            let name = entry
                .file_name()
                .to_str()
                .ok_or_else(|| InstallError::NonUtf8Name(path.clone()))?
                .to_string();
            let kind = if entry.file_type().is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::Note
            };

            ancestors.truncate(entry.depth() - 1);
            let parent = ancestors.last().copied();

            entries.push(SourceEntry {
                parent,
                name,
                path,
                kind,
            });

            if kind == EntryKind::Dir {
                ancestors.push(entries.len() - 1);
            }
        }

        Ok(Self {
            root: root.to_path_buf(),
            entries,
        })
    }

    /// The scanned source root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All entries, parents always before their children
    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    /// Number of files
    pub fn notes(&self) -> usize {
        self.count(EntryKind::Note)
    }

    /// Number of folders (the root is not counted)
    pub fn dirs(&self) -> usize {
        self.count(EntryKind::Dir)
    }

    fn count(&self, kind: EntryKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    /// Indented listing of the tree, one entry per line. Folders end with
    /// a slash.
    pub fn render(&self) -> String {
        let mut depth = vec![0usize; self.entries.len()];
        let mut out = String::new();
        for (i, entry) in self.entries.iter().enumerate() {
            let level = entry.parent.map_or(0, |p| depth[p] + 1);
            depth[i] = level;
            let suffix = if entry.kind == EntryKind::Dir { "/" } else { "" };
            let _ = writeln!(out, "{}{}{}", "  ".repeat(level), entry.name, suffix);
        }
        out
    }
}

fn walk_error(root: &Path, err: walkdir::Error) -> anyhow::Error {
    if let (Some(ancestor), Some(path)) = (err.loop_ancestor(), err.path()) {
        return anyhow::anyhow!(
            "Symlink loop: {} points back to {}",
            path.display(),
            ancestor.display()
        );
    }
    let at = err.path().unwrap_or(root).display().to_string();
    anyhow::Error::new(err).context(format!("Failed to read {at}"))
}
