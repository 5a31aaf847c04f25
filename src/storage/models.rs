//! Data models for the knowledge-base database
//!
//! The knowledge base is a tree of directories and notes. Directories and
//! notes live in their own tables; edges between them are stored in the
//! `kb_dir_children` and `kb_note_children` tables.

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use std::fmt;

/// Row identifier of a note in `kb_notes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoteId(pub i64);

/// Row identifier of a directory in `kb_dirs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirId(pub i64);

/// Parent of a tree node. `None` is the knowledge-base root, which has no
/// row of its own and is stored as a NULL `parent_id`.
pub type Parent = Option<DirId>;

macro_rules! rowid_sql {
    ($ty:ident) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map($ty)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

rowid_sql!(NoteId);
rowid_sql!(DirId);

/// Edge from a directory (or the root) to a note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteChild {
    pub parent: Parent,
    pub child: NoteId,
    /// File name of the note as it appeared on disk
    pub name: String,
}

/// Edge from a directory (or the root) to a subdirectory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirChild {
    pub parent: Parent,
    pub child: DirId,
    /// Folder name as it appeared on disk
    pub name: String,
}

/// A row of the `permissions` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    /// Telegram user name, without the leading `@`
    pub user: String,

    /// May create, edit and delete knowledge-base items
    pub edit_kb: bool,

    /// Receives user feedback messages
    pub receive_feedback: bool,
}

impl Permission {
    /// Full privileges. The installer has no way to grant the flags
    /// separately.
    pub fn admin(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            edit_kb: true,
            receive_feedback: true,
        }
    }
}

/// Counts of rows written by one installation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InstallStats {
    /// Number of notes imported.
    pub notes: usize,
    /// Number of directories imported (the root is not counted).
    pub dirs: usize,
    /// Number of permission rows written.
    pub grants: usize,
}
