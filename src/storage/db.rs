//! SQLite storage layer for the knowledge base

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;

use super::models::{DirChild, DirId, NoteChild, NoteId, Parent, Permission};
use crate::install::InstallError;

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create a brand new database file.
    ///
    /// The path is claimed with create-new semantics, so an existing file
    /// is never opened, truncated or otherwise touched: the call fails with
    /// [`InstallError::DatabaseExists`] instead.
    pub fn create_new(path: &Path) -> Result<Self> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(InstallError::DatabaseExists(path.to_path_buf()).into());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", path.display()));
            }
        }

        match Self::connect(path) {
            Ok(db) => Ok(db),
            Err(e) => {
                let _ = fs::remove_file(path);
                Err(e)
            }
        }
    }

    /// Open an existing database
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            anyhow::bail!("Database {} does not exist", path.display());
        }
        Self::connect(path)
    }

    fn connect(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    /// Start the installation transaction.
    ///
    /// Nothing written through the returned [`Installation`] is persisted
    /// until [`Installation::commit`] is called.
    pub fn begin(&mut self) -> Result<Installation<'_>> {
        let tx = self
            .conn
            .transaction()
            .context("Failed to start installation transaction")?;
        Ok(Installation { tx })
    }

    // ==================== Inspection ====================

    /// Number of rows in `kb_notes`
    pub fn count_notes(&self) -> Result<usize> {
        self.count("kb_notes")
    }

    /// Number of rows in `kb_dirs`
    pub fn count_dirs(&self) -> Result<usize> {
        self.count("kb_dirs")
    }

    fn count(&self, table: &str) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .with_context(|| format!("Failed to count rows in {table}"))?;
        Ok(count as usize)
    }

    /// Notes directly under `parent`, in insertion order
    pub fn note_children(&self, parent: Parent) -> Result<Vec<NoteChild>> {
        let mut stmt = self.conn.prepare(
            "SELECT parent_id, child_id, child_name FROM kb_note_children
             WHERE parent_id IS ?1
             ORDER BY child_id",
        )?;
        let rows = stmt.query_map(params![parent], |row| {
            Ok(NoteChild {
                parent: row.get(0)?,
                child: row.get(1)?,
                name: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list note children")
    }

    /// Subdirectories directly under `parent`, in insertion order
    pub fn dir_children(&self, parent: Parent) -> Result<Vec<DirChild>> {
        let mut stmt = self.conn.prepare(
            "SELECT parent_id, child_id, child_name FROM kb_dir_children
             WHERE parent_id IS ?1
             ORDER BY child_id",
        )?;
        let rows = stmt.query_map(params![parent], |row| {
            Ok(DirChild {
                parent: row.get(0)?,
                child: row.get(1)?,
                name: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list directory children")
    }

    /// Text of a note
    pub fn note_content(&self, id: NoteId) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT content FROM kb_notes WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to get note")
    }

    /// All permission rows, in the order they were granted
    pub fn permissions(&self) -> Result<Vec<Permission>> {
        let mut stmt = self.conn.prepare(
            "SELECT user, edit_kb, receive_feedback FROM permissions ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], Self::row_to_permission)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list permissions")
    }

    fn row_to_permission(row: &Row) -> rusqlite::Result<Permission> {
        Ok(Permission {
            user: row.get(0)?,
            edit_kb: row.get(1)?,
            receive_feedback: row.get(2)?,
        })
    }
}

/// Write side of an installation, backed by a single transaction.
///
/// Dropping an `Installation` without committing rolls back the schema and
/// every row written through it.
pub struct Installation<'a> {
    tx: Transaction<'a>,
}

impl Installation<'_> {
    /// Run the schema bootstrap script.
    ///
    /// The script must not manage transactions itself.
    pub fn bootstrap(&self, script: &str) -> Result<()> {
        self.tx
            .execute_batch(script)
            .context("Failed to run bootstrap script")
    }

    // ==================== Notes ====================

    /// Insert a note and return its identifier
    pub fn insert_note(&self, content: &str) -> Result<NoteId> {
        self.tx
            .execute("INSERT INTO kb_notes (content) VALUES (?1)", params![content])
            .context("Failed to insert note")?;
        Ok(NoteId(self.tx.last_insert_rowid()))
    }

    /// Attach a note to a directory (or the root)
    pub fn link_note(&self, parent: Parent, child: NoteId, name: &str) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO kb_note_children (parent_id, child_id, child_name) VALUES (?1, ?2, ?3)",
                params![parent, child, name],
            )
            .with_context(|| format!("Failed to attach note '{name}'"))?;
        Ok(())
    }

    // ==================== Directories ====================

    /// Insert a directory and return its identifier
    pub fn insert_dir(&self) -> Result<DirId> {
        self.tx
            .execute("INSERT INTO kb_dirs DEFAULT VALUES", [])
            .context("Failed to insert directory")?;
        Ok(DirId(self.tx.last_insert_rowid()))
    }

    /// Attach a directory to its parent directory (or the root)
    pub fn link_dir(&self, parent: Parent, child: DirId, name: &str) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO kb_dir_children (parent_id, child_id, child_name) VALUES (?1, ?2, ?3)",
                params![parent, child, name],
            )
            .with_context(|| format!("Failed to attach directory '{name}'"))?;
        Ok(())
    }

    // ==================== Permissions ====================

    /// Write a permission row. Repeated grants for the same user produce
    /// repeated rows.
    pub fn grant(&self, permission: &Permission) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO permissions (user, edit_kb, receive_feedback) VALUES (?1, ?2, ?3)",
                params![
                    permission.user,
                    permission.edit_kb,
                    permission.receive_feedback
                ],
            )
            .with_context(|| format!("Failed to grant permissions to @{}", permission.user))?;
        Ok(())
    }

    /// Persist everything written so far
    pub fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .context("Failed to commit installation transaction")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const BOOTSTRAP: &str = include_str!("../../sql/bootstrap.sql");

    /// Creates a bootstrapped database in a temporary directory.
    /// Returns the Database instance and the temp directory (which must be kept alive).
    fn create_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().expect("Failed to create temp directory");
        let mut db = Database::create_new(&dir.path().join("test.sqlite"))
            .expect("Failed to create test database");
        let tx = db.begin().expect("Failed to begin");
        tx.bootstrap(BOOTSTRAP).expect("Failed to bootstrap");
        tx.commit().expect("Failed to commit");
        (db, dir)
    }

    #[test]
    fn test_create_new_refuses_existing_file() {
        let dir = tempdir().expect("Failed to create temp directory");
        let path = dir.path().join("test.sqlite");
        fs::write(&path, b"keep me").unwrap();

        let err = Database::create_new(&path).err().expect("Should refuse");
        match err.downcast_ref::<InstallError>() {
            Some(InstallError::DatabaseExists(p)) => assert_eq!(p, &path),
            other => panic!("Unexpected error: {other:?}"),
        }
        assert_eq!(fs::read(&path).unwrap(), b"keep me");
    }

    #[test]
    fn test_create_new_fails_in_missing_directory() {
        let dir = tempdir().expect("Failed to create temp directory");
        let path = dir.path().join("nope").join("test.sqlite");

        let err = Database::create_new(&path).err().expect("Should fail");
        assert!(err.downcast_ref::<InstallError>().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_open_missing_database_fails() {
        let dir = tempdir().expect("Failed to create temp directory");
        assert!(Database::open(&dir.path().join("missing.sqlite")).is_err());
    }

    #[test]
    fn test_empty_database_after_bootstrap() {
        let (db, _dir) = create_test_db();
        assert_eq!(db.count_notes().unwrap(), 0);
        assert_eq!(db.count_dirs().unwrap(), 0);
        assert!(db.note_children(None).unwrap().is_empty());
        assert!(db.dir_children(None).unwrap().is_empty());
        assert!(db.permissions().unwrap().is_empty());
    }

    #[test]
    fn test_insert_and_link_notes_and_dirs() {
        let (mut db, _dir) = create_test_db();

        let tx = db.begin().unwrap();
        let top = tx.insert_note("top level").unwrap();
        tx.link_note(None, top, "top.txt").unwrap();
        let sub = tx.insert_dir().unwrap();
        tx.link_dir(None, sub, "sub").unwrap();
        let nested = tx.insert_note("nested").unwrap();
        tx.link_note(Some(sub), nested, "nested.txt").unwrap();
        tx.commit().unwrap();

        assert_eq!(db.count_notes().unwrap(), 2);
        assert_eq!(db.count_dirs().unwrap(), 1);

        let root_notes = db.note_children(None).unwrap();
        assert_eq!(
            root_notes,
            vec![NoteChild {
                parent: None,
                child: top,
                name: "top.txt".to_string()
            }]
        );

        let root_dirs = db.dir_children(None).unwrap();
        assert_eq!(root_dirs.len(), 1);
        assert_eq!(root_dirs[0].child, sub);
        assert_eq!(root_dirs[0].name, "sub");

        let sub_notes = db.note_children(Some(sub)).unwrap();
        assert_eq!(sub_notes.len(), 1);
        assert_eq!(sub_notes[0].parent, Some(sub));
        assert_eq!(
            db.note_content(sub_notes[0].child).unwrap().as_deref(),
            Some("nested")
        );
    }

    #[test]
    fn test_link_to_unknown_directory_violates_foreign_key() {
        let (mut db, _dir) = create_test_db();

        let tx = db.begin().unwrap();
        let note = tx.insert_note("orphan").unwrap();
        assert!(tx.link_note(Some(DirId(42)), note, "orphan.txt").is_err());
    }

    #[test]
    fn test_dropped_installation_rolls_back() {
        let (mut db, _dir) = create_test_db();

        {
            let tx = db.begin().unwrap();
            let note = tx.insert_note("never committed").unwrap();
            tx.link_note(None, note, "ghost.txt").unwrap();
            tx.grant(&Permission::admin("ghost")).unwrap();
        }

        assert_eq!(db.count_notes().unwrap(), 0);
        assert!(db.note_children(None).unwrap().is_empty());
        assert!(db.permissions().unwrap().is_empty());
    }

    #[test]
    fn test_repeated_grants_are_kept() {
        let (mut db, _dir) = create_test_db();

        let tx = db.begin().unwrap();
        tx.grant(&Permission::admin("alice")).unwrap();
        tx.grant(&Permission::admin("bob")).unwrap();
        tx.grant(&Permission::admin("alice")).unwrap();
        tx.commit().unwrap();

        let users: Vec<String> = db
            .permissions()
            .unwrap()
            .into_iter()
            .map(|p| p.user)
            .collect();
        assert_eq!(users, vec!["alice", "bob", "alice"]);
    }

    #[test]
    fn test_note_content_missing() {
        let (db, _dir) = create_test_db();
        assert_eq!(db.note_content(NoteId(1)).unwrap(), None);
    }
}
