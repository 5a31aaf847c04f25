//! Knowledge-base installation.
//!
//! Creates the bot database, runs the schema bootstrap script, imports the
//! knowledge-base source tree and grants admin privileges. Everything is
//! written in one transaction: if any step fails nothing is committed and
//! the database file created by this run is removed again.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::kb::{EntryKind, SourceTree};
use crate::storage::{Database, DirId, InstallStats, Installation, Permission};

/// File name of the database inside the target directory.
pub const DB_FILE_NAME: &str = "hse-eco-bot.sqlite";

/// Errors with a dedicated meaning for the installer.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// The target database file is already there.
    #[error(
        "{} already exists. Refusing to overwrite database. Remove it manually for a clean installation",
        .0.display()
    )]
    DatabaseExists(PathBuf),

    /// The knowledge-base source directory is missing or not a directory.
    #[error("Knowledge base directory {} not found", .0.display())]
    MissingSourceDir(PathBuf),

    /// The schema bootstrap script is missing.
    #[error("Bootstrap script {} not found", .0.display())]
    MissingBootstrap(PathBuf),

    /// A source file or folder name is not valid UTF-8 and cannot be
    /// stored as a child name.
    #[error("File name of {} is not valid UTF-8", .0.display())]
    NonUtf8Name(PathBuf),
}

/// Everything a single installation needs.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Directory in which the database is created
    pub db_dir: PathBuf,

    /// Users granted admin privileges, in order
    pub privileged_users: Vec<String>,

    /// Knowledge-base source directory
    pub kb_dir: PathBuf,

    /// Schema bootstrap script
    pub bootstrap_script: PathBuf,

    /// Only report what would be imported
    pub dry_run: bool,
}

impl InstallOptions {
    /// Full path of the database file
    pub fn db_path(&self) -> PathBuf {
        self.db_dir.join(DB_FILE_NAME)
    }
}

/// Runs the installation.
///
/// Fails with [`InstallError::DatabaseExists`] without touching anything if
/// the database file is already present.
pub fn install(options: &InstallOptions) -> Result<InstallStats> {
    let db_path = options.db_path();
    if db_path.exists() {
        return Err(InstallError::DatabaseExists(db_path).into());
    }

    if !options.bootstrap_script.is_file() {
        return Err(InstallError::MissingBootstrap(options.bootstrap_script.clone()).into());
    }
    let tree = SourceTree::scan(&options.kb_dir)?;

    if options.dry_run {
        return Ok(preview(&tree, &db_path, options));
    }

    println!(
        "Reading installation script from {}...",
        options.bootstrap_script.display()
    );
    let script = fs::read_to_string(&options.bootstrap_script).with_context(|| {
        format!(
            "Failed to read bootstrap script {}",
            options.bootstrap_script.display()
        )
    })?;

    let mut db = Database::create_new(&db_path)?;
    let guard = CreatedFile::new(&db_path);

    let result = write_all(&mut db, &script, &tree, &options.privileged_users);
    // The connection must be closed before the guard may remove the file.
    drop(db);
    let stats = result?;
    guard.keep();
    println!("{}", "All done".green().bold());
    tracing::info!(
        notes = stats.notes,
        dirs = stats.dirs,
        grants = stats.grants,
        "Installed {}",
        db_path.display()
    );
    Ok(stats)
}

fn write_all(
    db: &mut Database,
    script: &str,
    tree: &SourceTree,
    users: &[String],
) -> Result<InstallStats> {
    let tx = db.begin()?;

    tx.bootstrap(script)?;
    println!("{}", "Success".green());

    println!("Populating database with prepared notes...");
    let mut stats = import_tree(&tx, tree)?;
    println!("{}", "Success".green());

    for user in users {
        println!("Granting {} with admin privileges", format!("@{user}").cyan());
        tx.grant(&Permission::admin(user.as_str()))?;
        stats.grants += 1;
    }

    tx.commit()?;
    Ok(stats)
}

/// Inserts every entry of `tree` below the root.
///
/// Entries come parent-first, so the identifier of an entry's parent
/// directory is always known by the time the entry is inserted.
pub fn import_tree(tx: &Installation<'_>, tree: &SourceTree) -> Result<InstallStats> {
    let mut stats = InstallStats::default();
    let mut dir_ids: Vec<Option<DirId>> = Vec::with_capacity(tree.entries().len());

    for entry in tree.entries() {
        let parent = match entry.parent {
            Some(index) => Some(
                dir_ids[index]
                    .with_context(|| format!("Parent of {} is not a directory", entry.path.display()))?,
            ),
            None => None,
        };

        match entry.kind {
            EntryKind::Note => {
                let text = fs::read_to_string(&entry.path)
                    .with_context(|| format!("Failed to read {}", entry.path.display()))?;
                let id = tx.insert_note(trim_note(&text))?;
                tx.link_note(parent, id, &entry.name)?;
                tracing::debug!(note = %id, parent = ?parent.map(|p| p.0), "Imported note {}", entry.name);
                stats.notes += 1;
                dir_ids.push(None);
            }
            EntryKind::Dir => {
                let id = tx.insert_dir()?;
                tx.link_dir(parent, id, &entry.name)?;
                tracing::debug!(dir = %id, parent = ?parent.map(|p| p.0), "Imported directory {}", entry.name);
                stats.dirs += 1;
                dir_ids.push(Some(id));
            }
        }
    }

    Ok(stats)
}

/// Strips surrounding whitespace, counting the C0 information separators
/// (U+001C..U+001F) as whitespace too.
fn trim_note(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_whitespace() || ('\x1c'..='\x1f').contains(&c))
}

fn preview(tree: &SourceTree, db_path: &Path, options: &InstallOptions) -> InstallStats {
    println!(
        "{} {}",
        "Would create:".dimmed(),
        db_path.display().to_string().cyan()
    );
    println!(
        "{} {}",
        "Bootstrap script:".dimmed(),
        options.bootstrap_script.display()
    );
    println!("{} {}", "Knowledge base:".dimmed(), tree.root().display());
    print!("{}", tree.render());
    for user in &options.privileged_users {
        println!("{} @{user}", "Would grant admin privileges to".dimmed());
    }
    println!();
    println!(
        "{}",
        format!(
            "Dry run: would import {} notes in {} directories",
            tree.notes(),
            tree.dirs()
        )
        .bold()
    );

    InstallStats {
        notes: tree.notes(),
        dirs: tree.dirs(),
        grants: options.privileged_users.len(),
    }
}

/// Removes a file created by this run unless told to keep it.
struct CreatedFile<'a> {
    path: &'a Path,
    keep: bool,
}

impl<'a> CreatedFile<'a> {
    fn new(path: &'a Path) -> Self {
        Self { path, keep: false }
    }

    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for CreatedFile<'_> {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = fs::remove_file(self.path) {
            tracing::warn!("Failed to remove incomplete database {}: {}", self.path.display(), e);
        } else {
            tracing::debug!("Removed incomplete database {}", self.path.display());
        }
    }
}
