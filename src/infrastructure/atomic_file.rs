//! Temp-file-then-rename writes shared by the output writer and the
//! checkpoint store.
//!
//! Staging files live next to their target (same filesystem, so the rename
//! is atomic) and are named `.<target>.<random>.tmp`. A crash between
//! staging and rename leaves such an orphan behind; `remove_orphans`
//! sweeps them on the next run.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use tempfile::{Builder, NamedTempFile};

const STAGING_SUFFIX: &str = ".tmp";

/// Creates an empty staging file next to `target`
pub fn stage_for(target: &Path) -> io::Result<NamedTempFile> {
    let dir = parent_dir(target);
    std::fs::create_dir_all(dir)?;
    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(STAGING_SUFFIX)
        .tempfile_in(dir)
}

/// Flushes and fsyncs `staged`, renames it over `target`, then fsyncs the
/// directory so the rename itself survives a crash.
pub fn commit(mut staged: NamedTempFile, target: &Path) -> io::Result<()> {
    staged.as_file_mut().flush()?;
    staged.as_file().sync_all()?;
    staged.persist(target).map_err(|e| e.error)?;
    sync_dir(parent_dir(target))
}

/// Atomically replaces `target` with `bytes`
pub fn write_atomically(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut staged = stage_for(target)?;
    staged.write_all(bytes)?;
    commit(staged, target)
}

/// Removes staging files orphaned by an interrupted write in `dir`
pub fn remove_orphans(dir: &Path) -> io::Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with('.') && name.ends_with(STAGING_SUFFIX) && entry.file_type()?.is_file() {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

// Directories cannot be opened for syncing on Windows; rename durability
// there relies on the filesystem journal.
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
