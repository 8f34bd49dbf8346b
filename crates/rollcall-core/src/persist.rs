//! Whole-file replacement for files shared with concurrent readers.
//!
//! Content is written to a temporary file in the destination directory and
//! renamed over the target only once fully written and synced. Readers see
//! either the previous complete file or the new one.

use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically replace `path` with whatever `write` produces.
///
/// Parent directories are created on demand. If `write` fails the target is
/// left untouched and the temporary file is removed.
pub fn write_atomic<F>(path: &Path, write: F) -> std::io::Result<()>
where
    F: FnOnce(&mut dyn Write) -> std::io::Result<()>,
{
    let mut tmp = staging_file(path, ".tmp")?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        write(&mut writer)?;
        writer.flush()?;
    }
    commit(tmp, path)
}

/// Like [`write_atomic`] for writers that insist on opening a path themselves.
///
/// `write` receives a staging path in the destination directory ending in
/// `suffix`; some writers pick their output format from the extension.
pub fn replace_with_file<F>(path: &Path, suffix: &str, write: F) -> std::io::Result<()>
where
    F: FnOnce(&Path) -> std::io::Result<()>,
{
    let tmp = staging_file(path, suffix)?;
    write(tmp.path())?;
    commit(tmp, path)
}

fn staging_file(path: &Path, suffix: &str) -> std::io::Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    tempfile::Builder::new()
        .prefix(".rollcall-")
        .suffix(suffix)
        .tempfile_in(dir)
}

fn commit(tmp: NamedTempFile, path: &Path) -> std::io::Result<()> {
    // Reopen: path-based writers replace the staging file's contents behind
    // the handle we hold.
    std::fs::File::open(tmp.path())?.sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    tracing::debug!(path = %path.display(), "file replaced");
    Ok(())
}
