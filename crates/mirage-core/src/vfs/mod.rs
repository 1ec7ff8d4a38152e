//! Virtual file and directory surface.
//!
//! Artifact readers (ROM, BIOS, patch, save, replay) and the directories
//! they live in are consumed through these traits so frontends can supply
//! archive-backed or in-memory implementations. The std-fs flavor lives in
//! [`fs`], an in-memory flavor in [`mem`].

use std::io::{self, Read, Seek, SeekFrom, Write};

pub mod fs;
pub mod mem;

pub use fs::FsDir;
pub use mem::{MemDir, MemFile};

/// A seekable artifact handle. Closing is dropping.
pub trait VFile: Read + Write + Seek + Send {}

impl VFile for std::fs::File {}
impl VFile for io::Cursor<Vec<u8>> {}

/// How a directory member is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing file, read only.
    Read,
    /// Read-write, created when missing.
    ReadWrite,
    /// Write-only, created, truncated.
    Truncate,
}

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VDirEntry {
    pub name: String,
}

/// A listable directory of artifacts. Closing is dropping.
pub trait VDir: Send {
    /// Restart iteration from the first entry.
    fn rewind(&mut self);

    fn list_next(&mut self) -> Option<VDirEntry>;

    fn open_file(&mut self, name: &str, mode: OpenMode) -> io::Result<Box<dyn VFile>>;
}

/// Total size of `file`, restoring the current position.
pub fn file_size(file: &mut dyn VFile) -> io::Result<u64> {
    let pos = file.stream_position()?;
    let end = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(pos))?;
    Ok(end)
}

fn file_stem(name: &str) -> &str {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    }
}

/// Opens `<stem of source_name><suffix>` in `dir`, falling back to
/// `<fallback><suffix>` when no source name is known. Used for the save
/// file associated with a ROM.
pub fn open_sibling(
    dir: &mut dyn VDir,
    source_name: Option<&str>,
    fallback: &str,
    suffix: &str,
    mode: OpenMode,
) -> io::Result<Box<dyn VFile>> {
    let stem = source_name.map(file_stem).unwrap_or(fallback);
    dir.open_file(&format!("{stem}{suffix}"), mode)
}

/// Opens the next unused `<stem><infix><n><suffix>` in `dir`, scanning
/// existing entries for the highest `n` already taken. Used for
/// auto-numbered screenshot files.
pub fn open_increment_file(
    dir: &mut dyn VDir,
    source_name: Option<&str>,
    fallback: &str,
    infix: &str,
    suffix: &str,
) -> io::Result<Box<dyn VFile>> {
    let stem = source_name.map(file_stem).unwrap_or(fallback);
    let prefix = format!("{stem}{infix}");
    let mut next = 1u32;
    dir.rewind();
    while let Some(entry) = dir.list_next() {
        if let Some(rest) = entry.name.strip_prefix(&prefix)
            && let Some(index) = rest.strip_suffix(suffix)
            && let Ok(index) = index.parse::<u32>()
        {
            next = next.max(index + 1);
        }
    }
    dir.open_file(&format!("{prefix}{next}{suffix}"), OpenMode::Truncate)
}

#[cfg(test)]
#[path = "../tests/vfs_helpers.rs"]
mod tests;
