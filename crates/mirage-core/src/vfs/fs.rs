//! Std-fs implementation of the virtual directory surface.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use super::{OpenMode, VDir, VDirEntry, VFile};

/// A directory on the host file system.
pub struct FsDir {
    path: PathBuf,
    entries: Vec<String>,
    cursor: usize,
}

impl FsDir {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = scan(&path)?;
        Ok(Self {
            path,
            entries,
            cursor: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn scan(path: &Path) -> io::Result<Vec<String>> {
    let mut entries: Vec<String> = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    entries.sort();
    Ok(entries)
}

impl VDir for FsDir {
    fn rewind(&mut self) {
        if let Ok(entries) = scan(&self.path) {
            self.entries = entries;
        }
        self.cursor = 0;
    }

    fn list_next(&mut self) -> Option<VDirEntry> {
        let name = self.entries.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(VDirEntry { name })
    }

    fn open_file(&mut self, name: &str, mode: OpenMode) -> io::Result<Box<dyn VFile>> {
        let mut options = OpenOptions::new();
        match mode {
            OpenMode::Read => options.read(true),
            OpenMode::ReadWrite => options.read(true).write(true).create(true),
            OpenMode::Truncate => options.write(true).create(true).truncate(true),
        };
        let file = options.open(self.path.join(name))?;
        Ok(Box::new(file))
    }
}
