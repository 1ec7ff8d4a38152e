//! In-memory implementation of the virtual directory surface, for archive
//! adapters and tests.

use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

use super::{OpenMode, VDir, VDirEntry, VFile};

type SharedBuf = Arc<Mutex<Vec<u8>>>;

/// A file backed by a shared byte buffer. Writes are visible to every
/// handle opened from the same [`MemDir`] entry.
pub struct MemFile {
    data: SharedBuf,
    pos: u64,
}

impl MemFile {
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
            pos: 0,
        }
    }

    fn shared(data: SharedBuf) -> Self {
        Self { data, pos: 0 }
    }
}

impl Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.lock().expect("memory file poisoned");
        let start = (self.pos as usize).min(data.len());
        let n = (data.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut data = self.data.lock().expect("memory file poisoned");
        let start = self.pos as usize;
        if data.len() < start + buf.len() {
            data.resize(start + buf.len(), 0);
        }
        data[start..start + buf.len()].copy_from_slice(buf);
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.data.lock().expect("memory file poisoned").len() as i64;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => len + n,
            SeekFrom::Current(n) => self.pos as i64 + n,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

impl VFile for MemFile {}

/// A directory of shared byte buffers.
#[derive(Clone, Default)]
pub struct MemDir {
    files: Arc<Mutex<BTreeMap<String, SharedBuf>>>,
    cursor: usize,
}

impl MemDir {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, data: Vec<u8>) {
        self.files
            .lock()
            .expect("memory dir poisoned")
            .insert(name.into(), Arc::new(Mutex::new(data)));
    }

    /// Snapshot of a member's current contents.
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        let files = self.files.lock().expect("memory dir poisoned");
        let buf = files.get(name)?;
        Some(buf.lock().expect("memory file poisoned").clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.files
            .lock()
            .expect("memory dir poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

impl VDir for MemDir {
    fn rewind(&mut self) {
        self.cursor = 0;
    }

    fn list_next(&mut self) -> Option<VDirEntry> {
        let files = self.files.lock().expect("memory dir poisoned");
        let name = files.keys().nth(self.cursor)?.clone();
        self.cursor += 1;
        Some(VDirEntry { name })
    }

    fn open_file(&mut self, name: &str, mode: OpenMode) -> io::Result<Box<dyn VFile>> {
        let mut files = self.files.lock().expect("memory dir poisoned");
        match files.get(name) {
            Some(buf) => {
                if mode == OpenMode::Truncate {
                    buf.lock().expect("memory file poisoned").clear();
                }
                Ok(Box::new(MemFile::shared(Arc::clone(buf))))
            }
            None if mode == OpenMode::Read => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such member: {name}"),
            )),
            None => {
                let buf: SharedBuf = Arc::default();
                files.insert(name.to_string(), Arc::clone(&buf));
                Ok(Box::new(MemFile::shared(buf)))
            }
        }
    }
}
