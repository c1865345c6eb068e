//! File storage behind protocol paths.
//!
//! Paths on the link look like `/data/log.txt` or `node/alpha/log.txt`.
//! [`FileStore`] is the narrow surface the sender, receiver and resume
//! tracker need; [`DiskStore`] maps it onto a directory.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

pub trait FileStore: Send + Sync {
    fn size(&self, path: &str) -> io::Result<u64>;

    /// Read up to `buf.len()` bytes starting at `offset`. Returns 0 at end
    /// of file.
    fn read_at(&self, path: &str, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Create the file (and parent directories) if missing, so later
    /// appends land at its end.
    fn ensure_append(&self, path: &str) -> io::Result<()>;

    fn append(&self, path: &str, data: &[u8]) -> io::Result<()>;

    /// Cut the file back to `len` bytes.
    fn truncate(&self, path: &str, len: u64) -> io::Result<()>;

    fn read_to_string(&self, path: &str) -> io::Result<String>;

    /// Replace the file's contents.
    fn write_string(&self, path: &str, text: &str) -> io::Result<()>;

    fn exists(&self, path: &str) -> bool;
}

/// A [`FileStore`] rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a protocol path under the root. Leading `/` is ignored; `..`
    /// is refused so a remote filename cannot leave the root.
    pub fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let mut out = self.root.clone();
        let mut depth = 0usize;
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => {
                    out.push(part);
                    depth += 1;
                }
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("path escapes storage root: {path}"),
                    ));
                }
            }
        }
        if depth == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("empty path: {path:?}"),
            ));
        }
        Ok(out)
    }

    fn create_parent(path: &Path) -> io::Result<()> {
        match path.parent() {
            Some(parent) => std::fs::create_dir_all(parent),
            None => Ok(()),
        }
    }
}

impl FileStore for DiskStore {
    fn size(&self, path: &str) -> io::Result<u64> {
        Ok(std::fs::metadata(self.resolve(path)?)?.len())
    }

    fn read_at(&self, path: &str, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = File::open(self.resolve(path)?)?;
        file.seek(SeekFrom::Start(offset))?;
        // fill as much of buf as the file has, so chunks are full-size
        // until the tail
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn ensure_append(&self, path: &str) -> io::Result<()> {
        let full = self.resolve(path)?;
        Self::create_parent(&full)?;
        OpenOptions::new().create(true).append(true).open(full)?;
        Ok(())
    }

    fn append(&self, path: &str, data: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(self.resolve(path)?)?;
        file.write_all(data)
    }

    fn truncate(&self, path: &str, len: u64) -> io::Result<()> {
        OpenOptions::new().write(true).open(self.resolve(path)?)?.set_len(len)
    }

    fn read_to_string(&self, path: &str) -> io::Result<String> {
        std::fs::read_to_string(self.resolve(path)?)
    }

    fn write_string(&self, path: &str, text: &str) -> io::Result<()> {
        let full = self.resolve(path)?;
        Self::create_parent(&full)?;
        std::fs::write(full, text)
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }
}
