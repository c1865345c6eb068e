//! Resume tracker: how far a file has already been synchronized.
//!
//! The offset lives in a sidecar next to the data file: `/data/log.txt`
//! is tracked in `/data/log.meta` as a decimal number and a newline.

use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::store::FileStore;

/// Sidecar path for a data file: the extension is replaced by `meta`.
pub fn record_path(path: &str) -> String {
    Path::new(path)
        .with_extension("meta")
        .to_string_lossy()
        .into_owned()
}

#[derive(Clone)]
pub struct ResumeTracker {
    store: Arc<dyn FileStore>,
}

impl ResumeTracker {
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        Self { store }
    }

    /// Offset already delivered for `path`.
    ///
    /// A missing record is created with 0. A record that does not parse is
    /// treated as 0, which re-sends the whole file rather than skipping data.
    pub fn read_offset(&self, path: &str) -> io::Result<u64> {
        let record = record_path(path);
        if !self.store.exists(&record) {
            self.store.write_string(&record, "0\n")?;
            tracing::debug!(record = %record, "created resume record");
            return Ok(0);
        }

        let text = self.store.read_to_string(&record)?;
        match text.trim().parse::<u64>() {
            Ok(offset) => Ok(offset),
            Err(e) => {
                tracing::warn!(record = %record, content = %text.trim(), error = %e, "unreadable resume record, starting from 0");
                Ok(0)
            }
        }
    }

    pub fn write_offset(&self, path: &str, offset: u64) -> io::Result<()> {
        let record = record_path(path);
        self.store.write_string(&record, &format!("{offset}\n"))?;
        tracing::debug!(record = %record, offset, "resume offset saved");
        Ok(())
    }
}
