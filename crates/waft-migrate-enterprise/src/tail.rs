use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// A stream of complete lines produced by a running process.
pub trait LineSource {
    /// The next complete line, or `None` when nothing new is available yet.
    fn next_line(&mut self) -> Result<Option<String>>;
}

/// Follows a log file from the position it had when opened.
///
/// A trailing fragment without a newline is held back until the writer
/// finishes the line.
#[derive(Debug)]
pub struct LogTail {
    path: PathBuf,
    reader: BufReader<File>,
    pending: Vec<u8>,
}

impl LogTail {
    pub fn open_at_end(path: &Path) -> Result<Self> {
        let mut file = File::open(path)
            .with_context(|| format!("failed to open log for tailing: {}", path.display()))?;
        file.seek(SeekFrom::End(0))
            .with_context(|| format!("failed to seek to end of log: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            pending: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LineSource for LogTail {
    fn next_line(&mut self) -> Result<Option<String>> {
        let read = self
            .reader
            .read_until(b'\n', &mut self.pending)
            .with_context(|| format!("failed to read log: {}", self.path.display()))?;
        if read == 0 || !self.pending.ends_with(b"\n") {
            return Ok(None);
        }

        let line = String::from_utf8_lossy(&self.pending)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        self.pending.clear();
        Ok(Some(line))
    }
}
