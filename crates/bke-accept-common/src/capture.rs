//! Captured output log
//!
//! Bootstrap output and cluster snapshots are written to a log file and
//! echoed to the console at the same time. The phase checks later read the
//! file back as flat text.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::Result;

/// Writer that duplicates every write into two sinks
pub struct Tee<A: Write, B: Write> {
    first: A,
    second: B,
}

impl<A: Write, B: Write> Tee<A, B> {
    /// Duplicate writes into `first` then `second`
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    /// Split back into the two sinks
    pub fn into_inner(self) -> (A, B) {
        (self.first, self.second)
    }
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.first.write_all(buf)?;
        self.second.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.first.flush()?;
        self.second.flush()
    }
}

/// Log file that also echoes to a console-like sink
pub struct CaptureLog {
    path: PathBuf,
    out: Tee<File, Box<dyn Write + Send>>,
}

impl CaptureLog {
    /// Create (or truncate) the log at `path`, echoing to stdout
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_echo(path, Box::new(io::stdout()))
    }

    /// Create (or truncate) the log at `path`, echoing to `echo`
    pub fn with_echo(path: impl Into<PathBuf>, echo: Box<dyn Write + Send>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        debug!(path = %path.display(), "Opened capture log");
        Ok(Self {
            path,
            out: Tee::new(file, echo),
        })
    }

    /// Location of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append text verbatim
    pub fn write_text(&mut self, text: &str) -> Result<()> {
        self.out.write_all(text.as_bytes())?;
        self.out.flush()?;
        Ok(())
    }

    /// Append one line
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        self.write_text(&format!("{}\n", line))
    }

    /// Drop everything written so far, keeping the file open
    pub fn reset(&mut self) -> Result<()> {
        let file = &mut self.out.first;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Read the whole log back
    pub fn contents(&self) -> Result<String> {
        Ok(std::fs::read_to_string(&self.path)?)
    }

    /// Whether nothing has been written since creation or the last reset
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.out.first.metadata()?.len() == 0)
    }

    /// Close and delete the log file
    pub fn remove(self) -> Result<()> {
        let path = self.path.clone();
        drop(self);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Capture log already removed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
