//! Write-once buffer that stays in memory below a threshold and spills to a
//! temporary file above it.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use tempfile::NamedTempFile;
use tracing::debug;

/// Default spill threshold (50 MiB)
pub const DEFAULT_MEMORY_THRESHOLD: usize = 50 * 1024 * 1024;

enum Backing {
    Memory(Vec<u8>),
    File(NamedTempFile),
}

pub struct Spool {
    backing: Backing,
    threshold: usize,
    len: u64,
}

impl Spool {
    pub fn new(threshold: usize) -> Self {
        Self {
            backing: Backing::Memory(Vec::new()),
            threshold,
            len: 0,
        }
    }

    /// Spool holding `data` in memory regardless of size
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let len = data.len() as u64;
        Self {
            threshold: usize::MAX,
            backing: Backing::Memory(data),
            len,
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_spilled(&self) -> bool {
        matches!(self.backing, Backing::File(_))
    }

    fn spill(&mut self) -> io::Result<()> {
        if let Backing::Memory(data) = &self.backing {
            let mut file = NamedTempFile::new()?;
            file.write_all(data)?;
            debug!(bytes = data.len(), path = %file.path().display(), "Spooled buffer to disk");
            self.backing = Backing::File(file);
        }
        Ok(())
    }

    /// Reader over everything written so far
    pub fn into_reader(self) -> io::Result<Box<dyn Read + Send>> {
        match self.backing {
            Backing::Memory(data) => Ok(Box::new(Cursor::new(data))),
            Backing::File(file) => {
                let (mut file, path) = file.into_parts();
                file.seek(SeekFrom::Start(0))?;
                Ok(Box::new(TempFileReader { file, _path: path }))
            },
        }
    }

    /// Read the whole spool into memory
    pub fn into_bytes(self) -> io::Result<Vec<u8>> {
        match self.backing {
            Backing::Memory(data) => Ok(data),
            Backing::File(file) => {
                let mut out = Vec::with_capacity(self.len as usize);
                let mut reopened = file.reopen()?;
                reopened.read_to_end(&mut out)?;
                Ok(out)
            },
        }
    }
}

impl Write for Spool {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Backing::Memory(data) = &self.backing {
            if data.len() + buf.len() > self.threshold {
                self.spill()?;
            }
        }

        let written = match &mut self.backing {
            Backing::Memory(data) => {
                data.extend_from_slice(buf);
                buf.len()
            },
            Backing::File(file) => file.write(buf)?,
        };
        self.len += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.backing {
            Backing::Memory(_) => Ok(()),
            Backing::File(file) => file.flush(),
        }
    }
}

/// Temp file that is deleted once the reader is dropped
struct TempFileReader {
    file: File,
    _path: tempfile::TempPath,
}

impl Read for TempFileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}
