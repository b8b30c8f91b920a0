//! Replayable copies of part content: kept in memory while the budget allows,
//! spilled to one shared temporary file per parse otherwise.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::{fmt, mem};

use parking_lot::Mutex;
use tempfile::NamedTempFile;

use crate::budget::Budget;
use crate::Error;

/// Idle buffers kept around per pool.
const MAX_IDLE_BUFFERS: usize = 16;

/// Larger buffers are freed instead of pooled.
const MAX_POOLED_CAPACITY: usize = 64 * 1024;

const COPY_CHUNK: usize = 8 * 1024;

/// Staging buffers reused between buffering operations. Can be shared by
/// parsers running on different threads.
#[derive(Default)]
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffers currently waiting for reuse.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    pub(crate) fn checkout(&self) -> Vec<u8> {
        let mut buf = self.idle.lock().pop().unwrap_or_default();
        buf.clear();
        buf
    }

    pub(crate) fn checkin(&self, mut buf: Vec<u8>) {
        if buf.capacity() > MAX_POOLED_CAPACITY {
            return;
        }
        buf.clear();
        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE_BUFFERS {
            idle.push(buf);
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BufferPool").field("idle", &self.idle()).finish()
    }
}

/// Buffered content of one part.
pub(crate) enum Spooled {
    Memory(MemoryLease),
    Disk(DiskRegion),
}

impl Spooled {
    pub(crate) fn reader(&self) -> SpooledReader<'_> {
        match self {
            Spooled::Memory(lease) => SpooledReader::Memory(&lease.data),
            Spooled::Disk(region) => SpooledReader::Disk {
                file: region.file.as_file(),
                pos: region.offset,
                end: region.offset + region.len,
            },
        }
    }

    pub(crate) fn len(&self) -> u64 {
        match self {
            Spooled::Memory(lease) => lease.data.len() as u64,
            Spooled::Disk(region) => region.len,
        }
    }

    pub(crate) fn is_on_disk(&self) -> bool {
        matches!(self, Spooled::Disk(_))
    }
}

/// In-memory content. Dropping it hands the bytes back to the budget and the
/// buffer back to the pool.
pub(crate) struct MemoryLease {
    data: Vec<u8>,
    pool: Arc<BufferPool>,
    budget: Rc<Budget>,
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        self.budget.release_buffer(self.data.len() as u64);
        self.pool.checkin(mem::take(&mut self.data));
    }
}

/// A range of the shared spill file.
pub(crate) struct DiskRegion {
    file: Rc<NamedTempFile>,
    offset: u64,
    len: u64,
}

pub(crate) enum SpooledReader<'a> {
    Memory(&'a [u8]),
    Disk { file: &'a File, pos: u64, end: u64 },
}

impl Read for SpooledReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SpooledReader::Memory(bytes) => bytes.read(buf),
            SpooledReader::Disk { file, pos, end } => {
                if *pos >= *end {
                    return Ok(0);
                }

                let max = (*end - *pos).min(buf.len() as u64) as usize;
                // Other regions of the file may have been read in between.
                let mut f: &File = *file;
                f.seek(SeekFrom::Start(*pos))?;
                let n = f.read(&mut buf[..max])?;
                *pos += n as u64;
                Ok(n)
            }
        }
    }
}

/// Turns part content into `Spooled` copies for one parse and owns the spill
/// file they share.
pub(crate) struct Spooler {
    pool: Arc<BufferPool>,
    budget: Rc<Budget>,
    temp_dir: Option<PathBuf>,
    file: Option<Rc<NamedTempFile>>,
    next_offset: u64,
}

impl Spooler {
    pub(crate) fn new(pool: Arc<BufferPool>, budget: Rc<Budget>, temp_dir: Option<PathBuf>) -> Self {
        Spooler {
            pool,
            budget,
            temp_dir,
            file: None,
            next_offset: 0,
        }
    }

    /// Reads `content` to its end.
    pub(crate) fn spool(&mut self, content: &mut dyn Read) -> Result<Spooled, Error> {
        let ceiling = self.budget.buffer_ceiling();
        let mut buf = self.pool.checkout();

        let copied = match (&mut *content).take(ceiling.saturating_add(1)).read_to_end(&mut buf) {
            Ok(n) => n as u64,
            Err(e) => {
                self.pool.checkin(buf);
                return Err(e.into());
            }
        };

        if copied <= ceiling {
            self.budget.reserve_buffer(copied);
            log::trace!("Buffered {} bytes in memory", copied);

            return Ok(Spooled::Memory(MemoryLease {
                data: buf,
                pool: Arc::clone(&self.pool),
                budget: Rc::clone(&self.budget),
            }));
        }

        let res = self.spill(&buf, content);
        self.pool.checkin(buf);
        res
    }

    fn spill(&mut self, prefix: &[u8], rest: &mut dyn Read) -> Result<Spooled, Error> {
        let file = self.spill_file()?;
        let offset = self.next_offset;

        let mut f: &File = file.as_file();
        f.seek(SeekFrom::Start(offset))
            .map_err(Error::temp_file("seek"))?;
        f.write_all(prefix).map_err(Error::temp_file("write"))?;

        let mut len = prefix.len() as u64;
        let mut chunk = [0u8; COPY_CHUNK];
        loop {
            let n = match rest.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            f.write_all(&chunk[..n]).map_err(Error::temp_file("write"))?;
            len += n as u64;
        }

        self.next_offset += len;
        log::debug!("Spilled {} bytes to disk at offset {}", len, offset);

        Ok(Spooled::Disk(DiskRegion { file, offset, len }))
    }

    fn spill_file(&mut self) -> Result<Rc<NamedTempFile>, Error> {
        if let Some(file) = &self.file {
            return Ok(Rc::clone(file));
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix("hookform-");
        let file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(Error::temp_file("create"))?;

        log::debug!("Created spill file {}", file.path().display());

        let file = Rc::new(file);
        self.file = Some(Rc::clone(&file));
        Ok(file)
    }

    #[cfg(test)]
    pub(crate) fn spill_path(&self) -> Option<PathBuf> {
        self.file.as_ref().map(|f| f.path().to_path_buf())
    }

    /// Removes the spill file, if one was created. Every `Spooled` handed out
    /// must be gone by now.
    pub(crate) fn close(mut self) -> Result<(), Error> {
        let file = match self.file.take() {
            Some(file) => file,
            None => return Ok(()),
        };

        match Rc::try_unwrap(file) {
            Ok(file) => file.close().map_err(Error::temp_file("remove")),
            Err(file) => {
                log::warn!(
                    "Spill file {} still in use at teardown, removing it on last release",
                    file.path().display()
                );
                Ok(())
            }
        }
    }
}
