use std::cell::Cell;

use crate::{Error, ParserOptions};

/// Counters bounding a single parse. Shared between the decode loop and the
/// buffers it hands out, never across parses.
#[derive(Debug)]
pub(crate) struct Budget {
    parts: Cell<u64>,
    headers: Cell<u64>,
    /// Bytes of memory left for plain values and buffered hook content.
    mem: Cell<u64>,
    /// Bytes a single buffered hook input may keep in memory.
    mem_file: Cell<u64>,
}

impl Budget {
    pub(crate) fn new(options: &ParserOptions) -> Self {
        Budget {
            parts: Cell::new(options.get_max_parts()),
            headers: Cell::new(options.get_max_headers()),
            mem: Cell::new(options.get_max_mem_size()),
            mem_file: Cell::new(options.get_max_mem_file_size()),
        }
    }

    pub(crate) fn take_part(&self) -> Result<(), Error> {
        take(&self.parts, 1).ok_or(Error::TooManyParts)
    }

    pub(crate) fn take_headers(&self, n: u64) -> Result<(), Error> {
        take(&self.headers, n).ok_or(Error::TooManyHeaders)
    }

    pub(crate) fn take_mem(&self, n: u64) -> Result<(), Error> {
        take(&self.mem, n).ok_or(Error::TooLargeForm)
    }

    pub(crate) fn mem(&self) -> u64 {
        self.mem.get()
    }

    /// How much one buffering operation may hold in memory right now.
    pub(crate) fn buffer_ceiling(&self) -> u64 {
        self.mem.get().min(self.mem_file.get())
    }

    /// Accounts for `n` bytes of buffered content. Callers stay below
    /// `buffer_ceiling`, so this never goes negative.
    pub(crate) fn reserve_buffer(&self, n: u64) {
        self.mem.set(self.mem.get().saturating_sub(n));
        self.mem_file.set(self.mem_file.get().saturating_sub(n));
    }

    pub(crate) fn release_buffer(&self, n: u64) {
        self.mem.set(self.mem.get().saturating_add(n));
        self.mem_file.set(self.mem_file.get().saturating_add(n));
    }
}

fn take(counter: &Cell<u64>, n: u64) -> Option<()> {
    let left = counter.get().checked_sub(n)?;
    counter.set(left);
    Some(())
}
