use std::io::{self, Read};

use bytes::{Buf, BytesMut};

use crate::{Error, Header, Part};

/// How much is requested from the inner reader per fill.
const READ_CHUNK: usize = 8 * 1024;

/// Upper bound for a single part's header block.
const MAX_HEADER_BYTES: usize = 10 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Nothing consumed yet, or only preamble bytes.
    Preamble,
    /// Inside the content of a part.
    Body,
    /// Right behind a delimiter, before its trailing `--` or line break.
    Delimiter,
    Done,
}

/// Splits a `multipart/*` body into parts while reading it front to back.
///
/// The boundary MUST be preceeded by a line break which is considered to be
/// part of the boundary; given the boundary "simple boundary" the delimiter
/// searched for is "\n--simple boundary", with an optional "\r" in front.
/// Only the very first boundary may instead sit at the start of the body.
///
/// Directly after a delimiter there is either `--`, which ends the body, or a
/// line break after which the headers of the next part arrive. An empty line
/// ends the headers; the content follows.
///
///  This is the preamble.  It is to be ignored.
///  --simple boundary
///
///  This is implicitly typed plain ASCII text.
///  --simple boundary
///  Content-type: text/plain; charset=us-ascii
///
///  This is explicitly typed plain ASCII text.
///
///  --simple boundary--
pub(crate) struct MultipartReader<R> {
    inner: R,
    buffer: BytesMut,
    /// "\n--" followed by the boundary.
    delimiter: Vec<u8>,
    state: State,
    /// Whether preamble bytes were thrown away already.
    preamble_skipped: bool,
    eof: bool,
    parts_read: usize,
}

impl<R: Read> MultipartReader<R> {
    pub(crate) fn new<S: AsRef<str>>(inner: R, boundary: S) -> Self {
        let delimiter = format!("\n--{}", boundary.as_ref()).into_bytes();

        log::debug!("Creating multipart reader with delimiter: {:?}", delimiter);

        Self {
            inner,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            delimiter,
            state: State::Preamble,
            preamble_skipped: false,
            eof: false,
            parts_read: 0,
        }
    }

    /// Moves to the next part, discarding whatever is left of the current one.
    /// Returns `None` once the closing delimiter was read.
    pub(crate) fn next_part(&mut self) -> Result<Option<Part<'_, R>>, Error> {
        loop {
            match self.state {
                State::Preamble => self.skip_preamble()?,
                State::Body => self.drain_body()?,
                State::Delimiter => {
                    if !self.finish_delimiter()? {
                        log::debug!("Found stop sentinel after {} parts", self.parts_read);
                        self.state = State::Done;
                        return Ok(None);
                    }

                    let header = self.read_header()?;
                    self.state = State::Body;
                    self.parts_read += 1;

                    return Ok(Some(Part::new(header, self)));
                }
                State::Done => return Ok(None),
            }
        }
    }

    /// Reads content of the current part. Returns 0 at the end of the part.
    pub(crate) fn read_body(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.state != State::Body || out.is_empty() {
            return Ok(0);
        }

        loop {
            if let Some(i) = twoway::find_bytes(&self.buffer, &self.delimiter) {
                let end = if i > 0 && self.buffer[i - 1] == b'\r' { i - 1 } else { i };

                match self.delimiter_follows(i + self.delimiter.len()) {
                    Some(true) if end == 0 => {
                        self.buffer.advance(i + self.delimiter.len());
                        self.state = State::Delimiter;
                        return Ok(0);
                    }
                    Some(true) => return Ok(self.emit(end, out)),
                    // Only starts like the boundary, e.g. "--abcdef" for "abc".
                    Some(false) => return Ok(self.emit(i + 1, out)),
                    None if end > 0 => return Ok(self.emit(end, out)),
                    None => {
                        if self.fill()? == 0 {
                            self.buffer.advance(i + self.delimiter.len());
                            self.state = State::Delimiter;
                            return Ok(0);
                        }
                        continue;
                    }
                }
            }

            // Everything that can not be the start of a delimiter is content.
            let safe = self.buffer.len().saturating_sub(self.delimiter.len());
            if safe > 0 {
                return Ok(self.emit(safe, out));
            }

            if self.fill()? == 0 {
                return Err(unexpected_eof("multipart body ended inside a part"));
            }
        }
    }

    fn emit(&mut self, available: usize, out: &mut [u8]) -> usize {
        let n = available.min(out.len());
        out[..n].copy_from_slice(&self.buffer[..n]);
        self.buffer.advance(n);
        n
    }

    fn drain_body(&mut self) -> Result<(), Error> {
        let mut scratch = [0u8; 4096];
        let mut drained = 0;
        while self.read_body(&mut scratch)? > 0 {
            drained += 1;
        }
        if drained > 0 {
            log::trace!("Discarded unread content of part {}", self.parts_read);
        }
        Ok(())
    }

    fn skip_preamble(&mut self) -> Result<(), Error> {
        // The leading boundary has no line break in front of it.
        let dash_len = self.delimiter.len() - 1;

        loop {
            if !self.preamble_skipped
                && self.buffer.len() >= dash_len
                && self.buffer.starts_with(&self.delimiter[1..])
            {
                match self.delimiter_follows(dash_len) {
                    Some(true) => {
                        self.buffer.advance(dash_len);
                        self.state = State::Delimiter;
                        return Ok(());
                    }
                    Some(false) => self.preamble_skipped = true,
                    None => {
                        if self.fill()? == 0 {
                            return Err(unexpected_eof("multipart body has no boundary").into());
                        }
                        continue;
                    }
                }
            }

            if self.preamble_skipped || self.buffer.len() >= dash_len {
                match twoway::find_bytes(&self.buffer, &self.delimiter) {
                    Some(i) => match self.delimiter_follows(i + self.delimiter.len()) {
                        Some(true) => {
                            self.buffer.advance(i + self.delimiter.len());
                            self.state = State::Delimiter;
                            return Ok(());
                        }
                        Some(false) => {
                            self.buffer.advance(i + 1);
                            self.preamble_skipped = true;
                            continue;
                        }
                        None => {
                            self.buffer.advance(i);
                            self.preamble_skipped = true;
                        }
                    },
                    None => {
                        // Keep the tail, it may hold the beginning of the delimiter.
                        if self.buffer.len() > dash_len {
                            let skip = self.buffer.len() - dash_len;
                            self.buffer.advance(skip);
                            self.preamble_skipped = true;
                        }
                    }
                }
            }

            if self.fill()? == 0 {
                return Err(unexpected_eof("multipart body has no boundary").into());
            }
        }
    }

    /// Whether a boundary match ending at `at` is a delimiter: it must be
    /// followed by `--`, padding or a line break. `None` until enough bytes
    /// are buffered to tell.
    fn delimiter_follows(&self, at: usize) -> Option<bool> {
        match *self.buffer.get(at)? {
            b' ' | b'\t' | b'\r' | b'\n' => Some(true),
            b'-' => self.buffer.get(at + 1).map(|b| *b == b'-'),
            _ => Some(false),
        }
    }

    /// Consumes what follows a delimiter. `false` means it was the closing one.
    fn finish_delimiter(&mut self) -> Result<bool, Error> {
        self.fill_to(2)?;
        if self.buffer.starts_with(b"--") {
            self.buffer.advance(2);
            return Ok(false);
        }

        // Transport padding is allowed before the line break.
        loop {
            self.fill_to(1)?;
            match self.buffer[0] {
                b' ' | b'\t' => self.buffer.advance(1),
                _ => break,
            }
        }

        self.fill_to(2)?;
        if self.buffer.starts_with(b"\r\n") {
            self.buffer.advance(2);
        } else if self.buffer[0] == b'\n' {
            self.buffer.advance(1);
        } else {
            return Err(Error::malformed(format!(
                "Boundary must be followed by `--` or a line break, found: {:?}",
                &self.buffer[..2]
            )));
        }

        Ok(true)
    }

    fn read_header(&mut self) -> Result<Header, Error> {
        let mut lines: Vec<BytesMut> = Vec::new();
        let mut header_bytes = 0;

        loop {
            let pos = match self.buffer.iter().position(|b| *b == b'\n') {
                Some(pos) => pos,
                None => {
                    if header_bytes + self.buffer.len() > MAX_HEADER_BYTES {
                        return Err(Error::malformed("part header block too large"));
                    }
                    if self.fill()? == 0 {
                        return Err(unexpected_eof("multipart body ended inside part headers").into());
                    }
                    continue;
                }
            };

            let mut line = self.buffer.split_to(pos + 1);
            header_bytes += line.len();
            if header_bytes > MAX_HEADER_BYTES {
                return Err(Error::malformed("part header block too large"));
            }

            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }

            if line.is_empty() {
                break;
            }
            lines.push(line);
        }

        log::trace!("Read {} header lines for part {}", lines.len(), self.parts_read + 1);

        Header::from_lines(lines.iter().map(|l| &l[..]))
    }

    /// Makes sure at least `n` bytes are buffered.
    fn fill_to(&mut self, n: usize) -> Result<(), Error> {
        while self.buffer.len() < n {
            if self.fill()? == 0 {
                return Err(unexpected_eof("multipart body ended after a boundary").into());
            }
        }
        Ok(())
    }

    /// Pulls the next chunk out of the inner reader. Returns 0 at end of input.
    fn fill(&mut self) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }

        let start = self.buffer.len();
        self.buffer.resize(start + READ_CHUNK, 0);

        let read = loop {
            match self.inner.read(&mut self.buffer[start..]) {
                Ok(n) => break Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };

        let n = *read.as_ref().unwrap_or(&0);
        self.buffer.truncate(start + n);
        if n == 0 && read.is_ok() {
            self.eof = true;
        }
        read
    }
}

fn unexpected_eof(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, msg)
}
