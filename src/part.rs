use std::io::{self, Read};

use crate::multipart::MultipartReader;
use crate::Header;

/// One part of a multipart body. Its content is readable until the next part
/// is requested; whatever is left unread then gets discarded.
pub(crate) struct Part<'r, R> {
    header: Header,
    reader: &'r mut MultipartReader<R>,
}

impl<'r, R: Read> Part<'r, R> {
    pub(crate) fn new(header: Header, reader: &'r mut MultipartReader<R>) -> Self {
        Part { header, reader }
    }

    pub(crate) fn header(&self) -> &Header {
        &self.header
    }

    /// The form field name, empty when the part carries none.
    pub(crate) fn name(&self) -> &str {
        self.header.name().unwrap_or("")
    }

    pub(crate) fn into_parts(self) -> (Header, PartBody<'r, R>) {
        (self.header, PartBody { reader: self.reader })
    }
}

impl<R: Read> Read for Part<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read_body(buf)
    }
}

/// The content of a part after its header was taken away.
pub(crate) struct PartBody<'r, R> {
    reader: &'r mut MultipartReader<R>,
}

impl<R: Read> Read for PartBody<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read_body(buf)
    }
}
