//! Streaming `multipart/form-data` parsing with per-field hooks.
//!
//! A hook gets the content of its field while the body is still being read,
//! so large uploads never have to sit in memory. Hooks can require other
//! fields: if those come later in the body, the content is buffered (in
//! memory up to a limit, on disk after that) and the hook runs as soon as the
//! last required field was decoded.
//!
//! ```
//! use std::io::Read;
//! use hookform::Parser;
//!
//! let body = "--boundary\r\n\
//! Content-Disposition: form-data; name=\"stream\"; filename=\"file.txt\"\r\n\
//! Content-Type: text/plain\r\n\
//! \r\n\
//! large file contents\r\n\
//! --boundary\r\n\
//! Content-Disposition: form-data; name=\"field\"\r\n\
//! \r\n\
//! value\r\n\
//! --boundary--\r\n";
//!
//! let mut parser = Parser::new("boundary");
//! let store = parser.store();
//!
//! parser
//!     .register(
//!         "stream",
//!         move |r, header| {
//!             let mut content = String::new();
//!             r.read_to_string(&mut content)?;
//!
//!             assert_eq!(header.file_name(), Some("file.txt"));
//!             assert_eq!(content, "large file contents");
//!             // Runs only once `field` is known.
//!             assert_eq!(store.value("field").unwrap().0, "value");
//!             Ok(())
//!         },
//!         &["field"],
//!     )
//!     .unwrap();
//!
//! parser.parse(body.as_bytes()).unwrap();
//! ```

mod budget;
mod condition;
mod multipart;
mod spool;

mod error;
pub use error::{BoxError, Error};

mod header;
pub use header::Header;

mod part;
pub(crate) use part::Part;

mod parser;
pub use parser::{Parser, ParserOptions, GB, KB, MB};
pub use parser::{
    DEFAULT_MAX_HEADERS, DEFAULT_MAX_MEM_FILE_SIZE, DEFAULT_MAX_MEM_SIZE, DEFAULT_MAX_PARTS,
};

mod request;
pub use request::{boundary_from_content_type, MultipartRequest, RequestParser};

pub use spool::BufferPool;

mod value;
pub use value::{Value, ValueMap, ValueStore};
