use std::fmt;
use std::io::Read;
use std::ops::{Deref, DerefMut};

use http::header::CONTENT_TYPE;

use crate::{Error, Parser, ParserOptions};

/// A request carrying a multipart form, implemented for `http::Request`.
/// Other frameworks can implement it for their own request types.
pub trait MultipartRequest {
    type Body: Read;

    fn content_type(&self) -> Option<&str>;

    fn into_body(self) -> Self::Body;
}

impl<B: Read> MultipartRequest for http::Request<B> {
    type Body = B;

    fn content_type(&self) -> Option<&str> {
        self.headers()
            .get(CONTENT_TYPE)
            .and_then(|hv| hv.to_str().ok())
    }

    fn into_body(self) -> B {
        http::Request::into_body(self)
    }
}

/// Extracts the boundary of a `multipart/form-data` content type.
pub fn boundary_from_content_type(content_type: &str) -> Result<String, Error> {
    let media_type: mime::Mime = content_type.parse()?;

    if media_type.type_() != mime::MULTIPART || media_type.subtype() != mime::FORM_DATA {
        return Err(Error::NotMultipart);
    }

    media_type
        .get_param(mime::BOUNDARY)
        .map(|b| b.as_str().to_owned())
        .ok_or(Error::MissingBoundary)
}

/// A `Parser` bound to the body of the request it was created from.
pub struct RequestParser<B> {
    parser: Parser,
    body: B,
}

impl<B: Read> RequestParser<B> {
    pub fn new<Req>(req: Req) -> Result<Self, Error>
    where
        Req: MultipartRequest<Body = B>,
    {
        Self::with_options(req, ParserOptions::default())
    }

    pub fn with_options<Req>(req: Req, options: ParserOptions) -> Result<Self, Error>
    where
        Req: MultipartRequest<Body = B>,
    {
        let content_type = req.content_type().ok_or(Error::ContentTypeMissing)?;
        let boundary = boundary_from_content_type(content_type)?;

        log::debug!("Creating parser for request with boundary: {:?}", boundary);

        Ok(RequestParser {
            parser: Parser::with_options(boundary, options),
            body: req.into_body(),
        })
    }

    /// Parses the request body. See `Parser::parse`.
    pub fn parse(&mut self) -> Result<(), Error> {
        self.parser.parse(&mut self.body)
    }

    pub fn into_parser(self) -> Parser {
        self.parser
    }
}

impl<B> Deref for RequestParser<B> {
    type Target = Parser;

    fn deref(&self) -> &Parser {
        &self.parser
    }
}

impl<B> DerefMut for RequestParser<B> {
    fn deref_mut(&mut self) -> &mut Parser {
        &mut self.parser
    }
}

impl<B> fmt::Debug for RequestParser<B> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RequestParser")
            .field("parser", &self.parser)
            .finish()
    }
}
