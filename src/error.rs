use std::{error::Error as StdError, fmt, io};

/// Error type returned by hook callbacks.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A hook was already registered under this field name.
    #[error("duplicate hook name: {0}")]
    DuplicateHookName(String),

    #[error("too many parts in multipart form")]
    TooManyParts,

    #[error("too many part headers in multipart form")]
    TooManyHeaders,

    /// Plain values and buffered hook content exceeded the memory limit.
    #[error("multipart form too large")]
    TooLargeForm,

    /// The dependency engine was asked to dispatch a key nobody hooked.
    #[error("no hooks registered for key: {0}")]
    NoHooksForKey(String),

    #[error("Malformed Multipart: {0}")]
    MalformedMultipart(String),

    /// Reading the body or a buffered replay failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Creating, writing or removing the spill file failed.
    #[error("failed to {op} spill file: {source}")]
    TempFile {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// A registered hook returned an error.
    #[error("hook for field `{name}` failed: {source}")]
    Hook {
        name: String,
        #[source]
        source: BoxError,
    },

    /// Several errors occurred; none of them was dropped.
    #[error("{}", JoinDisplay(.0))]
    Multiple(Vec<Error>),

    #[error("Content Type header missing from request")]
    ContentTypeMissing,

    #[error("Cannot handle a non multipart/form-data request as multipart form")]
    NotMultipart,

    #[error("multipart boundary parameter missing")]
    MissingBoundary,

    #[error("Content-Type value invalid: {0}")]
    InvalidMimeType(#[from] mime::FromStrError),
}

impl Error {
    pub(crate) fn malformed<S: Into<String>>(msg: S) -> Self {
        Error::MalformedMultipart(msg.into())
    }

    pub(crate) fn temp_file(op: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Error::TempFile { op, source }
    }

    /// Collapses a list of errors: nothing for an empty list, the error itself
    /// for a single one, `Multiple` otherwise.
    pub fn from_many(mut errs: Vec<Error>) -> Option<Self> {
        match errs.len() {
            0 => None,
            1 => errs.pop(),
            _ => Some(Error::Multiple(errs)),
        }
    }

    /// Combines the outcome of an operation with the outcome of its cleanup.
    /// The primary error always comes first.
    pub fn join(primary: Result<(), Error>, cleanup: Result<(), Error>) -> Result<(), Error> {
        match (primary, cleanup) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Err(first), Err(second)) => {
                let mut errs = first.into_leaves();
                errs.extend(second.into_leaves());
                Err(Error::Multiple(errs))
            }
        }
    }

    /// Iterates over every non-`Multiple` error contained in this one,
    /// including itself when it is not a `Multiple`.
    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out.into_iter()
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Error>) {
        match self {
            Error::Multiple(errs) => errs.iter().for_each(|e| e.collect_leaves(out)),
            e => out.push(e),
        }
    }

    fn into_leaves(self) -> Vec<Error> {
        match self {
            Error::Multiple(errs) => errs.into_iter().flat_map(Error::into_leaves).collect(),
            e => vec![e],
        }
    }
}

struct JoinDisplay<'a>(&'a [Error]);

impl fmt::Display for JoinDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_many_collapses() {
        assert!(Error::from_many(vec![]).is_none());

        let one = Error::from_many(vec![Error::TooManyParts]).unwrap();
        assert!(matches!(one, Error::TooManyParts));

        let many = Error::from_many(vec![Error::TooManyParts, Error::TooLargeForm]).unwrap();
        assert_eq!(many.iter().count(), 2);
    }

    #[test]
    fn join_keeps_primary_first() {
        let joined = Error::join(
            Err(Error::TooManyHeaders),
            Err(Error::Multiple(vec![Error::TooLargeForm, Error::TooManyParts])),
        )
        .unwrap_err();

        let leaves: Vec<_> = joined.iter().collect();
        assert_eq!(leaves.len(), 3);
        assert!(matches!(leaves[0], Error::TooManyHeaders));
        assert!(matches!(leaves[1], Error::TooLargeForm));
        assert!(matches!(leaves[2], Error::TooManyParts));

        assert!(Error::join(Ok(()), Ok(())).is_ok());
        assert!(matches!(
            Error::join(Ok(()), Err(Error::TooLargeForm)),
            Err(Error::TooLargeForm)
        ));
    }

    #[test]
    fn hook_error_exposes_source() {
        #[derive(Debug)]
        struct Boom;
        impl fmt::Display for Boom {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("boom")
            }
        }
        impl StdError for Boom {}

        let err = Error::Hook {
            name: "icon".into(),
            source: Box::new(Boom),
        };

        assert!(format!("{}", err).contains("icon"));
        assert!(err.source().unwrap().downcast_ref::<Boom>().is_some());
    }

    #[test]
    fn multiple_display_lists_all() {
        let err = Error::Multiple(vec![Error::TooManyParts, Error::NoHooksForKey("x".into())]);
        let msg = format!("{}", err);
        assert!(msg.contains("too many parts"));
        assert!(msg.contains("no hooks registered for key: x"));
    }
}
