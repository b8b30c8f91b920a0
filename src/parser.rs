use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use bytes::Bytes;

use crate::budget::Budget;
use crate::condition::{ConditionJudger, Hook};
use crate::multipart::MultipartReader;
use crate::spool::{Spooled, Spooler};
use crate::{BoxError, BufferPool, Error, Header, Value, ValueMap, ValueStore};

pub const KB: u64 = 1 << 10;
pub const MB: u64 = 1 << 20;
pub const GB: u64 = 1 << 30;

pub const DEFAULT_MAX_PARTS: u64 = 10_000;
pub const DEFAULT_MAX_HEADERS: u64 = 10_000;
pub const DEFAULT_MAX_MEM_SIZE: u64 = 32 * MB;
pub const DEFAULT_MAX_MEM_FILE_SIZE: u64 = 32 * MB;

/// Limits and resources for a `Parser`.
#[derive(Debug, Clone)]
pub struct ParserOptions {
    max_parts: u64,
    /// Counted per header value, over all parts.
    max_headers: u64,
    /// Memory for plain values and buffered hook input together.
    max_mem_size: u64,
    /// Memory a single buffered hook input may use before going to disk.
    max_mem_file_size: u64,
    temp_dir: Option<PathBuf>,
    buffer_pool: Option<Arc<BufferPool>>,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            max_parts: DEFAULT_MAX_PARTS,
            max_headers: DEFAULT_MAX_HEADERS,
            max_mem_size: DEFAULT_MAX_MEM_SIZE,
            max_mem_file_size: DEFAULT_MAX_MEM_FILE_SIZE,
            temp_dir: None,
            buffer_pool: None,
        }
    }
}

impl ParserOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_parts(mut self, n: u64) -> Self {
        self.max_parts = n;
        self
    }

    #[must_use]
    pub fn max_headers(mut self, n: u64) -> Self {
        self.max_headers = n;
        self
    }

    #[must_use]
    pub fn max_mem_size(mut self, size: u64) -> Self {
        self.max_mem_size = size;
        self
    }

    #[must_use]
    pub fn max_mem_file_size(mut self, size: u64) -> Self {
        self.max_mem_file_size = size;
        self
    }

    /// Directory for the spill file. Defaults to the system temp directory.
    #[must_use]
    pub fn temp_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Staging buffer pool, e.g. one shared by all parsers of a server.
    #[must_use]
    pub fn buffer_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.buffer_pool = Some(pool);
        self
    }

    pub fn get_max_parts(&self) -> u64 {
        self.max_parts
    }

    pub fn get_max_headers(&self) -> u64 {
        self.max_headers
    }

    pub fn get_max_mem_size(&self) -> u64 {
        self.max_mem_size
    }

    pub fn get_max_mem_file_size(&self) -> u64 {
        self.max_mem_file_size
    }

    pub fn get_temp_dir(&self) -> Option<&Path> {
        self.temp_dir.as_deref()
    }
}

type HookFn = dyn FnMut(&mut dyn Read, &Header) -> Result<(), BoxError> + Send;

struct StreamHook {
    name: String,
    func: Box<HookFn>,
    requirements: Vec<String>,
}

/// Live content of a part, handed to a hook that may run right away.
pub(crate) struct NormalParam<'a> {
    reader: &'a mut dyn Read,
    header: Header,
}

/// Content of a part kept for a hook that has to wait.
pub(crate) struct BufferedParam {
    content: Spooled,
    header: Header,
}

impl StreamHook {
    fn failed(&self, source: BoxError) -> Error {
        Error::Hook {
            name: self.name.clone(),
            source,
        }
    }
}

impl<'h> Hook<String> for &'h mut StreamHook {
    type Normal<'a> = NormalParam<'a>;
    type Buffered = BufferedParam;

    fn requirements(&self) -> &[String] {
        &self.requirements
    }

    fn normal_path(&mut self, value: NormalParam<'_>) -> Result<(), Error> {
        (self.func)(value.reader, &value.header).map_err(|e| self.failed(e))
    }

    fn abnormal_path(&mut self, value: BufferedParam) -> Result<(), Error> {
        let mut reader = value.content.reader();
        (self.func)(&mut reader, &value.header).map_err(|e| self.failed(e))
    }
}

/// What the decode loop needs from the dependency engine.
pub(crate) trait Judge {
    fn is_registered(&self, key: &str) -> bool;

    /// Returns whether the hook ran on the live content.
    fn hook_event(&mut self, key: &str, value: NormalParam<'_>) -> Result<bool, Error>;

    fn key_event(&mut self, key: &str) -> Result<(), Error>;
}

struct Dispatcher<'h, 's> {
    judger: ConditionJudger<String, &'h mut StreamHook>,
    spooler: &'s mut Spooler,
}

impl Judge for Dispatcher<'_, '_> {
    fn is_registered(&self, key: &str) -> bool {
        self.judger.is_registered(key)
    }

    fn hook_event(&mut self, key: &str, value: NormalParam<'_>) -> Result<bool, Error> {
        let spooler = &mut *self.spooler;

        self.judger.hook_event(key, value, |param: NormalParam<'_>| {
            let content = spooler.spool(param.reader)?;
            log::debug!(
                "Buffered {} bytes for {} ({})",
                content.len(),
                key,
                if content.is_on_disk() { "disk" } else { "memory" }
            );

            Ok(BufferedParam {
                content,
                header: param.header,
            })
        })
    }

    fn key_event(&mut self, key: &str) -> Result<(), Error> {
        self.judger.key_event(key)
    }
}

/// Streaming `multipart/form-data` parser with per-field hooks.
///
/// Fields without a hook are collected as values. A hook receives the
/// content of its field while the body is being read; if it requires other
/// fields that have not been seen yet, the content is buffered and the hook
/// runs as soon as the last of them was decoded.
pub struct Parser {
    boundary: String,
    options: ParserOptions,
    pool: Arc<BufferPool>,
    hooks: Vec<StreamHook>,
    store: ValueStore,
}

impl Parser {
    pub fn new<S: Into<String>>(boundary: S) -> Self {
        Self::with_options(boundary, ParserOptions::default())
    }

    pub fn with_options<S: Into<String>>(boundary: S, options: ParserOptions) -> Self {
        let pool = options.buffer_pool.clone().unwrap_or_default();

        Parser {
            boundary: boundary.into(),
            options,
            pool,
            hooks: Vec::new(),
            store: ValueStore::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Registers `hook` for the field `name`. It is called once per
    /// occurrence of the field, but never before every field in `requires`
    /// has been decoded.
    ///
    /// The hook may read as much of the content as it likes; the rest is
    /// skipped.
    pub fn register<S, F>(&mut self, name: S, hook: F, requires: &[&str]) -> Result<(), Error>
    where
        S: Into<String>,
        F: FnMut(&mut dyn Read, &Header) -> Result<(), BoxError> + Send + 'static,
    {
        let name = name.into();
        if self.hooks.iter().any(|h| h.name == name) {
            return Err(Error::DuplicateHookName(name));
        }

        log::debug!("Registering hook for {} requiring {:?}", name, requires);

        self.hooks.push(StreamHook {
            name,
            func: Box::new(hook),
            requirements: requires.iter().map(|r| r.to_string()).collect(),
        });

        Ok(())
    }

    /// Reads the whole body, capturing values and running hooks.
    ///
    /// The first error stops parsing. Values captured before it stay
    /// available; hooks still waiting for requirements are not called.
    pub fn parse<R: Read>(&mut self, body: R) -> Result<(), Error> {
        let budget = Rc::new(Budget::new(&self.options));
        let mut spooler = Spooler::new(
            Arc::clone(&self.pool),
            Rc::clone(&budget),
            self.options.temp_dir.clone(),
        );
        let mut reader = MultipartReader::new(body, &self.boundary);

        let res = {
            let mut dispatcher = Dispatcher {
                judger: ConditionJudger::new(self.hooks.iter_mut().map(|h| (h.name.clone(), h))),
                spooler: &mut spooler,
            };

            decode(&mut reader, &budget, &self.store, &mut dispatcher)
        };

        if let Err(ref e) = res {
            log::debug!("Parsing multipart form failed: {}", e);
        }

        let cleanup = spooler.close();
        if let Err(ref e) = cleanup {
            log::warn!("Failed to clean up after parsing: {}", e);
        }

        Error::join(res, cleanup)
    }

    /// Handle to the captured values, usable from inside hooks.
    pub fn store(&self) -> ValueStore {
        self.store.clone()
    }

    pub fn value(&self, name: &str) -> Option<(String, Header)> {
        self.store.value(name)
    }

    pub fn value_raw(&self, name: &str) -> Option<(Bytes, Header)> {
        self.store.value_raw(name)
    }

    pub fn values(&self, name: &str) -> Option<Vec<Value>> {
        self.store.values(name)
    }

    pub fn value_map(&self) -> ValueMap {
        self.store.value_map()
    }
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Parser")
            .field("boundary", &self.boundary)
            .field("options", &self.options)
            .field("hooks", &self.hooks.iter().map(|h| &h.name).collect::<Vec<_>>())
            .finish()
    }
}

fn decode<R: Read, J: Judge>(
    reader: &mut MultipartReader<R>,
    budget: &Budget,
    store: &ValueStore,
    judge: &mut J,
) -> Result<(), Error> {
    while let Some(part) = reader.next_part()? {
        budget.take_part()?;
        for count in part.header().value_counts() {
            budget.take_headers(count as u64)?;
        }

        let name = part.name().to_owned();
        let (header, mut body) = part.into_parts();

        if judge.is_registered(&name) {
            let direct = judge.hook_event(
                &name,
                NormalParam {
                    reader: &mut body,
                    header,
                },
            )?;
            log::trace!("Part {} handed to hook (direct: {})", name, direct);
        } else {
            let content = read_value(&mut body, budget, name.len() as u64)?;
            log::trace!("Part {} captured as value ({} bytes)", name, content.len());
            store.push(name.clone(), Value::new(content, header));
        }

        judge.key_event(&name)?;
    }

    Ok(())
}

fn read_value(body: &mut dyn Read, budget: &Budget, name_len: u64) -> Result<Bytes, Error> {
    budget.take_mem(name_len)?;

    let mut content = Vec::new();
    body.take(budget.mem().saturating_add(1))
        .read_to_end(&mut content)?;
    budget.take_mem(content.len() as u64)?;

    Ok(Bytes::from(content))
}
