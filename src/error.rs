use std::{fmt, rc::Rc};

use tracing::{error, warn};

use crate::Value;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("no accessor found for {type_name}.{index}")]
    NoAccessor { type_name: &'static str, index: String },

    #[error("{type_name}.{index} cannot be watched, it is readonly")]
    Readonly { type_name: &'static str, index: String },

    #[error("{type_name}.{index} is a method, methods cannot be watched")]
    MethodNotWatchable { type_name: &'static str, index: String },

    #[error("setting {type_name}.{index} is unsupported")]
    Unsupported { type_name: &'static str, index: String },

    #[error("id already exists: {0}")]
    IdExists(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("{0}")]
    Type(String),

    #[error("{0} is not a function")]
    NotCallable(String),

    #[error("async source rejected: {0}")]
    Rejected(String),

    #[error("detect cyclic update in `{0}`")]
    Cyclic(String),
}

impl Error {
    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Error::Type(message.into())
    }
}

/// Malformed expression source. `offset` counts characters, not bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at offset {offset} in `{source_text}`")]
pub struct ParseError {
    pub source_text: String,
    pub offset: usize,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(source_text: &str, byte_offset: usize, message: impl Into<String>) -> Self {
        let offset = source_text
            .get(..byte_offset)
            .map_or(byte_offset, |s| s.chars().count());
        Self {
            source_text: source_text.to_string(),
            offset,
            message: message.into(),
        }
    }
}

/// A fault caught at a propagation boundary.
#[derive(Clone)]
pub struct ErrorReport {
    pub message: String,
    pub error: Option<Error>,
    pub context: Option<String>,
    pub fatal: bool,
    pub data: Option<Value>,
}

impl ErrorReport {
    pub fn new(error: Error) -> Self {
        Self {
            message: error.to_string(),
            error: Some(error),
            context: None,
            fatal: false,
            data: None,
        }
    }
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}
impl fmt::Debug for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorReport")
            .field("message", &self.message)
            .field("context", &self.context)
            .field("fatal", &self.fatal)
            .finish()
    }
}

/// Receives every fault caught during deferred propagation.
pub trait ErrorSink {
    fn add(&self, report: ErrorReport);
}

impl<F: Fn(ErrorReport)> ErrorSink for F {
    fn add(&self, report: ErrorReport) {
        self(report)
    }
}

/// Default sink, writes reports to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn add(&self, report: ErrorReport) {
        let context = report.context.as_deref().unwrap_or("");
        if report.fatal {
            error!(context, fatal = true, "{}", report.message);
        } else {
            warn!(context, "{}", report.message);
        }
    }
}

pub(crate) fn default_error_sink() -> Rc<dyn ErrorSink> {
    Rc::new(TracingErrorSink)
}
