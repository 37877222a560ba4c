use core::fmt;

/// Generic result type for traversal operations.
pub type Result<T> = core::result::Result<T, WalkError>;

/// A path-level failure with the errno that produced it.
///
/// The first error recorded during a walk decides the final return, so the
/// raw OS code is kept rather than an `io::ErrorKind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkError {
    pub path: Vec<u8>,
    pub errno: i32,
}

impl WalkError {
    #[must_use]
    pub fn new(path: &[u8], errno: i32) -> Self {
        Self {
            path: path.to_vec(),
            errno,
        }
    }

    #[must_use]
    pub fn from_io(path: &[u8], error: &std::io::Error) -> Self {
        Self::new(path, error.raw_os_error().unwrap_or(libc::EIO))
    }
}

impl fmt::Display for WalkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}': {}",
            String::from_utf8_lossy(&self.path),
            std::io::Error::from_raw_os_error(self.errno)
        )
    }
}

impl std::error::Error for WalkError {}

/// Errors raised while turning command-line tokens into an expression tree.
///
/// These never reach runtime: anything listed here is reported before the
/// first directory is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    UnknownPredicate(String),
    MissingArgument(&'static str),
    ExtraOperand(String),
    UnmatchedParen,
    EmptyParens,
    DanglingOperator(&'static str),
    InvalidInteger(String),
    InvalidMode(String),
    InvalidType(String),
    InvalidRegex(String),
    InvalidGlob(String),
    InvalidTimestamp(String),
    InvalidFormat { directive: String, reason: &'static str },
    UnknownUser(String),
    UnknownGroup(String),
    UnterminatedExec,
    StatReference(String),
    SinkOpen(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UnknownPredicate(ref tok) => write!(f, "unknown predicate '{tok}'"),
            Self::MissingArgument(pred) => write!(f, "missing argument to '{pred}'"),
            Self::ExtraOperand(ref tok) => write!(f, "paths must precede expression: '{tok}'"),
            Self::UnmatchedParen => write!(f, "unmatched '('"),
            Self::EmptyParens => write!(f, "empty parentheses are not allowed"),
            Self::DanglingOperator(op) => write!(f, "expected an expression after '{op}'"),
            Self::InvalidInteger(ref arg) => write!(f, "invalid number '{arg}'"),
            Self::InvalidMode(ref arg) => write!(f, "invalid mode '{arg}'"),
            Self::InvalidType(ref arg) => write!(f, "invalid file type '{arg}'"),
            Self::InvalidRegex(ref arg) => write!(f, "invalid regex: {arg}"),
            Self::InvalidGlob(ref arg) => write!(f, "invalid glob pattern '{arg}'"),
            Self::InvalidTimestamp(ref arg) => write!(f, "invalid timestamp '{arg}'"),
            Self::InvalidFormat {
                ref directive,
                reason,
            } => write!(f, "invalid format directive '{directive}': {reason}"),
            Self::UnknownUser(ref arg) => write!(f, "'{arg}' is not a known user"),
            Self::UnknownGroup(ref arg) => write!(f, "'{arg}' is not a known group"),
            Self::UnterminatedExec => write!(f, "-exec is missing a terminating ';' or '+'"),
            Self::StatReference(ref path) => write!(f, "cannot stat reference file '{path}'"),
            Self::SinkOpen(ref path) => write!(f, "cannot open output file '{path}'"),
        }
    }
}

impl std::error::Error for ParseError {}
