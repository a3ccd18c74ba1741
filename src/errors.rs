//! error types, helpers and reporting

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::IsTerminal;

use thiserror::Error;

use crate::hash::Sha256Hash;
use crate::import::ImportLocation;
use crate::lex::{Location, TokenKind};
use crate::syntax::{Expr, Import, Label, Op, Var};

// error types {{{
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyntaxErrorKind {
    #[error("Unexpected {token}, expected {expected}")]
    Unexpected {
        token: TokenKind,
        expected: &'static str,
    },
    #[error("Expression is nested too deeply (limit is {0})")]
    TooDeep(usize),
    #[error("Duplicate field `{0}`")]
    DuplicateField(Label),
    #[error("Invalid integrity hash `{0}`")]
    InvalidHash(String),
    #[error("`{0}` is reserved and cannot be bound")]
    ReservedLabel(String),
    #[error("An empty list must be annotated with `: List T`")]
    EmptyListAnnotation,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}:{}: {}", .loc.0, .lnum, .kind)]
pub struct SyntaxError {
    pub loc: Location,
    /// 1-based
    pub lnum: usize,
    /// 0-based, in bytes
    pub col: usize,
    /// the whole offending line, without its line break
    pub line: String,
    pub kind: SyntaxErrorKind,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TypeError {
    #[error("Unbound variable `{0}`")]
    UnboundVariable(Var),
    #[error("`Sort` has no type")]
    UntypedSort,
    #[error("Invalid function input, `{0}` is not a type")]
    InvalidInputType(Expr),
    #[error("Invalid function output, `{0}` is not a type")]
    InvalidOutputType(Expr),
    #[error("Not a function: `{func}` has type `{ty}`")]
    NotAFunction { func: Expr, ty: Expr },
    #[error("Wrong type of function argument, expected `{expected}` but got `{actual}`")]
    TypeMismatch { expected: Expr, actual: Expr },
    #[error("Expression doesn't match annotation, annotated `{annotation}` but got `{actual}`")]
    AnnotMismatch { annotation: Expr, actual: Expr },
    #[error("Invalid predicate for `if`, expected `Bool` but got `{0}`")]
    InvalidPredicate(Expr),
    #[error("An `if` branch must be a term, `{0}` is not")]
    IfBranchMustBeTerm(Expr),
    #[error("`if` branches have different types, `{left}` and `{right}`")]
    IfBranchMismatch { left: Expr, right: Expr },
    #[error("Operand of `{op}` must be `{expected}`, got `{actual}`")]
    OperandMismatch { op: Op, expected: Expr, actual: Expr },
    #[error("Cannot append lists of different types, `{left}` and `{right}`")]
    ListAppendMismatch { left: Expr, right: Expr },
    #[error("Invalid type for list elements, `{0}` is not a type")]
    InvalidListType(Expr),
    #[error("An empty list needs a `List T` annotation, got `{0}`")]
    MissingListType(Expr),
    #[error("List element {index} should have type `{expected}` but has type `{actual}`")]
    InvalidListElement {
        index: usize,
        expected: Expr,
        actual: Expr,
    },
    #[error("Invalid type for field `{0}`")]
    InvalidFieldType(Label),
    #[error("Invalid type for alternative `{0}`")]
    InvalidAlternativeType(Label),
    #[error("Missing field `{0}`")]
    MissingField(Label),
    #[error("Cannot select from `{0}`, it is neither a record nor a union type")]
    NotARecord(Expr),
    #[error("Cannot interpolate a value of type `{0}`, only `Text`")]
    CantInterpolate(Expr),
    #[error("Import `{0}` was not resolved")]
    UnresolvedImport(Import),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Environment variable `{0}` is not set")]
    EnvNotSet(String),
    #[error("`missing` never resolves")]
    Missing,
    #[error("Remote imports are not available in this build")]
    RemoteDisabled,
    #[error("{0}")]
    Http(String),
    #[error("No content for this location")]
    NotFound,
    #[error("Content is not valid UTF-8")]
    NotUtf8,
}

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("Could not encode expression: {0}")]
    Encode(postcard::Error),
    #[error("Could not decode expression: {0}")]
    Decode(postcard::Error),
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("Invalid sha256 hash `{0}`")]
pub struct ParseHashError(pub String);

fn arrows(chain: &[ImportLocation]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error("Import cycle: {}", arrows(.cycle))]
    ImportCycle { cycle: Vec<ImportLocation> },
    #[error("Cannot fetch {location}: {error}")]
    ImportFetch {
        location: ImportLocation,
        #[source]
        error: FetchError,
    },
    #[error("Integrity check failed for {location}: expected {expected}, got {actual}")]
    ImportIntegrity {
        location: ImportLocation,
        expected: Sha256Hash,
        actual: Sha256Hash,
    },
    #[error("Imports are nested too deeply (limit is {limit})")]
    ImportDepth { limit: usize },
    #[error("Remote {importer} cannot import {location}")]
    ImportNotAllowed {
        importer: ImportLocation,
        location: ImportLocation,
    },
    #[error("Expression is nested too deeply once imports are resolved (limit is {limit})")]
    ResolvedDepth { limit: usize },
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// What went wrong and the imports it happened under, outermost first.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    chain: Vec<ImportLocation>,
}
// }}}

// error helpers {{{
pub fn syntax_error(source: &[u8], loc: Location, kind: SyntaxErrorKind) -> SyntaxError {
    let at = loc.1.start.min(source.len());
    let line_start = source[..at]
        .iter()
        .rposition(|&c| b'\n' == c)
        .map_or(0, |k| k + 1);
    let line_end = source[at..]
        .iter()
        .position(|&c| b'\n' == c)
        .map_or(source.len(), |k| at + k);
    let lnum = 1 + source[..line_start].iter().filter(|&&c| b'\n' == c).count();
    let line = String::from_utf8_lossy(&source[line_start..line_end])
        .trim_end_matches('\r')
        .to_string();
    SyntaxError {
        loc,
        lnum,
        col: at - line_start,
        line,
        kind,
    }
}

impl Error {
    pub fn new(kind: impl Into<ErrorKind>, chain: Vec<ImportLocation>) -> Self {
        Self {
            kind: kind.into(),
            chain,
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn chain(&self) -> &[ImportLocation] {
        &self.chain
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }
}

macro_rules! from_kind {
    ($($t:ty),*) => {$(
        impl From<$t> for Error {
            fn from(kind: $t) -> Self {
                Error::new(kind, Vec::new())
            }
        }
    )*};
}

from_kind!(ErrorKind, SyntaxError, TypeError, EncodingError);

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}", self.kind)?;
        if let Some(innermost) = self.chain.last() {
            write!(f, " (in {innermost})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.kind)
    }
}
// }}}

// generate report {{{
pub struct Report<'a> {
    title: &'static str,
    snippet: Option<&'a SyntaxError>,
    message: String,
    chain: &'a [ImportLocation],
}

impl Error {
    pub fn report(&self) -> Report<'_> {
        let (title, snippet) = match &self.kind {
            ErrorKind::Syntax(e) => ("Syntax error", Some(e)),
            ErrorKind::ImportCycle { .. } => ("Import cycle", None),
            ErrorKind::ImportFetch { .. } => ("Could not fetch import", None),
            ErrorKind::ImportIntegrity { .. } => ("Integrity check failed", None),
            ErrorKind::ImportDepth { .. } => ("Imports nested too deeply", None),
            ErrorKind::ImportNotAllowed { .. } => ("Import not allowed", None),
            ErrorKind::ResolvedDepth { .. } => ("Expression nested too deeply", None),
            ErrorKind::Type(_) => ("Type error", None),
            ErrorKind::Encoding(_) => ("Encoding error", None),
        };
        let message = match &self.kind {
            ErrorKind::Syntax(e) => e.kind.to_string(),
            other => other.to_string(),
        };
        Report {
            title,
            snippet,
            message,
            chain: &self.chain,
        }
    }

    /// print the report to stderr, with colors if it is a terminal
    pub fn report_stderr(&self) {
        if std::io::stderr().is_terminal() {
            eprint!("{:#}", self.report());
        } else {
            eprint!("{}", self.report());
        }
    }
}
// }}}

// display report {{{
impl Display for Report<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let use_colors = f.alternate();
        let ctop: &str = if use_colors { "\x1b[33m" } else { "" };
        let cmsg: &str = if use_colors { "\x1b[34m" } else { "" };
        let carr: &str = if use_colors { "\x1b[35m" } else { "" };
        let cnum: &str = if use_colors { "\x1b[36m" } else { "" };
        let r: &str = if use_colors { "\x1b[m" } else { "" };

        match self.snippet {
            Some(e) => {
                writeln!(f, "{}:{}: {ctop}{}{r}", e.loc.0, e.lnum, self.title)?;
                writeln!(f, "{ctop}|{cnum}{:5} {carr}|{r} {}", e.lnum, e.line)?;
                let width = e.loc.1.len().clamp(1, e.line.len().saturating_sub(e.col).max(1));
                writeln!(
                    f,
                    "{ctop}|{r}        {}{carr}{}{r} {cmsg}{}{r}",
                    " ".repeat(e.col),
                    "-".repeat(width),
                    self.message
                )?;
            }
            None => {
                writeln!(f, "{ctop}{}{r}", self.title)?;
                writeln!(f, "{ctop}|{r} {cmsg}{}{r}", self.message)?;
            }
        }

        for location in self.chain.iter().rev() {
            writeln!(f, "{ctop}|{r} {carr}↳{r} imported from {location}")?;
        }

        writeln!(f, "{ctop}==={r}")
    }
}
// }}}
