//! Error interface for this crate.
//!
//! Every error type in this crate implements [`Error`],
//! which adds optional diagnostic information on top of [`std::error::Error`]:
//! - a source location ([`ErrSpan`]) the error occurred at, and
//! - a help message suggesting how the error could be fixed.
//!
//! This module also re-exports the error types of the other modules.
use std::borrow::Cow;
use std::fmt::Write;

pub use crate::asm::{AsmErr, AsmErrKind};
pub use crate::parse::expr::ExprErr;
pub use crate::parse::lex::LexErr;
pub use crate::link::LinkErr;

/// Source location of an error.
///
/// The assembler works line by line, so this is the 1-based line number
/// of the statement that caused the error.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct ErrSpan(pub usize);
impl ErrSpan {
    /// The 1-based line number of this span.
    pub fn line(&self) -> usize {
        self.0
    }
}
impl From<usize> for ErrSpan {
    fn from(value: usize) -> Self {
        ErrSpan(value)
    }
}
impl std::fmt::Display for ErrSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}", self.0)
    }
}

/// Diagnostic information attached to the errors of this crate.
pub trait Error: std::error::Error {
    /// The source location of this error, if there is one.
    fn span(&self) -> Option<ErrSpan> {
        None
    }

    /// A hint on how to fix this error, if there is one.
    fn help(&self) -> Option<Cow<str>> {
        None
    }
}

/// Renders an error with its span and help message into a single report.
///
/// # Example
/// ```
/// use ppasm::asm::{assemble, AsmFlags};
/// use ppasm::err::report;
///
/// let err = assemble("mov par, #1", &AsmFlags::default()).unwrap_err();
/// assert_eq!(
///     report(&err),
///     "line 1: cannot write to read-only register par\n  help: par, cnt, ina and inb can only be used as a source"
/// );
/// ```
pub fn report<E: Error + ?Sized>(err: &E) -> String {
    let mut out = String::new();
    if let Some(span) = err.span() {
        let _ = write!(out, "{span}: ");
    }
    let _ = write!(out, "{err}");
    if let Some(help) = err.help() {
        let _ = write!(out, "\n  help: {help}");
    }
    out
}
