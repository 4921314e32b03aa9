//! Crate-level error types.
//!
//! One enum per pipeline stage boundary (spec.md 7 "errors vs.
//! diagnostics"), unified by [`CompileError`] so the driver can use `?`
//! across the whole pipeline. Non-fatal diagnostics (warnings, notes,
//! and the errors the semantic analyzer itself recovers from) never
//! travel through this channel — they live in `DiagnosticBag` and are
//! printed regardless of whether the overall compile succeeded.

use std::fmt;

/// Failure reading or resolving the translation unit before a single
/// token is produced.
#[derive(Debug)]
pub enum LexError {
    Io(String),
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::Io(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for LexError {}

/// The parser produced no usable `Program` (spec.md 4.3 errors are
/// reported as diagnostics and recovered from; this variant is reserved
/// for conditions recovery cannot paper over, e.g. an empty token
/// stream with no `Eof`).
#[derive(Debug)]
pub enum ParseError {
    Fatal(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Fatal(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

/// Semantic analysis never fails outright (every error is a
/// diagnostic and analysis continues); this variant exists so the
/// driver has a uniform stage-boundary type to unify, matching
/// `LexError`/`ParseError`/`CodeGenError`.
#[derive(Debug)]
pub enum SemaError {
    Fatal(String),
}

impl fmt::Display for SemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemaError::Fatal(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for SemaError {}

pub use crate::codegen::CodeGenError;

/// Unifies every stage's error type so `compile_file` can use `?`
/// across the whole pipeline.
#[derive(Debug)]
pub enum CompileError {
    Lex(LexError),
    Parse(ParseError),
    Sema(SemaError),
    CodeGen(CodeGenError),
    /// A diagnosed compile error was reported to the `DiagnosticBag`;
    /// the bag itself already holds the detail, so this variant only
    /// carries a short summary for `Display`.
    Diagnosed(String),
    /// The external assembler/linker failed or could not be run.
    Toolchain(String),
    /// `#include` resolution failed (missing header, unreadable file).
    Resolve(String),
    Io(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Lex(e) => write!(f, "{}", e),
            CompileError::Parse(e) => write!(f, "{}", e),
            CompileError::Sema(e) => write!(f, "{}", e),
            CompileError::CodeGen(e) => write!(f, "{}", e),
            CompileError::Diagnosed(msg) => write!(f, "{}", msg),
            CompileError::Toolchain(msg) => write!(f, "{}", msg),
            CompileError::Resolve(msg) => write!(f, "{}", msg),
            CompileError::Io(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        CompileError::Lex(e)
    }
}

impl From<ParseError> for CompileError {
    fn from(e: ParseError) -> Self {
        CompileError::Parse(e)
    }
}

impl From<SemaError> for CompileError {
    fn from(e: SemaError) -> Self {
        CompileError::Sema(e)
    }
}

impl From<CodeGenError> for CompileError {
    fn from(e: CodeGenError) -> Self {
        CompileError::CodeGen(e)
    }
}

impl From<std::io::Error> for CompileError {
    fn from(e: std::io::Error) -> Self {
        CompileError::Io(e.to_string())
    }
}
