use color_print::cprintln;
use thiserror::Error;

use crate::pos::SourcePos;
use crate::tree::ReturnType;

/// What went wrong. Each compilation aborts on the first error raised.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    #[error("vector size mismatch: expected {expected}, found {found}")]
    SizeMismatch { expected: u16, found: u16 },

    #[error("index {index} out of bounds for array `{name}` of size {size}")]
    OutOfBounds {
        name: String,
        index: i16,
        size: u16,
    },

    #[error("operation not permitted with a non-constant array index")]
    IllegalIndex,

    #[error("expected {expected} expression, found {found}")]
    TypeMismatch {
        expected: ReturnType,
        found: ReturnType,
    },

    #[error("division by zero")]
    DivideByZero,

    #[error("program requires {required} stack words but the target provides {limit}")]
    StackOverflow { required: u16, limit: u16 },

    #[error("program is {required} words but the target provides {limit}")]
    BytecodeOverflow { required: usize, limit: u16 },

    #[error("unknown {what}: `{name}`")]
    UnknownSymbol { what: &'static str, name: String },

    #[error("internal: {0}")]
    Internal(String),
}

/// A compile error with the source position it was detected at.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{pos}: {kind}")]
pub struct CompileError {
    pub pos: SourcePos,
    pub kind: ErrorKind,
}

impl CompileError {
    pub fn new(pos: SourcePos, kind: ErrorKind) -> Self {
        CompileError { pos, kind }
    }

    pub fn internal(pos: SourcePos, message: impl Into<String>) -> Self {
        CompileError::new(pos, ErrorKind::Internal(message.into()))
    }

    /// Print the error with the offending source line and a caret.
    pub fn print_diag(&self, source: &str) {
        cprintln!("<red,bold>error</>: {}", self.kind);
        cprintln!("     <blue>--></> {}:{}", self.pos.row, self.pos.column);
        cprintln!("      <blue>|</>");

        let line = source.lines().nth(self.pos.row.saturating_sub(1)).unwrap_or("");
        cprintln!(" <blue>{:>4} |</> {}", self.pos.row, line);
        cprintln!(
            "      <blue>|</> {}<red,bold>^</>",
            " ".repeat(self.pos.column.saturating_sub(1))
        );
    }
}
