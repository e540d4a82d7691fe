use std::fmt;

/// Position in the source text. Every tree node keeps the position it was
/// parsed at, and every pass carries it into the nodes it creates, so
/// errors always point into the user's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourcePos {
    pub row: usize,
    pub column: usize,
    pub offset: usize,
}

impl SourcePos {
    pub fn new(row: usize, column: usize, offset: usize) -> Self {
        SourcePos {
            row,
            column,
            offset,
        }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row, self.column)
    }
}
