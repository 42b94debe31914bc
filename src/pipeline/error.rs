use core::fmt;
use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::pipeline::mapping::SourceKind;

/// Build-level failures. Per-record problems are counted in the build report
/// instead of being raised here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// The backbone table has no usable (system_id, timestamp) pairs.
    MissingBackbone { table: String },
    /// A mapped column is absent from every row of a non-empty table.
    UnmappedColumn { source: SourceKind, column: String },
    /// The column mapping itself is inconsistent.
    InvalidMapping(String),
    /// Two stages disagree about the number of rows they exchanged.
    ShapeMismatch {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl Display for BuildError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::MissingBackbone { table } => {
                write!(f, "backbone table {} has no usable rows", table)
            }
            BuildError::UnmappedColumn { source, column } => {
                write!(f, "column {} not present in {} source rows", column, source.label())
            }
            BuildError::InvalidMapping(msg) => write!(f, "invalid column mapping: {}", msg),
            BuildError::ShapeMismatch {
                stage,
                expected,
                actual,
            } => write!(f, "{} produced {} row(s), expected {}", stage, actual, expected),
        }
    }
}

impl Error for BuildError {}
