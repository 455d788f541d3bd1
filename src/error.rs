use thiserror::Error;

use crate::projection::Crs;
use crate::types::DatasetKind;

/// A dataset did not have the shape the typed records expect.
#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("{dataset}: missing column '{column}'")]
    MissingColumn { dataset: DatasetKind, column: String },
    #[error("{dataset}: column '{column}' {detail}")]
    BadValue {
        dataset: DatasetKind,
        column: String,
        detail: String,
    },
    #[error("{dataset}: unsupported geometry ({detail})")]
    Geometry { dataset: DatasetKind, detail: String },
    #[error("{file}: configured as {declared} but stored in {found}")]
    CrsMismatch {
        file: String,
        declared: Crs,
        found: String,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum AnalysisError {
    #[error("RHNA cycle must be 4 or 5, got {0}")]
    InvalidCycle(u8),
    #[error("dataset {0} was not provided to this repository")]
    DatasetUnavailable(DatasetKind),
}
