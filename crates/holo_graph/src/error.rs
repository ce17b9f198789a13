//! Result codes shared by every processor.
//!
//! `ErrorCode` is the closed taxonomy reported back to clients in
//! `PartitionResult` entries. `EngineCode` and `WriteResult` are what the
//! collaborators (KV engine and row codec) hand back; both are mapped into
//! `ErrorCode` at the processor boundary.

use serde::{Deserialize, Serialize};

/// Response-level error code attached to a failed partition.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    thiserror::Error,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    #[error("succeeded")]
    Succeeded,
    #[error("partition not found")]
    PartNotFound,
    #[error("space not found")]
    SpaceNotFound,
    #[error("partition leader changed")]
    LeaderChanged,
    #[error("consensus error")]
    ConsensusError,
    #[error("write blocked by checkpoint")]
    CheckpointBlocked,
    #[error("checkpoint failed")]
    FailedToCheckpoint,
    #[error("partial result")]
    PartialResult,
    #[error("tag property not found")]
    TagPropNotFound,
    #[error("edge property not found")]
    EdgePropNotFound,
    #[error("data type mismatch")]
    DataTypeMismatch,
    #[error("field unset")]
    FieldUnset,
    #[error("value out of range")]
    OutOfRange,
    #[error("not nullable")]
    NotNullable,
    #[error("invalid field value")]
    InvalidFieldValue,
    #[error("index not found")]
    IndexNotFound,
    #[error("tag not found")]
    TagNotFound,
    #[error("edge not found")]
    EdgeNotFound,
    #[error("vertex not found")]
    VertexNotFound,
    #[error("filtered out by condition")]
    FilterOut,
    #[error("invalid vertex id")]
    InvalidVid,
    #[error("invalid space vid length")]
    InvalidSpaceVidLen,
    #[error("invalid filter")]
    InvalidFilter,
    #[error("invalid operation")]
    InvalidOperation,
    #[error("unknown error")]
    Unknown,
}

impl ErrorCode {
    pub fn is_ok(self) -> bool {
        self == ErrorCode::Succeeded
    }
}

/// Outcome of a key-value engine operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EngineCode {
    Succeeded,
    LeaderChanged,
    SpaceNotFound,
    PartNotFound,
    KeyNotFound,
    ConsensusError,
    CheckpointError,
    WriteBlocked,
    PartialResult,
    Unknown,
}

impl EngineCode {
    pub fn is_ok(self) -> bool {
        self == EngineCode::Succeeded
    }
}

impl From<EngineCode> for ErrorCode {
    fn from(code: EngineCode) -> Self {
        match code {
            EngineCode::Succeeded => ErrorCode::Succeeded,
            EngineCode::LeaderChanged => ErrorCode::LeaderChanged,
            EngineCode::SpaceNotFound => ErrorCode::SpaceNotFound,
            EngineCode::PartNotFound => ErrorCode::PartNotFound,
            EngineCode::ConsensusError => ErrorCode::ConsensusError,
            EngineCode::CheckpointError => ErrorCode::FailedToCheckpoint,
            EngineCode::WriteBlocked => ErrorCode::CheckpointBlocked,
            EngineCode::PartialResult => ErrorCode::PartialResult,
            EngineCode::KeyNotFound | EngineCode::Unknown => ErrorCode::Unknown,
        }
    }
}

/// Outcome of encoding one row against its schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WriteResult {
    Succeeded,
    UnknownField,
    NotNullable,
    TypeMismatch,
    FieldUnset,
    OutOfRange,
    IncorrectValue,
}

/// Map a row-writer outcome to the response taxonomy.
///
/// `UnknownField` is reported against the tag or edge variant depending on
/// what was being encoded.
pub fn write_result_to(result: WriteResult, is_edge: bool) -> ErrorCode {
    match result {
        WriteResult::Succeeded => ErrorCode::Succeeded,
        WriteResult::UnknownField if is_edge => ErrorCode::EdgePropNotFound,
        WriteResult::UnknownField => ErrorCode::TagPropNotFound,
        WriteResult::NotNullable => ErrorCode::NotNullable,
        WriteResult::TypeMismatch => ErrorCode::DataTypeMismatch,
        WriteResult::FieldUnset => ErrorCode::FieldUnset,
        WriteResult::OutOfRange => ErrorCode::OutOfRange,
        WriteResult::IncorrectValue => ErrorCode::InvalidFieldValue,
    }
}
