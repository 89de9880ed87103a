//! Error types returned while decoding a message.

use thiserror::Error;

/// Reasons a payload could not be turned into JSON.
///
/// Decoding is all-or-nothing: whenever one of these is returned, no partial
/// output is produced.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("buffer truncated at offset {offset}")]
    Truncated { offset: usize },

    #[error("varint at offset {offset} is wider than 64 bits")]
    VarintOverflow { offset: usize },

    #[error("unsupported wire type {wire_type} for field {field} at offset {offset}")]
    UnsupportedWireType {
        wire_type: u8,
        field: u64,
        offset: usize,
    },

    #[error("field number 0 at offset {offset}")]
    InvalidFieldNumber { offset: usize },

    #[error("can't find message '{0}'")]
    MessageNotFound(String),

    #[error("field '{field}' references unknown message type '{type_name}'")]
    UnresolvedMessageType { field: String, type_name: String },

    #[error("message nesting exceeds the limit of {limit}")]
    MaxDepthExceeded { limit: usize },

    #[error("failed to write JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DecodeError>;
