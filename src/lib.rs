//! Decode protobuf wire-format payloads into JSON using a schema supplied at
//! runtime instead of generated code.

mod decode;
mod error;
mod schema;
mod wire;

pub use decode::{
    DecodeOptions, DecodedField, DecodedMessage, DecodedValue, FieldEvent, FieldObserver,
    MessageDecoder, DEFAULT_MAX_DEPTH,
};
pub use error::{DecodeError, Result};
pub use schema::{
    FieldDescriptor, FieldKind, FieldTable, FileDescriptor, MessageDescriptor, SchemaIndex,
};
pub use wire::{strip_grpc_frame, Tag, WireCursor, WireType};

/// decodes `bytes` as the message `type_name` (e.g. `.pkg.Outer.Inner`) and
/// returns it as compact JSON
pub fn unmarshal(bytes: &[u8], file: &FileDescriptor, type_name: &str) -> Result<Vec<u8>> {
    MessageDecoder::new(file).unmarshal(bytes, type_name)
}

/// like [`unmarshal`], but returns the ordered tree instead of JSON text
pub fn decode_message(
    bytes: &[u8],
    file: &FileDescriptor,
    type_name: &str,
) -> Result<DecodedMessage> {
    MessageDecoder::new(file).decode_root(bytes, type_name)
}
