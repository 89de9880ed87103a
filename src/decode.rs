//! Schema-driven decoding of wire bytes into an ordered JSON-ready tree.

use crate::error::{DecodeError, Result};
use crate::schema::{FieldDescriptor, FieldTable, FileDescriptor, MessageDescriptor, SchemaIndex};
use crate::wire::{strip_grpc_frame, WireCursor, WireType};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::fmt::Write;
use tracing::{debug, trace};

pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Runs of at most this many bytes are summarized in full.
const SUMMARY_FULL_LEN: usize = 6;
const SUMMARY_EDGE_LEN: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Deepest embedded message accepted; the root message is depth 0.
    pub max_depth: usize,
    /// Skip a leading gRPC message frame before decoding.
    pub grpc_frame: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            grpc_frame: false,
        }
    }
}

impl DecodeOptions {
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn grpc_frame(mut self, grpc_frame: bool) -> Self {
        self.grpc_frame = grpc_frame;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DecodedValue {
    /// varint, fixed32 and fixed64 values, without sign interpretation
    Integer(u64),
    Message(DecodedMessage),
    /// Summary of a length-delimited run that is not an embedded message.
    Opaque(String),
}

impl DecodedValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&DecodedMessage> {
        match self {
            Self::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_opaque(&self) -> Option<&str> {
        match self {
            Self::Opaque(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedField {
    pub name: String,
    pub number: u64,
    /// Offset of the field key within the enclosing message's bytes.
    pub offset: usize,
    pub value: DecodedValue,
}

/// A decoded message: one entry per field occurrence, in stream order.
///
/// Serializes as a JSON object. Repeated fields produce repeated keys.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodedMessage {
    fields: Vec<DecodedField>,
}

impl DecodedMessage {
    pub fn fields(&self) -> &[DecodedField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// First value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&DecodedValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    /// Every value stored under `name`, in stream order.
    pub fn get_all<'m>(&'m self, name: &'m str) -> impl Iterator<Item = &'m DecodedValue> + 'm {
        self.fields
            .iter()
            .filter(move |f| f.name == name)
            .map(|f| &f.value)
    }
}

impl Serialize for DecodedMessage {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for field in &self.fields {
            map.serialize_entry(&field.name, &field.value)?;
        }
        map.end()
    }
}

/// What an observer sees for each field, before its value is read.
#[derive(Clone, Copy, Debug)]
pub struct FieldEvent<'a> {
    pub depth: usize,
    pub number: u64,
    pub name: &'a str,
    pub wire_type: WireType,
    pub offset: usize,
    /// Type the field is declared as in the schema, if it is known.
    pub declared: Option<&'a FieldDescriptor>,
}

/// Per-field tracing hook. It cannot change the decoded output.
pub trait FieldObserver: Send + Sync {
    fn on_field(&self, event: &FieldEvent<'_>);
}

impl<F> FieldObserver for F
where
    F: Fn(&FieldEvent<'_>) + Send + Sync,
{
    fn on_field(&self, event: &FieldEvent<'_>) {
        self(event)
    }
}

pub struct MessageDecoder<'s> {
    index: SchemaIndex<'s>,
    options: DecodeOptions,
    observer: Option<&'s dyn FieldObserver>,
}

impl<'s> MessageDecoder<'s> {
    pub fn new(file: &'s FileDescriptor) -> Self {
        Self {
            index: SchemaIndex::new(file),
            options: DecodeOptions::default(),
            observer: None,
        }
    }

    pub fn with_options(mut self, options: DecodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_observer(mut self, observer: &'s dyn FieldObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// Resolves `type_name` and decodes `bytes` as that message.
    pub fn decode_root(&self, bytes: &[u8], type_name: &str) -> Result<DecodedMessage> {
        let message = self
            .index
            .resolve(type_name)
            .ok_or_else(|| DecodeError::MessageNotFound(type_name.to_string()))?;
        let bytes = if self.options.grpc_frame {
            strip_grpc_frame(bytes)
        } else {
            bytes
        };
        debug!(type_name, len = bytes.len(), "decoding root message");
        self.decode(bytes, message, 0)
    }

    /// Same as [`decode_root`](Self::decode_root), rendered as compact JSON.
    pub fn unmarshal(&self, bytes: &[u8], type_name: &str) -> Result<Vec<u8>> {
        let message = self.decode_root(bytes, type_name)?;
        Ok(serde_json::to_vec(&message)?)
    }

    pub fn decode(
        &self,
        bytes: &[u8],
        message: &MessageDescriptor,
        depth: usize,
    ) -> Result<DecodedMessage> {
        if depth > self.options.max_depth {
            return Err(DecodeError::MaxDepthExceeded {
                limit: self.options.max_depth,
            });
        }

        let table = FieldTable::new(message);
        let mut cursor = WireCursor::new(bytes);
        let mut decoded = DecodedMessage::default();

        loop {
            let offset = cursor.pos();
            let Some(tag) = cursor.read_tag()? else {
                break;
            };
            let wire_type =
                WireType::from_bits(tag.wire_bits).ok_or(DecodeError::UnsupportedWireType {
                    wire_type: tag.wire_bits,
                    field: tag.field,
                    offset,
                })?;
            if tag.field == 0 {
                return Err(DecodeError::InvalidFieldNumber { offset });
            }
            let declared = table.lookup(tag.field);
            let name = field_name(declared, tag.field);

            trace!(
                msg_type = %message.name,
                depth,
                field = tag.field,
                name = %name,
                wire_type = %wire_type,
                offset,
                "field"
            );
            if let Some(observer) = self.observer {
                observer.on_field(&FieldEvent {
                    depth,
                    number: tag.field,
                    name: &name,
                    wire_type,
                    offset,
                    declared,
                });
            }

            let value = match wire_type {
                WireType::Varint => DecodedValue::Integer(cursor.read_varint()?),
                WireType::Fixed32 => DecodedValue::Integer(u64::from(cursor.read_fixed32()?)),
                WireType::Fixed64 => DecodedValue::Integer(cursor.read_fixed64()?),
                WireType::LengthDelimited => {
                    let run = cursor.read_length_delimited()?;
                    self.decode_length_delimited(run, declared, depth)?
                }
            };

            decoded.fields.push(DecodedField {
                name,
                number: tag.field,
                offset,
                value,
            });
        }

        Ok(decoded)
    }

    fn decode_length_delimited(
        &self,
        run: &[u8],
        declared: Option<&FieldDescriptor>,
        depth: usize,
    ) -> Result<DecodedValue> {
        let Some((field, type_name)) = declared.and_then(|f| Some((f, f.message_type()?))) else {
            return Ok(DecodedValue::Opaque(summarize(run)));
        };
        let nested =
            self.index
                .resolve(type_name)
                .ok_or_else(|| DecodeError::UnresolvedMessageType {
                    field: field.json_name.clone(),
                    type_name: type_name.to_string(),
                })?;
        debug!(type_name, depth = depth + 1, len = run.len(), "entering nested message");
        self.decode(run, nested, depth + 1).map(DecodedValue::Message)
    }
}

/// Declared JSON name, or `field_<N>` for numbers the schema lacks. The two
/// are not checked against each other: a field declared as `field_2` and an
/// unknown field 2 share a key, and only `DecodedField::number` tells them
/// apart.
fn field_name(declared: Option<&FieldDescriptor>, number: u64) -> String {
    match declared {
        Some(field) => field.json_name.clone(),
        None => format!("field_{number}"),
    }
}

/// `bytes[N]` plus the bytes in hex, elided in the middle for longer runs.
fn summarize(run: &[u8]) -> String {
    fn push_hex(out: &mut String, bytes: &[u8]) {
        for b in bytes {
            let _ = write!(out, " {b:02x}");
        }
    }

    let mut out = format!("bytes[{}]", run.len());
    if run.len() <= SUMMARY_FULL_LEN {
        push_hex(&mut out, run);
    } else {
        push_hex(&mut out, &run[..SUMMARY_EDGE_LEN]);
        out.push_str(" ..");
        push_hex(&mut out, &run[run.len() - SUMMARY_EDGE_LEN..]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldKind;
    use std::sync::Mutex;

    fn point_schema() -> FileDescriptor {
        FileDescriptor::new("pkg").with_message(
            MessageDescriptor::new("Point")
                .with_field(FieldDescriptor::varint(1, "x"))
                .with_field(FieldDescriptor::varint(2, "y")),
        )
    }

    #[test]
    fn summary_shows_short_runs_in_full() {
        assert_eq!(summarize(&[]), "bytes[0]");
        assert_eq!(summarize(b"hello"), "bytes[5] 68 65 6c 6c 6f");
        assert_eq!(
            summarize(&[1, 2, 3, 4, 5, 6]),
            "bytes[6] 01 02 03 04 05 06"
        );
    }

    #[test]
    fn summary_elides_long_runs() {
        assert_eq!(
            summarize(&[1, 2, 3, 4, 5, 6, 7, 8]),
            "bytes[8] 01 02 03 .. 06 07 08"
        );
    }

    #[test]
    fn records_offsets_and_numbers() {
        let file = point_schema();
        let decoder = MessageDecoder::new(&file);
        let msg = decoder
            .decode_root(&[0x08, 0x01, 0x10, 0x02], ".pkg.Point")
            .unwrap();

        let offsets: Vec<_> = msg.fields().iter().map(|f| (f.number, f.offset)).collect();
        assert_eq!(offsets, vec![(1, 0), (2, 2)]);
        assert_eq!(msg.get("y").and_then(DecodedValue::as_u64), Some(2));
    }

    #[test]
    fn declared_kind_does_not_override_wire_kind() {
        let file = FileDescriptor::new("pkg").with_message(
            MessageDescriptor::new("M")
                .with_field(FieldDescriptor::message(1, "sub", ".pkg.M"))
                .with_field(FieldDescriptor::new(2, "raw", FieldKind::Fixed32)),
        );
        let decoder = MessageDecoder::new(&file);
        // field 1 arrives as a varint, field 2 as length-delimited
        let msg = decoder
            .decode_root(&[0x08, 0x05, 0x12, 0x01, 0xaa], ".pkg.M")
            .unwrap();

        assert_eq!(msg.get("sub"), Some(&DecodedValue::Integer(5)));
        assert_eq!(
            msg.get("raw").and_then(DecodedValue::as_opaque),
            Some("bytes[1] aa")
        );
    }

    #[test]
    fn depth_limit_counts_nested_levels() {
        let file = FileDescriptor::new("pkg").with_message(
            MessageDescriptor::new("Node").with_field(FieldDescriptor::message(1, "child", ".pkg.Node")),
        );
        // Node { child: Node { child: Node {} } }
        let bytes = [0x0a, 0x02, 0x0a, 0x00];

        let decoder =
            MessageDecoder::new(&file).with_options(DecodeOptions::default().max_depth(2));
        assert!(decoder.decode_root(&bytes, ".pkg.Node").is_ok());

        let decoder =
            MessageDecoder::new(&file).with_options(DecodeOptions::default().max_depth(1));
        assert!(matches!(
            decoder.decode_root(&bytes, ".pkg.Node"),
            Err(DecodeError::MaxDepthExceeded { limit: 1 })
        ));
    }

    #[test]
    fn observer_sees_every_field() {
        let file = point_schema();
        let seen = Mutex::new(Vec::new());
        let observer = |event: &FieldEvent<'_>| {
            seen.lock()
                .unwrap()
                .push((event.depth, event.name.to_string(), event.wire_type));
        };
        let decoder = MessageDecoder::new(&file).with_observer(&observer);
        let msg = decoder
            .decode_root(&[0x08, 0x01, 0x1d, 0, 0, 0, 0], ".pkg.Point")
            .unwrap();

        assert_eq!(msg.len(), 2);
        assert_eq!(
            seen.into_inner().unwrap(),
            vec![
                (0, "x".to_string(), WireType::Varint),
                (0, "field_3".to_string(), WireType::Fixed32),
            ]
        );
    }

    #[test]
    fn field_number_zero_is_rejected() {
        let file = point_schema();
        let decoder = MessageDecoder::new(&file);
        assert!(matches!(
            decoder.decode_root(&[0x08, 0x01, 0x00, 0x01], ".pkg.Point"),
            Err(DecodeError::InvalidFieldNumber { offset: 2 })
        ));
    }

    #[test]
    fn fallback_key_can_match_a_declared_name() {
        let file = FileDescriptor::new("pkg").with_message(
            MessageDescriptor::new("M").with_field(FieldDescriptor::varint(1, "field_2")),
        );
        let decoder = MessageDecoder::new(&file);
        let msg = decoder
            .decode_root(&[0x08, 0x01, 0x10, 0x02], ".pkg.M")
            .unwrap();

        let keyed: Vec<_> = msg
            .fields()
            .iter()
            .map(|f| (f.name.as_str(), f.number))
            .collect();
        assert_eq!(keyed, vec![("field_2", 1), ("field_2", 2)]);
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"field_2":1,"field_2":2}"#
        );
    }

    #[test]
    fn nested_values_and_options_are_exposed() {
        let file = FileDescriptor::new("pkg")
            .with_message(
                MessageDescriptor::new("Point")
                    .with_field(FieldDescriptor::varint(1, "x"))
                    .with_field(FieldDescriptor::varint(2, "y")),
            )
            .with_message(
                MessageDescriptor::new("Wrapper")
                    .with_field(FieldDescriptor::message(1, "inner", ".pkg.Point")),
            );
        let options = DecodeOptions::default().max_depth(8);
        let decoder = MessageDecoder::new(&file).with_options(options);
        assert_eq!(decoder.options(), &options);

        let msg = decoder
            .decode_root(&[0x0a, 0x02, 0x10, 0x09], ".pkg.Wrapper")
            .unwrap();
        let inner = msg.get("inner").and_then(DecodedValue::as_message).unwrap();
        assert_eq!(inner.get("y").and_then(DecodedValue::as_u64), Some(9));
        assert!(msg.get("inner").and_then(DecodedValue::as_u64).is_none());
    }

    #[test]
    fn grpc_frame_option_strips_prefix() {
        let file = point_schema();
        let framed = [0x00, 0x00, 0x00, 0x00, 0x02, 0x08, 0x07];

        let decoder =
            MessageDecoder::new(&file).with_options(DecodeOptions::default().grpc_frame(true));
        assert_eq!(
            decoder.unmarshal(&framed, ".pkg.Point").unwrap(),
            br#"{"x":7}"#
        );

        // without the option the frame bytes are read as fields
        let decoder = MessageDecoder::new(&file);
        assert!(decoder.decode_root(&framed, ".pkg.Point").is_err());
    }
}
