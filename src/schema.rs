//! In-memory schema description and the lookups the decoder runs against it.

use std::collections::HashMap;

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// One schema file: a package and its top-level messages.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct FileDescriptor {
    #[cfg_attr(feature = "serialize", serde(default))]
    pub package: String,
    #[cfg_attr(feature = "serialize", serde(default))]
    pub messages: Vec<MessageDescriptor>,
}

#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct MessageDescriptor {
    pub name: String,
    #[cfg_attr(feature = "serialize", serde(default))]
    pub fields: Vec<FieldDescriptor>,
    #[cfg_attr(feature = "serialize", serde(default))]
    pub nested: Vec<MessageDescriptor>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct FieldDescriptor {
    pub number: u32,
    pub json_name: String,
    #[cfg_attr(feature = "serialize", serde(flatten))]
    pub kind: FieldKind,
}

/// Declared kind of a field. Only `Message` changes how a length-delimited
/// value is decoded; the rest are informational.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialize",
    derive(Serialize, Deserialize),
    serde(rename_all = "snake_case", tag = "kind")
)]
pub enum FieldKind {
    Varint,
    Fixed32,
    Fixed64,
    LengthDelimited,
    /// Embedded message; `type_name` is fully qualified (`.pkg.Outer.Inner`)
    /// or relative to the file's package (`Outer.Inner`).
    Message { type_name: String },
}

impl FileDescriptor {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            messages: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: MessageDescriptor) -> Self {
        self.messages.push(message);
        self
    }
}

impl MessageDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            nested: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_nested(mut self, message: MessageDescriptor) -> Self {
        self.nested.push(message);
        self
    }
}

impl FieldDescriptor {
    pub fn new(number: u32, json_name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            number,
            json_name: json_name.into(),
            kind,
        }
    }

    pub fn varint(number: u32, json_name: impl Into<String>) -> Self {
        Self::new(number, json_name, FieldKind::Varint)
    }

    pub fn message(
        number: u32,
        json_name: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        Self::new(
            number,
            json_name,
            FieldKind::Message {
                type_name: type_name.into(),
            },
        )
    }

    /// The nested type name when this field is an embedded message.
    pub fn message_type(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Message { type_name } => Some(type_name),
            _ => None,
        }
    }
}

/// Resolves type names against one [`FileDescriptor`].
#[derive(Clone, Copy, Debug)]
pub struct SchemaIndex<'a> {
    file: &'a FileDescriptor,
}

impl<'a> SchemaIndex<'a> {
    pub fn new(file: &'a FileDescriptor) -> Self {
        Self { file }
    }

    pub fn file(&self) -> &'a FileDescriptor {
        self.file
    }

    /// Looks up `.package.Outer.Inner` (or `Outer.Inner`). When several
    /// messages at one level share a name, the first one wins. The walk stops
    /// at the first segment with no match.
    pub fn resolve(&self, type_name: &str) -> Option<&'a MessageDescriptor> {
        let mut segments = self.strip_package(type_name).split('.');
        let first = segments.next()?;
        let mut current = self.file.messages.iter().find(|m| m.name == first)?;
        for segment in segments {
            current = current.nested.iter().find(|m| m.name == segment)?;
        }
        Some(current)
    }

    fn strip_package<'n>(&self, type_name: &'n str) -> &'n str {
        let package = self.file.package.as_str();
        if package.is_empty() {
            return type_name.strip_prefix('.').unwrap_or(type_name);
        }
        type_name
            .strip_prefix('.')
            .and_then(|rest| rest.strip_prefix(package))
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(type_name)
    }
}

/// Field number to descriptor map for a single message.
#[derive(Debug)]
pub struct FieldTable<'a> {
    by_number: HashMap<u32, &'a FieldDescriptor>,
}

impl<'a> FieldTable<'a> {
    pub fn new(message: &'a MessageDescriptor) -> Self {
        let mut by_number = HashMap::with_capacity(message.fields.len());
        for field in &message.fields {
            by_number.entry(field.number).or_insert(field);
        }
        Self { by_number }
    }

    pub fn lookup(&self, number: u64) -> Option<&'a FieldDescriptor> {
        let number = u32::try_from(number).ok()?;
        self.by_number.get(&number).copied()
    }
}
