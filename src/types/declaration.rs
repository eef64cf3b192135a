//! Declarations: the immutable schema nodes of a trace.

use crate::io::ByteOrder;
use compact_str::CompactString;
use serde_derive::Deserialize;
use serde_derive::Serialize;

/// Numeric base an integer should be displayed in.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde_repr::Serialize_repr,
    serde_repr::Deserialize_repr,
)]
#[repr(u8)]
pub enum Base {
    Binary = 2,
    Octal = 8,
    #[default]
    Decimal = 10,
    Hexadecimal = 16,
}

/// Character encoding of strings and of 8-bit integers used as characters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    None,
    Utf8,
    Ascii,
}

/// Well known meaning of an integer field.
///
/// Packet headers, packet contexts and event headers are interpreted by field
/// name. A declaration may also carry its role explicitly, which takes
/// precedence over the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegerRole {
    Magic,
    StreamId,
    EventId,
    Timestamp,
    TimestampBegin,
    TimestampEnd,
    ContentSize,
    PacketSize,
    EventsDiscarded,
    CpuId,
    PacketSeqNum,
}

impl IntegerRole {
    /// The conventional field name for this role.
    pub fn field_name(self) -> &'static str {
        match self {
            Self::Magic => "magic",
            Self::StreamId => "stream_id",
            Self::EventId => "id",
            Self::Timestamp => "timestamp",
            Self::TimestampBegin => "timestamp_begin",
            Self::TimestampEnd => "timestamp_end",
            Self::ContentSize => "content_size",
            Self::PacketSize => "packet_size",
            Self::EventsDiscarded => "events_discarded",
            Self::CpuId => "cpu_id",
            Self::PacketSeqNum => "packet_seq_num",
        }
    }
}

/// An integer of 1 to 64 bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntegerDeclaration {
    /// Width in bits.
    pub length: u32,
    #[serde(default)]
    pub signed: bool,
    #[serde(default)]
    pub base: Base,
    /// `None` means the byte order of the trace.
    #[serde(default)]
    pub byte_order: Option<ByteOrder>,
    /// Alignment in bits. Defaults to 8 for byte sized integers, 1 otherwise.
    #[serde(default)]
    pub alignment: Option<u32>,
    #[serde(default)]
    pub encoding: Encoding,
    /// Name of the clock this integer is a (possibly truncated) value of.
    #[serde(default)]
    pub clock: Option<CompactString>,
    #[serde(default)]
    pub role: Option<IntegerRole>,
}

impl IntegerDeclaration {
    pub fn new(length: u32, signed: bool, byte_order: Option<ByteOrder>) -> Self {
        Self {
            length,
            signed,
            base: Base::Decimal,
            byte_order,
            alignment: None,
            encoding: Encoding::None,
            clock: None,
            role: None,
        }
    }

    /// Unsigned integer in the trace's byte order.
    pub fn unsigned(length: u32) -> Self {
        Self::new(length, false, None)
    }

    #[must_use]
    pub fn with_alignment(mut self, alignment: u32) -> Self {
        self.alignment = Some(alignment);
        self
    }

    #[must_use]
    pub fn with_base(mut self, base: Base) -> Self {
        self.base = base;
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: IntegerRole) -> Self {
        self.role = Some(role);
        self
    }

    #[must_use]
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: impl Into<CompactString>) -> Self {
        self.clock = Some(clock.into());
        self
    }

    /// Alignment in bits.
    pub fn alignment(&self) -> u64 {
        match self.alignment {
            Some(alignment) => u64::from(alignment.max(1)),
            None if self.length % 8 == 0 => 8,
            None => 1,
        }
    }

    /// True for 8-bit integers that hold characters.
    pub fn is_character(&self) -> bool {
        self.length == 8 && self.encoding != Encoding::None
    }
}

/// An IEEE-754 style floating point number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FloatDeclaration {
    /// Exponent width in bits.
    pub exponent: u32,
    /// Mantissa width in bits, not counting the implicit leading one.
    pub mantissa: u32,
    #[serde(default)]
    pub byte_order: Option<ByteOrder>,
    #[serde(default)]
    pub alignment: Option<u32>,
}

impl FloatDeclaration {
    /// `binary32`.
    pub fn single() -> Self {
        Self {
            exponent: 8,
            mantissa: 23,
            byte_order: None,
            alignment: None,
        }
    }

    /// `binary64`.
    pub fn double() -> Self {
        Self {
            exponent: 11,
            mantissa: 52,
            byte_order: None,
            alignment: None,
        }
    }

    pub fn length(&self) -> u32 {
        1 + self.exponent + self.mantissa
    }

    pub fn alignment(&self) -> u64 {
        match self.alignment {
            Some(alignment) => u64::from(alignment.max(1)),
            None if self.length() % 8 == 0 => 8,
            None => 1,
        }
    }
}

/// A NUL terminated string.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StringDeclaration {
    #[serde(default)]
    pub encoding: Encoding,
}

/// A named member of a structure or an option of a variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructField {
    pub name: CompactString,
    #[serde(flatten)]
    pub declaration: Declaration,
}

/// An ordered list of named fields. Field order is wire order.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructDeclaration {
    pub fields: Vec<StructField>,
    /// Minimum alignment in bits, on top of the alignment of the fields.
    #[serde(default)]
    pub min_alignment: Option<u32>,
}

impl StructDeclaration {
    pub fn new<N: Into<CompactString>>(fields: impl IntoIterator<Item = (N, Declaration)>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(name, declaration)| StructField {
                    name: name.into(),
                    declaration,
                })
                .collect(),
            min_alignment: None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Declaration> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.declaration)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// The largest alignment of the struct and its fields.
    pub fn alignment(&self) -> u64 {
        self.fields
            .iter()
            .map(|f| f.declaration.alignment())
            .fold(u64::from(self.min_alignment.unwrap_or(1).max(1)), u64::max)
    }
}

/// A fixed length array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrayDeclaration {
    pub element: Box<Declaration>,
    pub length: usize,
}

/// An array whose length is the value of a previously decoded integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceDeclaration {
    pub element: Box<Declaration>,
    /// Name or path of the length field, resolved through the lexical scope.
    pub length_field: CompactString,
}

/// One `label = low ... high` range of an enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumMapping {
    pub label: CompactString,
    pub low: i64,
    pub high: i64,
}

/// An integer with named ranges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumDeclaration {
    pub container: IntegerDeclaration,
    pub mappings: Vec<EnumMapping>,
}

impl EnumDeclaration {
    /// The label of the first range containing `value`.
    pub fn label_for(&self, value: i128) -> Option<&CompactString> {
        self.mappings
            .iter()
            .find(|m| i128::from(m.low) <= value && value <= i128::from(m.high))
            .map(|m| &m.label)
    }
}

/// A tagged union. The active option is the one named like the label of the
/// enumeration found at `tag`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantDeclaration {
    pub tag: CompactString,
    pub options: Vec<StructField>,
}

impl VariantDeclaration {
    pub fn option(&self, name: &str) -> Option<&Declaration> {
        self.options
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.declaration)
    }
}

/// Any CTF type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Declaration {
    Integer(IntegerDeclaration),
    Float(FloatDeclaration),
    String(StringDeclaration),
    Struct(StructDeclaration),
    Array(ArrayDeclaration),
    Sequence(SequenceDeclaration),
    Enum(EnumDeclaration),
    Variant(VariantDeclaration),
}

impl Declaration {
    /// Alignment in bits applied before decoding a value of this type.
    pub fn alignment(&self) -> u64 {
        match self {
            Self::Integer(i) => i.alignment(),
            Self::Float(f) => f.alignment(),
            Self::String(_) => 8,
            Self::Struct(s) => s.alignment(),
            Self::Array(a) => a.element.alignment(),
            Self::Sequence(s) => s.element.alignment(),
            Self::Enum(e) => e.container.alignment(),
            Self::Variant(_) => 1,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Struct(_) => "struct",
            Self::Array(_) => "array",
            Self::Sequence(_) => "sequence",
            Self::Enum(_) => "enum",
            Self::Variant(_) => "variant",
        }
    }
}

impl From<IntegerDeclaration> for Declaration {
    fn from(value: IntegerDeclaration) -> Self {
        Self::Integer(value)
    }
}

impl From<StructDeclaration> for Declaration {
    fn from(value: StructDeclaration) -> Self {
        Self::Struct(value)
    }
}
