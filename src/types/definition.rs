//! Definitions: decoded values.

use super::declaration::Base;
use super::declaration::IntegerDeclaration;
use super::declaration::IntegerRole;
use bstr::BString;
use bstr::ByteSlice;
use compact_str::CompactString;
use serde::ser::SerializeMap;
use serde::ser::SerializeSeq;
use smallvec::SmallVec;
use std::fmt;

/// A decoded integer, stored as raw two's complement bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegerDefinition {
    pub declaration: IntegerDeclaration,
    pub value: u64,
}

impl IntegerDefinition {
    pub fn new(declaration: IntegerDeclaration, value: u64) -> Self {
        Self { declaration, value }
    }

    /// Value as a signed number (meaningful for signed declarations).
    pub fn as_i64(&self) -> i64 {
        self.value as i64
    }

    pub fn as_u64(&self) -> u64 {
        self.value
    }

    /// Value honouring the declared signedness.
    pub fn as_i128(&self) -> i128 {
        if self.declaration.signed {
            i128::from(self.as_i64())
        } else {
            i128::from(self.value)
        }
    }

    /// Bits of the value, masked to the declared width.
    fn masked(&self) -> u64 {
        match self.declaration.length {
            64.. => self.value,
            length => self.value & ((1 << length) - 1),
        }
    }
}

impl fmt::Display for IntegerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.declaration.base {
            Base::Binary => write!(f, "0b{:b}", self.masked()),
            Base::Octal => write!(f, "0o{:o}", self.masked()),
            Base::Hexadecimal => write!(f, "0x{:x}", self.masked()),
            Base::Decimal => write!(f, "{}", self.as_i128()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FloatDefinition {
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringDefinition {
    pub value: BString,
}

impl StringDefinition {
    pub fn to_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        self.value.to_str_lossy()
    }
}

/// Decoded structure: fields in wire order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StructDefinition {
    pub fields: Vec<(CompactString, Definition)>,
}

impl StructDefinition {
    pub fn field(&self, name: &str) -> Option<&Definition> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d)
    }

    /// Look up a dotted path such as `header.magic` below this struct.
    pub fn lookup(&self, path: &str) -> Option<&Definition> {
        lookup_in_fields(&self.fields, path)
    }

    /// Integer value of the field at `path`, including enumerations.
    pub fn lookup_integer(&self, path: &str) -> Option<&IntegerDefinition> {
        self.lookup(path).and_then(Definition::as_integer)
    }

    /// Find the integer with the given role: first a field declaring the role
    /// explicitly, then a field with the conventional name.
    pub fn integer_by_role(&self, role: IntegerRole) -> Option<&IntegerDefinition> {
        self.fields
            .iter()
            .filter_map(|(_, d)| d.as_integer())
            .find(|i| i.declaration.role == Some(role))
            .or_else(|| {
                self.field(role.field_name())
                    .and_then(Definition::as_integer)
            })
    }
}

/// Array or sequence elements.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ArrayDefinition {
    pub elements: Vec<Definition>,
}

impl ArrayDefinition {
    /// If this is an array of character integers, the text it holds (up to
    /// the first NUL).
    pub fn as_text(&self) -> Option<BString> {
        let mut bytes = Vec::with_capacity(self.elements.len());
        for element in &self.elements {
            match element {
                Definition::Integer(i) if i.declaration.is_character() => {
                    bytes.push(i.value as u8);
                }
                _ => return None,
            }
        }
        if bytes.is_empty() {
            return None;
        }
        let end = memchr::memchr(0, &bytes).unwrap_or(bytes.len());
        bytes.truncate(end);
        Some(BString::from(bytes))
    }
}

/// An enumeration value. An unknown value has an empty label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDefinition {
    pub value: IntegerDefinition,
    pub label: CompactString,
}

/// The selected option of a variant.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantDefinition {
    /// Name of the selected option.
    pub selection: CompactString,
    pub value: Box<Definition>,
}

/// Any decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    Integer(IntegerDefinition),
    Float(FloatDefinition),
    String(StringDefinition),
    Struct(StructDefinition),
    Array(ArrayDefinition),
    Enum(EnumDefinition),
    Variant(VariantDefinition),
}

impl Definition {
    /// The integer behind an integer or enumeration.
    pub fn as_integer(&self) -> Option<&IntegerDefinition> {
        match self {
            Self::Integer(i) => Some(i),
            Self::Enum(e) => Some(&e.value),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructDefinition> {
        match self {
            Self::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(f.value),
            _ => None,
        }
    }

    /// Text of a string or character array.
    pub fn as_text(&self) -> Option<BString> {
        match self {
            Self::String(s) => Some(s.value.clone()),
            Self::Array(a) => a.as_text(),
            _ => None,
        }
    }

    /// Descend one path component.
    fn child(&self, name: &str) -> Option<&Self> {
        match self {
            Self::Struct(s) => s.field(name),
            Self::Variant(v) if v.selection == name => Some(&v.value),
            Self::Variant(v) => v.value.child(name),
            _ => None,
        }
    }
}

/// Resolve a dotted path against a list of fields.
pub(crate) fn lookup_in_fields<'a>(
    fields: &'a [(CompactString, Definition)],
    path: &str,
) -> Option<&'a Definition> {
    let parts: SmallVec<[&str; 4]> = path.split('.').collect();
    let (first, rest) = parts.split_first()?;
    let mut current = fields
        .iter()
        .rev()
        .find(|(n, _)| n == first)
        .map(|(_, d)| d)?;
    for part in rest {
        current = current.child(part)?;
    }
    Some(current)
}

impl fmt::Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{}", v.value),
            Self::String(s) => write!(f, "{:?}", s.to_str_lossy()),
            Self::Struct(s) => {
                f.write_str("{")?;
                for (idx, (name, value)) in s.fields.iter().enumerate() {
                    let sep = if idx == 0 { " " } else { ", " };
                    write!(f, "{sep}{name} = {value}")?;
                }
                if s.fields.is_empty() {
                    f.write_str("}")
                } else {
                    f.write_str(" }")
                }
            }
            Self::Array(a) => {
                if let Some(text) = a.as_text() {
                    return write!(f, "{:?}", text.to_str_lossy());
                }
                f.write_str("[")?;
                for (idx, value) in a.elements.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
            Self::Enum(e) if e.label.is_empty() => write!(f, "{}", e.value),
            Self::Enum(e) => write!(f, "{} ({})", e.label, e.value),
            Self::Variant(v) => write!(f, "{}", v.value),
        }
    }
}

impl serde::Serialize for Definition {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Integer(i) if i.declaration.signed => serializer.serialize_i64(i.as_i64()),
            Self::Integer(i) => serializer.serialize_u64(i.value),
            Self::Float(v) => serializer.serialize_f64(v.value),
            Self::String(s) => serializer.serialize_str(&s.to_str_lossy()),
            Self::Struct(s) => s.serialize(serializer),
            Self::Array(a) => {
                if let Some(text) = a.as_text() {
                    return serializer.serialize_str(&text.to_str_lossy());
                }
                let mut seq = serializer.serialize_seq(Some(a.elements.len()))?;
                for element in &a.elements {
                    seq.serialize_element(element)?;
                }
                seq.end()
            }
            Self::Enum(e) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("label", e.label.as_str())?;
                map.serialize_entry("value", &Self::Integer(e.value.clone()))?;
                map.end()
            }
            Self::Variant(v) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(v.selection.as_str(), v.value.as_ref())?;
                map.end()
            }
        }
    }
}

impl serde::Serialize for StructDefinition {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name.as_str(), value)?;
        }
        map.end()
    }
}
