//! Decoding declarations into definitions.

use super::declaration::Declaration;
use super::declaration::EnumDeclaration;
use super::declaration::IntegerDeclaration;
use super::declaration::StructDeclaration;
use super::declaration::VariantDeclaration;
use super::definition::ArrayDefinition;
use super::definition::Definition;
use super::definition::EnumDefinition;
use super::definition::FloatDefinition;
use super::definition::IntegerDefinition;
use super::definition::StringDefinition;
use super::definition::StructDefinition;
use super::definition::VariantDefinition;
use super::scope::LexicalScope;
use super::scope::Scope;
use crate::error::CtfError;
use crate::error::Result;
use crate::io::BitReader;
use bstr::BString;
use compact_str::CompactString;

/// Decode one value of type `declaration` at the reader's position.
pub fn decode(
    declaration: &Declaration,
    reader: &mut BitReader<'_>,
    scope: &Scope<'_>,
) -> Result<Definition> {
    Ok(match declaration {
        Declaration::Integer(decl) => Definition::Integer(decode_integer(decl, reader)?),
        Declaration::Float(decl) => {
            reader.align(decl.alignment());
            let order = decl.byte_order.unwrap_or(reader.byte_order());
            Definition::Float(FloatDefinition {
                value: reader.read_float(decl.exponent, decl.mantissa, order)?,
            })
        }
        Declaration::String(_) => Definition::String(StringDefinition {
            value: BString::from(reader.read_cstring()?),
        }),
        Declaration::Struct(decl) => Definition::Struct(decode_struct(decl, reader, scope, None)?),
        Declaration::Array(decl) => Definition::Array(decode_elements(
            &decl.element,
            decl.length,
            reader,
            scope,
        )?),
        Declaration::Sequence(decl) => {
            let length = scope
                .lookup(&decl.length_field)
                .and_then(Definition::as_integer)
                .ok_or_else(|| CtfError::UnresolvedLookup(decl.length_field.clone()))?;
            let length = usize::try_from(length.as_i128()).map_err(|_| {
                CtfError::InvalidDeclaration(format!(
                    "Sequence length {} from \"{}\" is not a valid length",
                    length.as_i128(),
                    decl.length_field
                ))
            })?;
            Definition::Array(decode_elements(&decl.element, length, reader, scope)?)
        }
        Declaration::Enum(decl) => Definition::Enum(decode_enum(decl, reader)?),
        Declaration::Variant(decl) => Definition::Variant(decode_variant(decl, reader, scope)?),
    })
}

fn decode_integer(
    decl: &IntegerDeclaration,
    reader: &mut BitReader<'_>,
) -> Result<IntegerDefinition> {
    reader.align(decl.alignment());
    let order = decl.byte_order.unwrap_or(reader.byte_order());
    let value = reader.read_int(decl.length, decl.signed, order)?;
    Ok(IntegerDefinition::new(decl.clone(), value))
}

fn decode_enum(decl: &EnumDeclaration, reader: &mut BitReader<'_>) -> Result<EnumDefinition> {
    let value = decode_integer(&decl.container, reader)?;
    let label = decl
        .label_for(value.as_i128())
        .cloned()
        .unwrap_or_default();
    Ok(EnumDefinition { value, label })
}

/// Decode a structure. `label` names the dynamic scope the structure forms,
/// if any, so that its fields can be found by absolute path.
pub fn decode_struct(
    decl: &StructDeclaration,
    reader: &mut BitReader<'_>,
    scope: &Scope<'_>,
    label: Option<LexicalScope>,
) -> Result<StructDefinition> {
    reader.align(decl.alignment());
    let mut fields: Vec<(CompactString, Definition)> = Vec::with_capacity(decl.fields.len());
    for field in &decl.fields {
        let definition = {
            let inner = scope.child(label, &fields);
            decode(&field.declaration, reader, &inner)?
        };
        fields.push((field.name.clone(), definition));
    }
    Ok(StructDefinition { fields })
}

fn decode_elements(
    element: &Declaration,
    length: usize,
    reader: &mut BitReader<'_>,
    scope: &Scope<'_>,
) -> Result<ArrayDefinition> {
    reader.align(element.alignment());
    // Do not trust the length for the allocation, it may come from corrupt data.
    let mut elements = Vec::with_capacity(length.min(reader.remaining() as usize));
    for _ in 0..length {
        let start = reader.position();
        elements.push(decode(element, reader, scope)?);
        // Zero sized elements never run out of data.
        if reader.position() == start && length as u64 > reader.capacity() {
            return Err(CtfError::InvalidDeclaration(format!(
                "{length} zero sized {} elements do not fit in {} bits",
                element.kind(),
                reader.capacity()
            )));
        }
    }
    Ok(ArrayDefinition { elements })
}

fn decode_variant(
    decl: &VariantDeclaration,
    reader: &mut BitReader<'_>,
    scope: &Scope<'_>,
) -> Result<VariantDefinition> {
    let tag = scope
        .lookup(&decl.tag)
        .ok_or_else(|| CtfError::UnresolvedLookup(decl.tag.clone()))?;
    let Definition::Enum(tag) = tag else {
        return Err(CtfError::InvalidDeclaration(format!(
            "Variant tag \"{}\" is not an enumeration",
            decl.tag
        )));
    };
    let option = decl.option(&tag.label).ok_or_else(|| {
        CtfError::UnresolvedLookup(compact_str::format_compact!("{}.{}", decl.tag, tag.label))
    })?;
    Ok(VariantDefinition {
        selection: tag.label.clone(),
        value: Box::new(decode(option, reader, scope)?),
    })
}
