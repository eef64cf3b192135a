//! The CTF type system.
//!
//! A [`Declaration`] describes how a value is laid out in the binary stream; a
//! [`Definition`] is one decoded value. Decoding is a single dispatch over the
//! closed set of declaration kinds, see [`decode`].

pub mod declaration;
pub mod decode;
pub mod definition;
pub mod scope;

pub use declaration::ArrayDeclaration;
pub use declaration::Base;
pub use declaration::Declaration;
pub use declaration::Encoding;
pub use declaration::EnumDeclaration;
pub use declaration::EnumMapping;
pub use declaration::FloatDeclaration;
pub use declaration::IntegerDeclaration;
pub use declaration::IntegerRole;
pub use declaration::SequenceDeclaration;
pub use declaration::StringDeclaration;
pub use declaration::StructDeclaration;
pub use declaration::StructField;
pub use declaration::VariantDeclaration;
pub use decode::decode;
pub use decode::decode_struct;
pub use definition::ArrayDefinition;
pub use definition::Definition;
pub use definition::EnumDefinition;
pub use definition::FloatDefinition;
pub use definition::IntegerDefinition;
pub use definition::StringDefinition;
pub use definition::StructDefinition;
pub use definition::VariantDefinition;
pub use scope::LexicalScope;
pub use scope::Scope;
