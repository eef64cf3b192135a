//! Low level binary input.

pub mod bit_reader;
#[cfg(test)]
pub(crate) mod bit_writer;

pub use bit_reader::BitReader;
pub use bit_reader::ByteOrder;
