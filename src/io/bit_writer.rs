//! Bit-at-a-time encoder used to build test buffers independently of the
//! reader's byte oriented implementation.

use super::ByteOrder;

pub(crate) struct BitWriter {
    data: Vec<u8>,
    position: u64,
    order: ByteOrder,
}

impl BitWriter {
    pub(crate) fn new(order: ByteOrder) -> Self {
        Self {
            data: Vec::new(),
            position: 0,
            order,
        }
    }

    pub(crate) fn set_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    pub(crate) fn skip(&mut self, bits: u64) {
        for _ in 0..bits {
            self.put_bit(false);
        }
    }

    pub(crate) fn align(&mut self, alignment: u64) {
        while self.position % alignment != 0 {
            self.put_bit(false);
        }
    }

    pub(crate) fn write(&mut self, width: u32, value: u64) {
        for k in 0..width {
            let bit = match self.order {
                ByteOrder::LittleEndian => (value >> k) & 1,
                ByteOrder::BigEndian => (value >> (width - 1 - k)) & 1,
            };
            self.put_bit(bit == 1);
        }
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) {
        self.align(8);
        self.data.extend_from_slice(bytes);
        self.position += bytes.len() as u64 * 8;
    }

    fn put_bit(&mut self, bit: bool) {
        let byte = (self.position / 8) as usize;
        if byte == self.data.len() {
            self.data.push(0);
        }
        if bit {
            let shift = match self.order {
                ByteOrder::LittleEndian => self.position % 8,
                ByteOrder::BigEndian => 7 - self.position % 8,
            };
            self.data[byte] |= 1 << shift;
        }
        self.position += 1;
    }

    pub(crate) fn position(&self) -> u64 {
        self.position
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.data
    }
}
