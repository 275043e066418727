//! Bit-level packing of quantized vertex data

/// Growable stream of bit fields packed into 32-bit words.
///
/// Fields are written least significant bit first and may straddle two
/// storage words. The storage always holds whole words, so byte sizes
/// reported for upload are multiples of 4.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitStream {
    storage: Vec<u32>,
    num_bits_used: usize,
}

impl BitStream {
    pub const STORAGE_TYPE_BIT_SIZE: u32 = u32::BITS;

    const GROWTH_FACTOR: f32 = 1.2;

    /// Reserves `bytes` rounded up to a whole number of words
    pub fn with_capacity_bytes(bytes: usize) -> Self {
        Self {
            storage: vec![0; bytes.div_ceil(4)],
            num_bits_used: 0,
        }
    }

    /// Appends the low `bit_count` bits of `value`
    pub fn append(&mut self, bit_count: u32, value: u32) {
        debug_assert!((1..=Self::STORAGE_TYPE_BIT_SIZE).contains(&bit_count));
        let value = value & mask(bit_count);

        let required_words = (self.num_bits_used + bit_count as usize).div_ceil(32);
        if required_words > self.storage.len() {
            self.grow(required_words);
        }

        let word = self.num_bits_used / 32;
        let bit = (self.num_bits_used % 32) as u32;
        self.storage[word] |= value << bit;
        if bit + bit_count > 32 {
            self.storage[word + 1] |= value >> (32 - bit);
        }
        self.num_bits_used += bit_count as usize;
    }

    /// Reads `bit_count` bits starting at `bit_offset`, or `None` past the written range
    pub fn read(&self, bit_offset: usize, bit_count: u32) -> Option<u32> {
        if bit_count == 0
            || bit_count > Self::STORAGE_TYPE_BIT_SIZE
            || bit_offset + bit_count as usize > self.num_bits_used
        {
            return None;
        }

        let word = bit_offset / 32;
        let bit = (bit_offset % 32) as u32;
        let mut value = self.storage[word] >> bit;
        if bit + bit_count > 32 {
            value |= self.storage[word + 1] << (32 - bit);
        }
        Some(value & mask(bit_count))
    }

    pub fn num_bits_used(&self) -> usize {
        self.num_bits_used
    }

    pub fn num_bytes_used(&self) -> usize {
        self.num_bits_used.div_ceil(8)
    }

    /// Bytes of whole storage words touched so far
    pub fn num_storage_bytes_used(&self) -> usize {
        self.num_bits_used.div_ceil(32) * 4
    }

    /// Allocated bytes, used or not
    pub fn storage_size(&self) -> usize {
        self.storage.len() * 4
    }

    /// Used storage words as bytes, ready for upload
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.storage[..self.num_bits_used.div_ceil(32)])
    }

    fn grow(&mut self, required_words: usize) {
        let grown_bytes = (self.storage_size() as f32 * Self::GROWTH_FACTOR) as usize;
        let grown_words = grown_bytes.div_ceil(4);
        self.storage.resize(grown_words.max(required_words), 0);
    }
}

fn mask(bit_count: u32) -> u32 {
    if bit_count >= 32 {
        u32::MAX
    } else {
        (1u32 << bit_count) - 1
    }
}
