//! MSB-first bit packing.

/// Appends values of arbitrary bit length to a byte buffer.
pub(crate) struct BitWriter {
    buf: Vec<u8>,
    pos: usize,
}

impl BitWriter {
    pub(crate) fn with_capacity(bytes: usize) -> Self {
        Self {
            buf: Vec::with_capacity(bytes),
            pos: 0,
        }
    }

    /// Appends the lowest `bits` bits of the right-aligned big-endian
    /// `value`.
    ///
    /// `value` must hold at least `bits` bits.
    pub(crate) fn write(&mut self, value: &[u8], bits: usize) {
        let skip = value.len() * 8 - bits;

        if self.pos % 8 == 0 && skip == 0 {
            self.buf.extend_from_slice(value);
            self.pos += bits;
            return;
        }

        for i in 0..bits {
            let src = skip + i;
            if self.pos % 8 == 0 {
                self.buf.push(0);
            }
            if value[src / 8] & (0x80 >> (src % 8)) != 0 {
                self.buf[self.pos / 8] |= 0x80 >> (self.pos % 8);
            }
            self.pos += 1;
        }
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads values of arbitrary bit length from a byte buffer.
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Reads the next `bits` bits, right-aligned into `ceil(bits / 8)`
    /// bytes.
    ///
    /// The caller guarantees that enough data is left.
    pub(crate) fn read(&mut self, bits: usize) -> Vec<u8> {
        let len = bits.div_ceil(8);

        if self.pos % 8 == 0 && bits % 8 == 0 {
            let start = self.pos / 8;
            self.pos += bits;
            return self.data[start..start + len].to_vec();
        }

        let mut out = vec![0u8; len];
        let skip = len * 8 - bits;
        for i in 0..bits {
            let src = self.pos + i;
            if self.data[src / 8] & (0x80 >> (src % 8)) != 0 {
                let dst = skip + i;
                out[dst / 8] |= 0x80 >> (dst % 8);
            }
        }

        self.pos += bits;
        out
    }
}
