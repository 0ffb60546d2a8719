/// A packet byte buffer, either borrowed for reading or for writing.
#[derive(Debug)]
pub enum Buffer<'a> {
    Immutable(&'a [u8]),
    Mutable(&'a mut [u8]),
}

impl Buffer<'_> {
    /// The whole buffer as an immutable slice of bytes.
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Buffer::Immutable(packet) => packet,
            Buffer::Mutable(packet) => packet,
        }
    }

    /// The whole buffer as a mutable slice of bytes.
    ///
    /// Panics for an immutable buffer.
    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        match self {
            Buffer::Immutable(_) => panic!("write operation called on readonly buffer"),
            Buffer::Mutable(packet) => packet,
        }
    }

    /// The bytes from `offset` to the end of the buffer.
    pub fn tail(&self, offset: usize) -> &[u8] {
        let slice = self.as_slice();
        &slice[offset.min(slice.len())..]
    }

    pub fn read(&self, offset: usize) -> u8 {
        self.as_slice()[offset]
    }

    pub fn write(&mut self, offset: usize, val: u8) {
        self.as_slice_mut()[offset] = val;
    }

    /// Read a big-endian `u16` at a given offset.
    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_be_bytes(self.get_bytes(offset))
    }

    /// Write a `u16` in big-endian order at a given offset.
    pub fn write_u16(&mut self, offset: usize, val: u16) {
        self.set_bytes(offset, val.to_be_bytes());
    }

    /// Get N bytes from the packet at a given byte offset.
    pub fn get_bytes<const N: usize>(&self, offset: usize) -> [u8; N] {
        let slice = self.as_slice();
        core::array::from_fn(|i| slice[offset + i])
    }

    /// Set N bytes in the packet at a given offset.
    pub fn set_bytes<const N: usize>(&mut self, offset: usize, bytes: [u8; N]) {
        self.as_slice_mut()[offset..offset + N].copy_from_slice(&bytes);
    }

    /// Copy `vals` into the buffer at `offset`.
    ///
    /// Panics if `vals` does not fit.
    pub fn copy_from(&mut self, offset: usize, vals: &[u8]) {
        self.as_slice_mut()[offset..offset + vals.len()].copy_from_slice(vals);
    }
}
