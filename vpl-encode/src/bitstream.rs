use std::io::Write;

use crate::surface::AllocationError;

#[derive(Debug, thiserror::Error)]
#[error("Bitstream overflow: {requested} bytes requested, {available} available")]
pub struct BitstreamOverflow {
    pub requested: usize,
    pub available: usize,
}

/// Fixed capacity output buffer of the encoder.
///
/// The valid payload is `data[offset..offset + length]`. The buffer is never
/// resized, the device reports a too small buffer instead of truncating.
pub struct Bitstream {
    data: Vec<u8>,
    offset: usize,
    length: usize,
}

impl Bitstream {
    pub fn with_capacity(capacity: usize) -> Result<Self, AllocationError> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| AllocationError::OutOfMemory(capacity))?;
        data.resize(capacity, 0);

        Ok(Self {
            data,
            offset: 0,
            length: 0,
        })
    }

    pub fn max_length(&self) -> usize {
        self.data.len()
    }

    pub fn data_offset(&self) -> usize {
        self.offset
    }

    pub fn data_length(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.length]
    }

    /// Bytes left behind the current payload.
    pub fn remaining(&self) -> usize {
        self.data.len() - (self.offset + self.length)
    }

    /// Append encoded bytes behind the current payload.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BitstreamOverflow> {
        if bytes.len() > self.remaining() {
            return Err(BitstreamOverflow {
                requested: bytes.len(),
                available: self.remaining(),
            });
        }

        let start = self.offset + self.length;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.length += bytes.len();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.offset = 0;
        self.length = 0;
    }

    /// Write the payload to `sink` and clear the buffer.
    pub fn write_to<W: Write + ?Sized>(&mut self, sink: &mut W) -> std::io::Result<usize> {
        let len = self.length;
        sink.write_all(self.payload())?;
        self.clear();
        Ok(len)
    }
}

impl std::fmt::Debug for Bitstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitstream")
            .field("max_length", &self.max_length())
            .field("offset", &self.offset)
            .field("length", &self.length)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_resets_to_start() {
        let mut bs = Bitstream::with_capacity(16).unwrap();
        bs.append(&[1, 2, 3]).unwrap();
        bs.append(&[4, 5]).unwrap();
        assert_eq!(bs.payload(), &[1, 2, 3, 4, 5]);

        let mut sink = Vec::new();
        assert_eq!(bs.write_to(&mut sink).unwrap(), 5);
        assert_eq!(sink, vec![1, 2, 3, 4, 5]);
        assert_eq!(bs.data_length(), 0);
        assert_eq!(bs.data_offset(), 0);
        assert!(bs.is_empty());

        bs.append(&[9]).unwrap();
        assert_eq!(bs.data_offset(), 0);
        assert_eq!(bs.payload(), &[9]);
        assert_eq!(bs.remaining(), 15);
    }

    #[test]
    fn overflow_is_reported() {
        let mut bs = Bitstream::with_capacity(4).unwrap();
        bs.append(&[0; 3]).unwrap();
        let err = bs.append(&[0; 2]).unwrap_err();
        assert_eq!((err.requested, err.available), (2, 1));
        // Nothing was written on overflow.
        assert_eq!(bs.data_length(), 3);
    }

    #[test]
    fn clear_discards_payload() {
        let mut bs = Bitstream::with_capacity(8).unwrap();
        bs.append(&[7; 8]).unwrap();
        bs.clear();
        let mut sink = Vec::new();
        assert_eq!(bs.write_to(&mut sink).unwrap(), 0);
        assert!(sink.is_empty());
    }
}
