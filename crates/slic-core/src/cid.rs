//! Caller-ID transmit queue.
//!
//! The queue is a logical double buffer of two half-buffers. One half is
//! being read into the hardware FSK buffers while the application refills
//! the other through `continue_cid`.

use crate::error::VpError;
use crate::registers::{FSK_BUFFER_BYTES, FSK_BUFFER_WORDS, FSK_EOM_BIT};

/// Capacity of one half-buffer in bytes.
pub const CID_HALF_BYTES: usize = 16;
/// Capacity of the whole logical buffer in bytes.
pub const CID_BUFFER_BYTES: usize = 2 * CID_HALF_BYTES;

/// Two-half caller-ID message queue with a running checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidBuffer {
    halves: [Vec<u8>; 2],
    reading: usize,
    sum: u8,
    drains: u8,
    sealed: bool,
}

impl CidBuffer {
    /// Loads the first part of a message, filling the halves in order.
    ///
    /// # Errors
    ///
    /// Returns [`VpError::InvalidArgument`] for an empty message or one
    /// longer than [`CID_BUFFER_BYTES`].
    pub fn new(message: &[u8]) -> Result<Self, VpError> {
        if message.is_empty() || message.len() > CID_BUFFER_BYTES {
            return Err(VpError::InvalidArgument);
        }
        let split = message.len().min(CID_HALF_BYTES);
        Ok(Self {
            halves: [message[..split].to_vec(), message[split..].to_vec()],
            reading: 0,
            sum: 0,
            drains: 0,
            sealed: false,
        })
    }

    /// Free bytes in the half that is not being read.
    #[must_use]
    pub fn free_space(&self) -> usize {
        if self.sealed {
            return 0;
        }
        CID_HALF_BYTES - self.halves[1 - self.reading].len()
    }

    /// Appends message bytes to the half that is not being read.
    ///
    /// # Errors
    ///
    /// Returns [`VpError::InvalidArgument`] when `bytes` is empty, exceeds
    /// [`Self::free_space`], or the checksum has already been sent.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), VpError> {
        if bytes.is_empty() || bytes.len() > self.free_space() {
            return Err(VpError::InvalidArgument);
        }
        self.halves[1 - self.reading].extend_from_slice(bytes);
        Ok(())
    }

    /// True when no message bytes remain queued.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.halves.iter().all(Vec::is_empty)
    }

    /// True once the checksum has been taken.
    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Next bytes to transmit, at most `max`, without consuming them. A chunk
    /// never spans both halves.
    #[must_use]
    pub fn peek(&self, max: usize) -> &[u8] {
        let half = self.read_half();
        let take = self.halves[half].len().min(max);
        &self.halves[half][..take]
    }

    /// Consumes `count` bytes previously returned by [`Self::peek`] and adds
    /// them to the checksum. Draining a half switches reading to the other
    /// half and records one drain.
    pub fn consume(&mut self, count: usize) {
        self.reading = self.read_half();
        let half = &mut self.halves[self.reading];
        let count = count.min(half.len());
        self.sum = half
            .drain(..count)
            .fold(self.sum, |sum, byte| sum.wrapping_add(byte));
        if count > 0 && half.is_empty() {
            self.drains = self.drains.saturating_add(1);
            self.reading = 1 - self.reading;
        }
    }

    /// Two's complement of the sum of every consumed byte.
    #[must_use]
    pub const fn checksum(&self) -> u8 {
        self.sum.wrapping_neg()
    }

    /// Marks the message complete. Further [`Self::extend`] calls fail.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Returns and clears the number of half-buffer drains since last call.
    pub fn take_drains(&mut self) -> u8 {
        std::mem::take(&mut self.drains)
    }

    fn read_half(&self) -> usize {
        if self.halves[self.reading].is_empty() && !self.halves[1 - self.reading].is_empty() {
            1 - self.reading
        } else {
            self.reading
        }
    }
}

/// Packs up to four bytes into one hardware FSK buffer:
/// `[count | EOM, bytes 0-1, bytes 2-3]`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn fsk_buffer_words(bytes: &[u8], end_of_message: bool) -> [u16; FSK_BUFFER_WORDS] {
    let count = bytes.len().min(FSK_BUFFER_BYTES);
    let mut packed = [0u8; FSK_BUFFER_BYTES];
    packed[..count].copy_from_slice(&bytes[..count]);
    let mut header = count as u16;
    if end_of_message {
        header |= FSK_EOM_BIT;
    }
    [
        header,
        u16::from_be_bytes([packed[0], packed[1]]),
        u16::from_be_bytes([packed[2], packed[3]]),
    ]
}

/// Unpacks one hardware FSK buffer into its bytes and end-of-message flag.
#[must_use]
pub fn fsk_buffer_bytes(words: &[u16]) -> (Vec<u8>, bool) {
    let Some((&header, data)) = words.split_first() else {
        return (Vec::new(), false);
    };
    let count = usize::from(header & !FSK_EOM_BIT).min(FSK_BUFFER_BYTES);
    let bytes: Vec<u8> = data.iter().flat_map(|w| w.to_be_bytes()).take(count).collect();
    (bytes, header & FSK_EOM_BIT != 0)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{fsk_buffer_bytes, fsk_buffer_words, CidBuffer, CID_BUFFER_BYTES, CID_HALF_BYTES};
    use crate::error::VpError;

    fn drain_all(buffer: &mut CidBuffer) -> Vec<u8> {
        let mut out = Vec::new();
        while !buffer.is_exhausted() {
            let chunk = buffer.peek(4).to_vec();
            buffer.consume(chunk.len());
            out.extend(chunk);
        }
        out
    }

    #[test]
    fn message_size_is_bounded() {
        assert_eq!(CidBuffer::new(&[]), Err(VpError::InvalidArgument));
        assert_eq!(
            CidBuffer::new(&[0; CID_BUFFER_BYTES + 1]),
            Err(VpError::InvalidArgument)
        );
        assert!(CidBuffer::new(&[0; CID_BUFFER_BYTES]).is_ok());
    }

    #[test]
    fn chunks_do_not_span_halves() {
        let mut buffer = CidBuffer::new(&[1; 18]).expect("fits");
        for _ in 0..4 {
            let len = buffer.peek(4).len();
            assert_eq!(len, 4);
            buffer.consume(len);
        }
        assert_eq!(buffer.take_drains(), 1);
        assert_eq!(buffer.peek(4), &[1, 1]);
    }

    #[test]
    fn refill_lands_in_the_unused_half() {
        let mut buffer = CidBuffer::new(&[7; 20]).expect("fits");
        assert_eq!(buffer.free_space(), CID_HALF_BYTES - 4);
        assert_eq!(buffer.extend(&[0; 13]), Err(VpError::InvalidArgument));
        buffer.consume(4);
        buffer.consume(4);
        buffer.consume(4);
        buffer.consume(4);
        assert_eq!(buffer.free_space(), CID_HALF_BYTES);
        buffer.extend(&[9; 3]).expect("fits");
        let tail = drain_all(&mut buffer);
        assert_eq!(tail, vec![7, 7, 7, 7, 9, 9, 9]);
    }

    #[test]
    fn sealed_buffer_refuses_more_data() {
        let mut buffer = CidBuffer::new(b"0123").expect("fits");
        drain_all(&mut buffer);
        buffer.seal();
        assert_eq!(buffer.extend(b"4"), Err(VpError::InvalidArgument));
    }

    #[test]
    fn fsk_words_pack_big_endian_with_eom() {
        let words = fsk_buffer_words(&[0x12, 0x34, 0x56], true);
        assert_eq!(words, [0x8003, 0x1234, 0x5600]);
        assert_eq!(fsk_buffer_bytes(&words), (vec![0x12, 0x34, 0x56], true));
    }

    proptest! {
        #[test]
        fn checksum_negates_the_byte_sum(message in prop::collection::vec(any::<u8>(), 1..=CID_BUFFER_BYTES)) {
            let mut buffer = CidBuffer::new(&message).expect("fits");
            let sent = drain_all(&mut buffer);
            prop_assert_eq!(&sent, &message);
            let sum = sent.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
            prop_assert_eq!(sum.wrapping_add(buffer.checksum()), 0);
        }
    }
}
