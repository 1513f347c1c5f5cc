//! Fixed-capacity byte ring buffer
//!
//! Single-writer/single-reader circular store with wraparound reads and
//! writes. Not internally synchronized — every call site must hold one
//! mutex around the whole instance for the duration of the call.

use crate::error::{BridgeError, Result};

/// Circular byte buffer with a capacity fixed at construction.
///
/// The array forms of `put`/`get` transfer as many bytes as fit and report
/// the count; a zero-length transfer is a valid result the caller must
/// check, never an error. The single-byte forms fail instead of returning
/// a partial count, since a metadata length prefix is never half-written.
pub struct RingBuffer {
    buf: Vec<u8>,
    size: usize,
    head: usize,
    tail: usize,
}

impl RingBuffer {
    /// Create a ring buffer holding up to `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            size: 0,
            head: 0,
            tail: 0,
        }
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Remaining free space in bytes.
    pub fn free(&self) -> usize {
        self.buf.len() - self.size
    }

    /// Write bytes at the tail, splitting the copy at the buffer end on
    /// wraparound. Returns the number of bytes actually written,
    /// `min(src.len(), free())`.
    pub fn put(&mut self, src: &[u8]) -> usize {
        let count = src.len().min(self.free());
        if count == 0 {
            return 0;
        }

        // First segment: tail up to the end of the backing array
        let first = count.min(self.buf.len() - self.tail);
        self.buf[self.tail..self.tail + first].copy_from_slice(&src[..first]);
        self.tail += first;

        if self.tail == self.buf.len() {
            self.tail = 0;
            // Remainder wraps to the start of the array
            let rest = count - first;
            if rest > 0 {
                self.buf[..rest].copy_from_slice(&src[first..count]);
                self.tail = rest;
            }
        }

        self.size += count;
        count
    }

    /// Read bytes from the head, splitting the copy at the buffer end on
    /// wraparound. Returns the number of bytes actually read,
    /// `min(dst.len(), len())`.
    pub fn get(&mut self, dst: &mut [u8]) -> usize {
        let count = dst.len().min(self.size);
        if count == 0 {
            return 0;
        }

        let first = count.min(self.buf.len() - self.head);
        dst[..first].copy_from_slice(&self.buf[self.head..self.head + first]);
        self.head += first;

        if self.head == self.buf.len() {
            self.head = 0;
            let rest = count - first;
            if rest > 0 {
                dst[first..count].copy_from_slice(&self.buf[..rest]);
                self.head = rest;
            }
        }

        self.size -= count;
        count
    }

    /// Write a single byte, failing when the buffer is full.
    pub fn put_byte(&mut self, val: u8) -> Result<()> {
        if self.size == self.buf.len() {
            return Err(BridgeError::Stream("ring buffer is full".to_string()));
        }

        self.buf[self.tail] = val;
        self.tail += 1;
        if self.tail == self.buf.len() {
            self.tail = 0;
        }
        self.size += 1;
        Ok(())
    }

    /// Read a single byte, failing when the buffer is empty.
    pub fn get_byte(&mut self) -> Result<u8> {
        if self.size == 0 {
            return Err(BridgeError::Stream("ring buffer is empty".to_string()));
        }

        let val = self.buf[self.head];
        self.head += 1;
        if self.head == self.buf.len() {
            self.head = 0;
        }
        self.size -= 1;
        Ok(val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_buffer_is_empty() {
        let ring = RingBuffer::new(64);
        assert_eq!(ring.capacity(), 64);
        assert_eq!(ring.len(), 0);
        assert!(ring.is_empty());
        assert_eq!(ring.free(), 64);
    }

    #[test]
    fn fifo_order_preserved() {
        let mut ring = RingBuffer::new(16);
        assert_eq!(ring.put(&[1, 2, 3, 4, 5]), 5);

        let mut out = [0u8; 5];
        assert_eq!(ring.get(&mut out), 5);
        assert_eq!(out, [1, 2, 3, 4, 5]);
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn put_clamps_to_free_space() {
        let mut ring = RingBuffer::new(8);
        assert_eq!(ring.put(&[0; 6]), 6);
        // Only 2 bytes of space remain
        assert_eq!(ring.put(&[1, 2, 3, 4]), 2);
        assert_eq!(ring.len(), 8);
        // Full buffer accepts nothing
        assert_eq!(ring.put(&[9]), 0);
    }

    #[test]
    fn get_clamps_to_available_data() {
        let mut ring = RingBuffer::new(8);
        ring.put(&[10, 20, 30]);

        let mut out = [0u8; 8];
        assert_eq!(ring.get(&mut out), 3);
        assert_eq!(&out[..3], &[10, 20, 30]);
        assert_eq!(ring.get(&mut out), 0);
    }

    #[test]
    fn wraparound_write_and_read() {
        let mut ring = RingBuffer::new(8);

        // Advance the cursors near the end of the array
        ring.put(&[0; 6]);
        let mut sink = [0u8; 6];
        ring.get(&mut sink);

        // This write wraps: 2 bytes at the end, 3 at the start
        assert_eq!(ring.put(&[1, 2, 3, 4, 5]), 5);
        assert_eq!(ring.len(), 5);

        // The read spans the wrap boundary too
        let mut out = [0u8; 5];
        assert_eq!(ring.get(&mut out), 5);
        assert_eq!(out, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn repeated_wraparound_cycles() {
        let mut ring = RingBuffer::new(7);
        let mut next = 0u8;
        for _ in 0..20 {
            let data: Vec<u8> = (0..5).map(|i| next.wrapping_add(i)).collect();
            assert_eq!(ring.put(&data), 5);
            let mut out = [0u8; 5];
            assert_eq!(ring.get(&mut out), 5);
            assert_eq!(&out[..], &data[..]);
            next = next.wrapping_add(5);
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn interleaved_put_get_keeps_order() {
        let mut ring = RingBuffer::new(10);
        let mut expected = Vec::new();
        let mut received = Vec::new();
        let mut val = 0u8;

        for round in 0..30 {
            let n = (round % 4) + 1;
            let data: Vec<u8> = (0..n).map(|_| {
                val = val.wrapping_add(1);
                val
            }).collect();
            let written = ring.put(&data);
            expected.extend_from_slice(&data[..written]);

            let mut out = [0u8; 3];
            let read = ring.get(&mut out);
            received.extend_from_slice(&out[..read]);
        }
        let mut out = [0u8; 10];
        let read = ring.get(&mut out);
        received.extend_from_slice(&out[..read]);

        assert_eq!(received, expected);
    }

    #[test]
    fn put_byte_fails_when_full() {
        let mut ring = RingBuffer::new(2);
        ring.put_byte(1).unwrap();
        ring.put_byte(2).unwrap();
        assert!(ring.put_byte(3).is_err());
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn get_byte_fails_when_empty() {
        let mut ring = RingBuffer::new(4);
        assert!(ring.get_byte().is_err());

        ring.put_byte(42).unwrap();
        assert_eq!(ring.get_byte().unwrap(), 42);
        assert!(ring.get_byte().is_err());
    }

    #[test]
    fn byte_variants_wrap_cursors() {
        let mut ring = RingBuffer::new(3);
        for i in 0..9u8 {
            ring.put_byte(i).unwrap();
            assert_eq!(ring.get_byte().unwrap(), i);
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn full_drain_resets_size() {
        let mut ring = RingBuffer::new(16);
        ring.put(&[7; 16]);
        assert_eq!(ring.free(), 0);

        let mut out = [0u8; 16];
        assert_eq!(ring.get(&mut out), 16);
        assert_eq!(ring.len(), 0);
        assert_eq!(ring.free(), 16);
    }

    #[test]
    fn zero_length_transfers_are_valid() {
        let mut ring = RingBuffer::new(4);
        assert_eq!(ring.put(&[]), 0);
        let mut out = [0u8; 0];
        assert_eq!(ring.get(&mut out), 0);
    }
}
