//! Metadata-multiplexing stream buffer
//!
//! Wraps a [`RingBuffer`] and, on the write path, periodically injects a
//! length-prefixed ICY metadata frame into the byte stream. The pending
//! metadata slot is updated asynchronously by the upstream reader thread;
//! the embedding step consumes it at the next interval boundary.
//!
//! Architecture:
//!   socket → reader thread → StreamBuffer::write → RingBuffer
//!                                   ↑ set_metadata (out of band)
//!   RingBuffer → StreamBuffer::read → relay copy loop → client

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::config::buffer::METADATA_INTERVAL;
use crate::stream::metadata::encode_metadata;
use crate::stream::ring::RingBuffer;

/// Bounded byte buffer that optionally embeds ICY metadata frames.
///
/// The writer (upstream reader thread) and the reader (relay copy loop)
/// run on different threads; the ring and the pending metadata slot each
/// sit behind their own mutex. When the embedding step holds both, the
/// metadata lock is always acquired before the ring lock — `set_metadata`
/// only ever takes the metadata lock, so the ordering cannot invert.
pub struct StreamBuffer {
    ring: Mutex<RingBuffer>,
    pending: Mutex<Vec<u8>>,
    /// Lock-free readiness check for the hot embedding path
    changed: AtomicBool,
    embed_metadata: bool,
    interval: usize,
    /// Raw bytes remaining until the next metadata boundary.
    /// Only the writer thread mutates this.
    metacount: AtomicUsize,
}

impl StreamBuffer {
    /// Create a buffer with the default embedding interval.
    pub fn new(capacity: usize, embed_metadata: bool) -> Self {
        Self::with_interval(capacity, embed_metadata, METADATA_INTERVAL)
    }

    /// Create a buffer with an explicit embedding interval.
    pub fn with_interval(capacity: usize, embed_metadata: bool, interval: usize) -> Self {
        Self {
            ring: Mutex::new(RingBuffer::new(capacity)),
            pending: Mutex::new(Vec::new()),
            changed: AtomicBool::new(false),
            embed_metadata,
            interval,
            metacount: AtomicUsize::new(interval),
        }
    }

    /// Interval advertised to downstream clients: the embedding interval
    /// when metadata is active, zero otherwise.
    pub fn metadata_interval(&self) -> usize {
        if self.embed_metadata {
            self.interval
        } else {
            0
        }
    }

    /// Free space in the underlying ring.
    pub fn available(&self) -> usize {
        match self.ring.lock() {
            Ok(ring) => ring.free(),
            Err(_) => 0,
        }
    }

    /// Buffered bytes ready to read.
    pub fn len(&self) -> usize {
        match self.ring.lock() {
            Ok(ring) => ring.len(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read buffered bytes. Metadata frames already embedded into the ring
    /// are transparent here — the output is a byte stream identical in
    /// shape to an ICY source stream.
    pub fn read(&self, dst: &mut [u8]) -> usize {
        match self.ring.lock() {
            Ok(mut ring) => ring.get(dst),
            Err(_) => 0,
        }
    }

    /// Write raw stream bytes, returning how many were accepted.
    ///
    /// The count excludes any metadata bytes inserted along the way, so the
    /// caller's byte accounting stays aligned with the source stream's
    /// declared interval. Zero means "try again later".
    pub fn write(&self, data: &[u8]) -> usize {
        if self.embed_metadata {
            self.write_embedded(data)
        } else {
            match self.ring.lock() {
                Ok(mut ring) => ring.put(data),
                Err(_) => 0,
            }
        }
    }

    /// Replace the metadata that will be inserted at the next boundary.
    ///
    /// The text is ASCII-encoded and null-padded to a multiple of 16;
    /// unencodable updates are dropped, preserving the previous metadata.
    pub fn set_metadata(&self, text: &str) {
        let Some(encoded) = encode_metadata(text) else {
            tracing::debug!(len = text.len(), "dropping unencodable metadata update");
            return;
        };

        if let Ok(mut pending) = self.pending.lock() {
            *pending = encoded;
            self.changed.store(true, Ordering::Release);
        }
    }

    fn write_embedded(&self, data: &[u8]) -> usize {
        let metacount = self.metacount.load(Ordering::Relaxed);

        let available = match self.ring.lock() {
            Ok(ring) => ring.free(),
            Err(_) => return 0,
        };

        // Never write more raw bytes than remain until the metadata boundary
        let count = data.len().min(available).min(metacount);

        // Metadata lock first, then the ring. Holding the metadata lock
        // also pins the changed flag: set_metadata flips it under this
        // same lock.
        let pending = match self.pending.lock() {
            Ok(pending) => pending,
            Err(_) => return 0,
        };
        let changed = self.changed.load(Ordering::Acquire);

        // Reaching the boundary commits us to one length byte plus the
        // metadata block; reject the whole write if it cannot all fit,
        // so a frame is never truncated.
        if metacount - count == 0 {
            let pending_len = if changed { pending.len() } else { 0 };
            if count + pending_len + 1 > available {
                return 0;
            }
        }

        let mut ring = match self.ring.lock() {
            Ok(ring) => ring,
            Err(_) => return 0,
        };

        let written = ring.put(&data[..count]);
        debug_assert_eq!(written, count, "ring rejected a pre-checked write");

        let mut metacount = metacount - count;
        if metacount == 0 {
            if !changed {
                // No metadata change this cycle: a single zero length byte
                let _ = ring.put_byte(0);
            } else {
                let _ = ring.put_byte((pending.len() / 16) as u8);
                let written = ring.put(&pending);
                debug_assert_eq!(written, pending.len(), "metadata frame truncated");
                self.changed.store(false, Ordering::Release);
            }
            metacount = self.interval;
        }
        self.metacount.store(metacount, Ordering::Relaxed);

        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(buffer: &StreamBuffer) -> Vec<u8> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 64];
        loop {
            let n = buffer.read(&mut chunk);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        out
    }

    #[test]
    fn raw_mode_passes_bytes_through() {
        let buffer = StreamBuffer::new(64, false);
        assert_eq!(buffer.metadata_interval(), 0);
        assert_eq!(buffer.write(&[1, 2, 3, 4]), 4);
        assert_eq!(drain(&buffer), vec![1, 2, 3, 4]);
    }

    #[test]
    fn raw_mode_clamps_to_capacity() {
        let buffer = StreamBuffer::new(4, false);
        assert_eq!(buffer.write(&[1, 2, 3, 4, 5, 6]), 4);
        assert_eq!(buffer.write(&[7]), 0);
        assert_eq!(buffer.available(), 0);
    }

    #[test]
    fn unchanged_cycle_emits_single_zero_byte() {
        let buffer = StreamBuffer::with_interval(256, true, 16);
        assert_eq!(buffer.metadata_interval(), 16);
        assert_eq!(buffer.write(&[7u8; 16]), 16);

        let out = drain(&buffer);
        assert_eq!(out.len(), 17);
        assert_eq!(&out[..16], &[7u8; 16]);
        assert_eq!(out[16], 0);
    }

    #[test]
    fn changed_metadata_is_framed_at_boundary() {
        let buffer = StreamBuffer::with_interval(256, true, 16);
        buffer.set_metadata("StreamTitle='A';");

        assert_eq!(buffer.write(&[1u8; 16]), 16);
        let out = drain(&buffer);

        // 16 raw + 1 length byte + 32 bytes of padded metadata
        // ("StreamTitle='A';" is exactly 16 bytes, padded up to 32)
        assert_eq!(out.len(), 16 + 1 + 32);
        assert_eq!(out[16], 2);
        assert_eq!(&out[17..33], b"StreamTitle='A';");
        assert_eq!(&out[33..49], &[0u8; 16]);
    }

    #[test]
    fn metadata_sent_once_then_zero_bytes() {
        let buffer = StreamBuffer::with_interval(256, true, 8);
        buffer.set_metadata("Artist - Title");

        assert_eq!(buffer.write(&[1u8; 8]), 8);
        assert_eq!(buffer.write(&[2u8; 8]), 8);

        let out = drain(&buffer);
        // First boundary carries the frame, second only a zero byte
        assert_eq!(out[8], 1);
        assert_eq!(&out[9..23], b"Artist - Title");
        let second_boundary = 8 + 1 + 16 + 8;
        assert_eq!(out[second_boundary], 0);
        assert_eq!(out.len(), second_boundary + 1);
    }

    #[test]
    fn write_never_crosses_the_boundary() {
        let buffer = StreamBuffer::with_interval(256, true, 16);
        // 20 bytes offered, only 16 accepted before the boundary
        assert_eq!(buffer.write(&[5u8; 20]), 16);
        assert_eq!(buffer.write(&[5u8; 4]), 4);
    }

    #[test]
    fn interval_accounting_across_uneven_writes() {
        let interval = 16;
        let buffer = StreamBuffer::with_interval(1024, true, interval);

        let mut remaining = 3 * interval;
        let chunks = [5usize, 11, 3, 13, 7, 2, 6, 1];
        let mut i = 0;
        while remaining > 0 {
            let n = chunks[i % chunks.len()].min(remaining);
            let offered = vec![0xAAu8; n];
            let mut accepted = 0;
            while accepted < n {
                accepted += buffer.write(&offered[accepted..]);
            }
            remaining -= n;
            i += 1;
        }

        // Exactly `interval` raw bytes between consecutive length bytes
        let out = drain(&buffer);
        assert_eq!(out.len(), 3 * (interval + 1));
        for boundary in 0..3 {
            let pos = (boundary + 1) * interval + boundary;
            assert_eq!(out[pos], 0, "length byte expected at {pos}");
        }
        for (pos, &b) in out.iter().enumerate() {
            if (pos + 1) % (interval + 1) != 0 {
                assert_eq!(b, 0xAA, "raw byte expected at {pos}");
            }
        }
    }

    #[test]
    fn boundary_write_rejected_when_frame_cannot_fit() {
        // Capacity 24: 16 raw + 1 + 16 metadata = 33 will not fit
        let buffer = StreamBuffer::with_interval(24, true, 16);
        buffer.set_metadata("Artist - Title");

        assert_eq!(buffer.write(&[1u8; 16]), 0);
        assert_eq!(buffer.len(), 0, "rejected write must not commit anything");

        // A non-boundary prefix still fits
        assert_eq!(buffer.write(&[1u8; 6]), 6);
        // The remaining 10 raw bytes reach the boundary: 10 + 17 > 18 free
        assert_eq!(buffer.write(&[1u8; 10]), 0);

        // Draining the ring makes room for the full frame
        let mut sink = [0u8; 6];
        assert_eq!(buffer.read(&mut sink), 6);
        assert_eq!(buffer.write(&[1u8; 10]), 10);

        let out = drain(&buffer);
        assert_eq!(out.len(), 10 + 1 + 16);
        assert_eq!(out[10], 1);
        assert_eq!(&out[11..25], b"Artist - Title");
    }

    #[test]
    fn unencodable_metadata_is_dropped() {
        let buffer = StreamBuffer::with_interval(256, true, 8);
        buffer.set_metadata("Füße");

        assert_eq!(buffer.write(&[1u8; 8]), 8);
        let out = drain(&buffer);
        // The dropped update leaves the cycle unchanged: zero length byte
        assert_eq!(out.len(), 9);
        assert_eq!(out[8], 0);
    }

    #[test]
    fn latest_metadata_update_wins() {
        let buffer = StreamBuffer::with_interval(256, true, 8);
        buffer.set_metadata("First - Title");
        buffer.set_metadata("Second - Title!!");

        assert_eq!(buffer.write(&[1u8; 8]), 8);
        let out = drain(&buffer);
        assert_eq!(out[8], 2);
        assert_eq!(&out[9..25], b"Second - Title!!");
    }

    #[test]
    fn empty_metadata_occupies_one_unit() {
        let buffer = StreamBuffer::with_interval(256, true, 8);
        buffer.set_metadata("");

        assert_eq!(buffer.write(&[1u8; 8]), 8);
        let out = drain(&buffer);
        assert_eq!(out[8], 1);
        assert_eq!(&out[9..25], &[0u8; 16]);
    }

    #[test]
    fn default_interval_is_8192() {
        let buffer = StreamBuffer::new(256 * 1024, true);
        assert_eq!(buffer.metadata_interval(), 8192);

        let mut written = 0;
        while written < 8192 {
            written += buffer.write(&[3u8; 4096]);
        }

        let mut out = vec![0u8; 8193];
        let mut read = 0;
        while read < out.len() {
            read += buffer.read(&mut out[read..]);
        }
        assert_eq!(out[8192], 0);
        assert!(out[..8192].iter().all(|&b| b == 3));
    }
}
