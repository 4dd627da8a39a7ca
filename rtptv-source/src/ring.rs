//! Offset-addressed circular buffer for TS data.

/// A fixed-capacity circular byte buffer addressed by absolute stream offset.
///
/// The buffer never tracks readers. It only knows how many bytes have been
/// written in total (`bytes_fetched`); a byte at absolute offset `pos` lives
/// at `pos % capacity` and stays readable until `bytes_fetched - pos` exceeds
/// the capacity.
///
/// Not synchronized; [`TsStreamer`](crate::streamer::TsStreamer) guards it
/// with a mutex.
pub struct RingBuffer {
    /// The underlying buffer (heap-allocated).
    buffer: Box<[u8]>,
    /// Total bytes written since the last reset.
    bytes_fetched: u64,
}

impl RingBuffer {
    /// Create a ring buffer with the given capacity in bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        // Allocate directly on heap to avoid stack overflow
        let buffer = vec![0u8; capacity.max(1)].into_boxed_slice();
        Self {
            buffer,
            bytes_fetched: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes written since the last reset.
    pub fn bytes_fetched(&self) -> u64 {
        self.bytes_fetched
    }

    /// Forget all written data.
    pub fn reset(&mut self) {
        self.bytes_fetched = 0;
    }

    /// Append data at the live edge, overwriting the oldest bytes.
    pub fn write(&mut self, data: &[u8]) {
        for chunk in data.chunks(self.capacity()) {
            self.write_chunk(chunk);
        }
    }

    fn write_chunk(&mut self, data: &[u8]) {
        let capacity = self.capacity();
        let start = (self.bytes_fetched % capacity as u64) as usize;

        // Copy data, handling wrap-around
        let first_chunk = data.len().min(capacity - start);
        self.buffer[start..start + first_chunk].copy_from_slice(&data[..first_chunk]);
        if first_chunk < data.len() {
            let second_chunk = data.len() - first_chunk;
            self.buffer[..second_chunk].copy_from_slice(&data[first_chunk..]);
        }

        self.bytes_fetched += data.len() as u64;
    }

    /// Whether the byte at `pos` has already been overwritten.
    pub fn is_overrun(&self, pos: u64) -> bool {
        self.bytes_fetched.saturating_sub(pos) > self.capacity() as u64
    }

    /// Whether `len` bytes starting at `pos` have been written.
    pub fn is_available(&self, pos: u64, len: usize) -> bool {
        self.bytes_fetched >= pos.saturating_add(len as u64)
    }

    /// Copy `dest.len()` bytes starting at absolute offset `pos`.
    ///
    /// Returns false (and copies nothing) if the window is overrun or not yet
    /// fully written.
    pub fn copy_to(&self, pos: u64, dest: &mut [u8]) -> bool {
        if self.is_overrun(pos) || !self.is_available(pos, dest.len()) {
            return false;
        }
        if dest.is_empty() {
            return true;
        }

        let capacity = self.capacity();
        let start = (pos % capacity as u64) as usize;
        let first_chunk = dest.len().min(capacity - start);
        dest[..first_chunk].copy_from_slice(&self.buffer[start..start + first_chunk]);

        if first_chunk < dest.len() {
            let second_chunk = dest.len() - first_chunk;
            dest[first_chunk..].copy_from_slice(&self.buffer[..second_chunk]);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(start: u8, len: usize) -> Vec<u8> {
        (0..len).map(|i| start.wrapping_add(i as u8)).collect()
    }

    #[test]
    fn test_write_read() {
        let mut ring = RingBuffer::with_capacity(188 * 16);

        let data = pattern(0x47, 188 * 10);
        ring.write(&data);
        assert_eq!(ring.bytes_fetched(), data.len() as u64);

        let mut out = vec![0u8; data.len()];
        assert!(ring.copy_to(0, &mut out));
        assert_eq!(out, data);
    }

    #[test]
    fn test_wrap_around_straddling_chunk() {
        let mut ring = RingBuffer::with_capacity(1000);

        let head = pattern(1, 900);
        ring.write(&head);
        // 300 bytes: 100 at the tail of the array, 200 at the front
        let straddle = pattern(200, 300);
        ring.write(&straddle);
        assert_eq!(ring.bytes_fetched(), 1200);

        let mut out = vec![0u8; 300];
        assert!(ring.copy_to(900, &mut out));
        assert_eq!(out, straddle);

        // The 200 oldest bytes are gone, the remaining head is intact.
        let mut out = vec![0u8; 700];
        assert!(ring.copy_to(200, &mut out));
        assert_eq!(out, head[200..]);
    }

    #[test]
    fn test_overrun() {
        let mut ring = RingBuffer::with_capacity(1000);
        ring.write(&pattern(0, 1500));

        assert!(ring.is_overrun(499));
        assert!(!ring.is_overrun(500));

        let mut out = [0u8; 10];
        assert!(!ring.copy_to(0, &mut out));
        assert!(ring.copy_to(500, &mut out));
    }

    #[test]
    fn test_not_yet_available() {
        let mut ring = RingBuffer::with_capacity(1000);
        ring.write(&pattern(0, 100));

        let mut out = [0u8; 50];
        assert!(ring.is_available(50, 50));
        assert!(!ring.is_available(51, 50));
        assert!(!ring.copy_to(60, &mut out));
    }

    #[test]
    fn test_oversized_write_keeps_tail() {
        let mut ring = RingBuffer::with_capacity(100);
        let data = pattern(0, 250);
        ring.write(&data);

        assert_eq!(ring.bytes_fetched(), 250);
        let mut out = vec![0u8; 100];
        assert!(ring.copy_to(150, &mut out));
        assert_eq!(out, data[150..]);
    }

    #[test]
    fn test_reset() {
        let mut ring = RingBuffer::with_capacity(100);
        ring.write(&[1, 2, 3, 4, 5]);
        ring.reset();
        assert_eq!(ring.bytes_fetched(), 0);
        assert!(!ring.is_available(0, 1));
    }
}
