/// Fixed-capacity byte scrollback with FIFO eviction.
///
/// The owner wraps this in a mutex; one writer (the PTY read loop) appends,
/// readers take copies. After any write the buffer holds the last
/// `min(total written, capacity)` bytes in original order.
pub struct RingBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl RingBuffer {
    /// Capacity below 1 is coerced to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `bytes`, evicting from the front when over capacity.
    /// Returns the number of bytes consumed (always `bytes.len()`).
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        if bytes.is_empty() {
            return 0;
        }

        if bytes.len() >= self.capacity {
            self.data.clear();
            self.data
                .extend_from_slice(&bytes[bytes.len() - self.capacity..]);
            return bytes.len();
        }

        let overflow = (self.data.len() + bytes.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.data.drain(..overflow);
        }
        self.data.extend_from_slice(bytes);
        bytes.len()
    }

    /// Returns a fresh copy of the current contents.
    pub fn read_all(&self) -> Vec<u8> {
        self.data.clone()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
