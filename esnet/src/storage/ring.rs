/// A bounded circular byte buffer.
///
/// The allocated part starts at `read_at` and spans `length` bytes, possibly wrapping around the
/// end of the storage. Bytes past the allocated part can be written ahead of time and committed
/// later, which is how out-of-order data waits for the gap before it to fill.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    storage: Box<[u8]>,
    read_at: usize,
    length: usize,
}

impl RingBuffer {
    /// An empty ring holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        RingBuffer {
            storage: vec![0; capacity].into_boxed_slice(),
            read_at: 0,
            length: 0,
        }
    }

    /// The maximum number of bytes.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// The number of allocated bytes.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether no bytes are allocated.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Whether every byte is allocated.
    pub fn is_full(&self) -> bool {
        self.length == self.capacity()
    }

    /// The number of bytes that may still be enqueued.
    pub fn window(&self) -> usize {
        self.capacity() - self.length
    }

    /// Drop all content.
    pub fn clear(&mut self) {
        self.read_at = 0;
        self.length = 0;
    }

    fn wrap(&self, index: usize) -> usize {
        let capacity = self.capacity();
        if capacity == 0 {
            0
        } else {
            index % capacity
        }
    }

    /// Copy into the storage at absolute offset `start`, wrapping once.
    fn copy_in(&mut self, start: usize, data: &[u8]) {
        let start = self.wrap(start);
        let first = data.len().min(self.capacity() - start);
        self.storage[start..start + first].copy_from_slice(&data[..first]);
        self.storage[..data.len() - first].copy_from_slice(&data[first..]);
    }

    /// Copy out of the storage from absolute offset `start`, wrapping once.
    fn copy_out(&self, start: usize, data: &mut [u8]) {
        let start = self.wrap(start);
        let first = data.len().min(self.capacity() - start);
        data[..first].copy_from_slice(&self.storage[start..start + first]);
        let rest = data.len() - first;
        data[first..].copy_from_slice(&self.storage[..rest]);
    }

    /// Append as much of `data` as fits. Returns the number of bytes enqueued.
    pub fn enqueue_slice(&mut self, data: &[u8]) -> usize {
        let count = self.write_unallocated(0, data);
        self.enqueue_unallocated(count)
    }

    /// Remove bytes from the front into `data`. Returns the number of bytes dequeued.
    pub fn dequeue_slice(&mut self, data: &mut [u8]) -> usize {
        let count = self.read_allocated(0, data);
        self.dequeue_allocated(count)
    }

    /// Copy allocated bytes starting `offset` bytes behind the front, without removing them.
    pub fn read_allocated(&self, offset: usize, data: &mut [u8]) -> usize {
        if offset >= self.length {
            return 0;
        }
        let count = data.len().min(self.length - offset);
        self.copy_out(self.read_at + offset, &mut data[..count]);
        count
    }

    /// Write into the free space starting `offset` bytes behind the allocated part.
    ///
    /// The bytes stay unallocated until `enqueue_unallocated` commits them.
    pub fn write_unallocated(&mut self, offset: usize, data: &[u8]) -> usize {
        let free = self.window();
        if offset >= free {
            return 0;
        }
        let count = data.len().min(free - offset);
        let start = self.read_at + self.length + offset;
        self.copy_in(start, &data[..count]);
        count
    }

    /// Commit up to `count` bytes behind the allocated part. Returns the number committed.
    pub fn enqueue_unallocated(&mut self, count: usize) -> usize {
        let count = count.min(self.window());
        self.length += count;
        count
    }

    /// Drop up to `count` bytes from the front. Returns the number dropped.
    pub fn dequeue_allocated(&mut self, count: usize) -> usize {
        let count = count.min(self.length);
        self.read_at = self.wrap(self.read_at + count);
        // The front stays put when emptied, data written ahead of it must keep its place.
        self.length -= count;
        count
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn enqueue_dequeue_wraps() {
        let mut ring = RingBuffer::new(8);
        assert_eq!(ring.enqueue_slice(b"abcdef"), 6);
        let mut out = [0; 4];
        assert_eq!(ring.dequeue_slice(&mut out), 4);
        assert_eq!(&out, b"abcd");
        assert_eq!(ring.enqueue_slice(b"ghijklmn"), 6);
        assert!(ring.is_full());
        let mut out = [0; 8];
        assert_eq!(ring.dequeue_slice(&mut out), 8);
        assert_eq!(&out, b"efghijkl");
        assert!(ring.is_empty());
    }

    #[test]
    fn peek_at_offset() {
        let mut ring = RingBuffer::new(6);
        ring.enqueue_slice(b"0123");
        ring.dequeue_allocated(3);
        ring.enqueue_slice(b"4567");
        let mut out = [0; 3];
        assert_eq!(ring.read_allocated(2, &mut out), 3);
        assert_eq!(&out, b"567");
        assert_eq!(ring.read_allocated(5, &mut out), 0);
    }

    #[test]
    fn out_of_order_commit() {
        let mut ring = RingBuffer::new(8);
        ring.enqueue_slice(b"ab");
        assert_eq!(ring.write_unallocated(2, b"ef"), 2);
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.write_unallocated(0, b"cd"), 2);
        assert_eq!(ring.enqueue_unallocated(4), 4);
        let mut out = [0; 6];
        assert_eq!(ring.dequeue_slice(&mut out), 6);
        assert_eq!(&out, b"abcdef");
        assert_eq!(ring.write_unallocated(8, b"x"), 0);
    }
}
