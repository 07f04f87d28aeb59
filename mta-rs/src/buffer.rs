//! Growable byte accumulator used for both inbound parsing and outbound staging

const INITIAL_CAPACITY: usize = 512;

/// Ordered byte sequence with line extraction primitives.
///
/// Capacity starts at 512 bytes and doubles whenever an append would not
/// fit. It never shrinks, even when the buffer is drained.
#[derive(Debug, Clone)]
pub struct ByteBuffer {
    data: Vec<u8>,
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(INITIAL_CAPACITY),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.provide_capacity(self.data.len() + bytes.len());
        self.data.extend_from_slice(bytes);
    }

    pub fn append_str(&mut self, s: &str) {
        self.append(s.as_bytes());
    }

    /// Remove and return up to `max` bytes from the front.
    pub fn consume(&mut self, max: usize) -> Vec<u8> {
        let n = max.min(self.data.len());
        self.data.drain(..n).collect()
    }

    pub fn drop_first(&mut self, n: usize) {
        let n = n.min(self.data.len());
        self.data.drain(..n);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Extract the first `\n` terminated line, without the terminator and
    /// without a trailing `\r`.
    pub fn extract_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.data.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.data.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    /// Extract the first line terminated by exactly `\r\n`. A bare `\n`
    /// does not end a line here.
    pub fn extract_crlf_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.data.windows(2).position(|w| w == b"\r\n")?;
        let mut line: Vec<u8> = self.data.drain(..pos + 2).collect();
        line.truncate(pos);
        Some(line)
    }

    fn provide_capacity(&mut self, needed: usize) {
        let current = self.data.capacity().max(INITIAL_CAPACITY);
        if needed <= self.data.capacity() {
            return;
        }
        let mut target = current;
        while target < needed {
            target *= 2;
        }
        self.data.reserve_exact(target - self.data.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_line_strips_cr() {
        let mut buf = ByteBuffer::new();
        buf.append(b"HELO a\r\nNOOP\nrest");
        assert_eq!(buf.extract_line().unwrap(), b"HELO a");
        assert_eq!(buf.extract_line().unwrap(), b"NOOP");
        assert_eq!(buf.extract_line(), None);
        assert_eq!(buf.as_slice(), b"rest");
    }

    #[test]
    fn test_extract_crlf_line_requires_crlf() {
        let mut buf = ByteBuffer::new();
        buf.append(b"one\ntwo\r\nthree");
        assert_eq!(buf.extract_crlf_line().unwrap(), b"one\ntwo");
        assert_eq!(buf.extract_crlf_line(), None);
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_empty_buffer_operations() {
        let mut buf = ByteBuffer::new();
        assert!(buf.consume(10).is_empty());
        buf.drop_first(3);
        assert_eq!(buf.extract_line(), None);
        assert_eq!(buf.extract_crlf_line(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_consume_partial_and_all() {
        let mut buf = ByteBuffer::new();
        buf.append_str("abcdef");
        assert_eq!(buf.consume(2), b"ab");
        assert_eq!(buf.consume(100), b"cdef");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_capacity_grows_and_never_shrinks() {
        let mut buf = ByteBuffer::new();
        assert!(buf.capacity() >= 512);
        buf.append(&[b'x'; 1500]);
        let grown = buf.capacity();
        assert!(grown >= 2048);
        buf.drop_first(1500);
        assert_eq!(buf.capacity(), grown);
        assert!(buf.len() <= buf.capacity());
    }
}
