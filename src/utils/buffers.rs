use bytes::{BufMut, BytesMut};
use serde::Serialize;
use smallvec::SmallVec;

/// Ids collected during a pass, usually a handful
pub type SmallIdVec = SmallVec<[u64; 8]>;

/// Largest datagram we are willing to send in one piece
pub const MAX_DATAGRAM_BYTES: usize = 65_507;

/// Reusable buffer for outbound packet serialization
pub struct PacketBuffer {
    buffer: BytesMut,
}

impl PacketBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Serialize `value` as JSON into the buffer, replacing previous contents
    pub fn encode<T: Serialize>(&mut self, value: &T) -> Result<&[u8], serde_json::Error> {
        self.buffer.clear();
        serde_json::to_writer((&mut self.buffer).writer(), value)?;
        Ok(&self.buffer[..])
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_small_vec_creation() {
        let mut vec: SmallIdVec = SmallVec::new();
        vec.push(1);
        vec.push(2);
        assert_eq!(vec.len(), 2);
        assert!(!vec.spilled());
    }

    #[test]
    fn test_packet_buffer_encode_replaces_contents() {
        let mut buf = PacketBuffer::new(64);
        let first = buf.encode(&json!({"event": "latencyTest"})).unwrap().to_vec();
        assert_eq!(first, br#"{"event":"latencyTest"}"#.to_vec());

        buf.encode(&json!(1)).unwrap();
        assert_eq!(buf.len(), 1);

        buf.clear();
        assert!(buf.is_empty());
    }
}
