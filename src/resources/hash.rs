//! Content fingerprinting for resource deduplication.
//!
//! Resources are identified by a 64-bit xxh3 hash of their content. Several
//! fields are combined by feeding them one after another into a single
//! streaming state, always in the same order. Variable-length fields are
//! length-prefixed so that moving bytes from one field to the next changes
//! the fingerprint.

use bytemuck::Pod;
use xxhash_rust::xxh3::Xxh3;

use super::handle::Handle;

/// Hash a single byte span.
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(bytes)
}

/// Streaming 64-bit content hasher.
pub struct ContentHasher {
    state: Xxh3,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentHasher {
    pub fn new() -> Self {
        Self { state: Xxh3::new() }
    }

    /// Absorb raw bytes without a length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.state.update(bytes);
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Absorb a string, length-prefixed.
    pub fn write_str(&mut self, value: &str) -> &mut Self {
        self.write_u64(value.len() as u64);
        self.write_bytes(value.as_bytes())
    }

    /// Absorb a slice of plain-old-data values, length-prefixed by element count.
    pub fn write_slice<T: Pod>(&mut self, values: &[T]) -> &mut Self {
        self.write_u64(values.len() as u64);
        self.write_bytes(bytemuck::cast_slice(values))
    }

    /// Absorb a handle's identity.
    pub fn write_handle<T>(&mut self, handle: Handle<T>) -> &mut Self {
        self.write_u64(handle.id())
    }

    /// The raw 64-bit digest of everything absorbed so far.
    pub fn finish(&self) -> u64 {
        self.state.digest()
    }

    /// The digest as a handle. A digest of zero is remapped so the result
    /// is never the invalid handle.
    pub fn finish_handle<T>(&self) -> Handle<T> {
        match self.finish() {
            0 => Handle::from_id(!0),
            id => Handle::from_id(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let mut a = ContentHasher::new();
        a.write_str("cube").write_slice(&[1.0f32, 2.0, 3.0]);
        let mut b = ContentHasher::new();
        b.write_str("cube").write_slice(&[1.0f32, 2.0, 3.0]);
        assert_eq!(a.finish(), b.finish());
        assert_eq!(hash_bytes(b"abc"), hash_bytes(b"abc"));
    }

    #[test]
    fn test_hash_is_order_sensitive() {
        let mut a = ContentHasher::new();
        a.write_u32(1).write_u32(2);
        let mut b = ContentHasher::new();
        b.write_u32(2).write_u32(1);
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn test_length_prefix_separates_fields() {
        let mut a = ContentHasher::new();
        a.write_str("ab").write_str("c");
        let mut b = ContentHasher::new();
        b.write_str("a").write_str("bc");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn test_handle_is_never_invalid() {
        let hasher = ContentHasher::new();
        let handle: Handle<u8> = hasher.finish_handle();
        assert!(handle.is_valid());
    }
}
