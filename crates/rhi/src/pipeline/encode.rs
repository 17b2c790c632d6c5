//! Byte encoding shared by pipeline hashing and the disk cache.
//!
//! Hashing and serialization walk descriptions through the same [`Sink`]
//! methods so that the canonical form is defined in one place. All integers
//! are little-endian.

/// Selects how variable-size payloads are written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    /// Shader bytecode and root signature blobs contribute only their length
    /// and CRC.
    Hash,
    /// Everything needed to rebuild the description is written.
    Disk,
}

pub trait Sink {
    fn bytes(&mut self, bytes: &[u8]);

    fn u8(&mut self, value: u8) {
        self.bytes(&[value]);
    }

    fn bool(&mut self, value: bool) {
        self.u8(u8::from(value));
    }

    fn u32(&mut self, value: u32) {
        self.bytes(&value.to_le_bytes());
    }

    fn i32(&mut self, value: i32) {
        self.bytes(&value.to_le_bytes());
    }

    fn u64(&mut self, value: u64) {
        self.bytes(&value.to_le_bytes());
    }

    /// Floats are written by bit pattern.
    fn f32(&mut self, value: f32) {
        self.u32(value.to_bits());
    }

    /// A length-prefixed byte string.
    fn blob(&mut self, bytes: &[u8]) {
        self.u32(bytes.len() as u32);
        self.bytes(bytes);
    }

    fn str(&mut self, value: &str) {
        self.blob(value.as_bytes());
    }
}

impl Sink for Vec<u8> {
    fn bytes(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// CRC32 (IEEE) in the low word and FNV-1a in the high word, both over the
/// same byte stream.
pub struct HashSink {
    low: crc32fast::Hasher,
    high: u32,
}

impl HashSink {
    const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    #[must_use]
    pub fn new() -> Self {
        Self {
            low: crc32fast::Hasher::new(),
            high: Self::FNV_OFFSET_BASIS,
        }
    }

    #[must_use]
    pub fn finish(self) -> u64 {
        (u64::from(self.high) << 32) | u64::from(self.low.finalize())
    }
}

impl Default for HashSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for HashSink {
    fn bytes(&mut self, bytes: &[u8]) {
        self.low.update(bytes);
        self.high = bytes
            .iter()
            .fold(self.high, |h, &b| (h ^ u32::from(b)).wrapping_mul(Self::FNV_PRIME));
    }
}

/// Reads values written by a [`Sink`].
///
/// Reading past the end sets a sticky error flag and yields zeroes instead of
/// failing each call, so decoders can read a whole record and check once.
pub struct CacheReader<'a> {
    data: &'a [u8],
    position: usize,
    error: bool,
}

impl<'a> CacheReader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            error: false,
        }
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error
    }

    /// Flags the stream as invalid, e.g. on an out-of-range enum value.
    pub fn set_error(&mut self) {
        self.error = true;
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn bytes(&mut self, len: usize) -> &'a [u8] {
        if self.error || self.remaining() < len {
            self.error = true;
            return &[];
        }

        let data: &'a [u8] = self.data;
        let bytes = &data[self.position..self.position + len];
        self.position += len;
        bytes
    }

    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0; N];
        let bytes = self.bytes(N);
        if bytes.len() == N {
            out.copy_from_slice(bytes);
        }
        out
    }

    pub fn u8(&mut self) -> u8 {
        self.array::<1>()[0]
    }

    pub fn bool(&mut self) -> bool {
        match self.u8() {
            0 => false,
            1 => true,
            _ => {
                self.error = true;
                false
            }
        }
    }

    pub fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.array())
    }

    pub fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.array())
    }

    pub fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.array())
    }

    pub fn f32(&mut self) -> f32 {
        f32::from_bits(self.u32())
    }

    pub fn blob(&mut self) -> &'a [u8] {
        let len = self.u32() as usize;
        self.bytes(len)
    }

    pub fn string(&mut self) -> String {
        match std::str::from_utf8(self.blob()) {
            Ok(s) => s.to_owned(),
            Err(_) => {
                self.error = true;
                String::new()
            }
        }
    }

    /// Reads a value and maps it through `convert`, flagging an error when
    /// it has no mapping.
    pub fn enumeration<T: Default>(&mut self, convert: impl FnOnce(u32) -> Option<T>) -> T {
        let raw = self.u32();
        convert(raw).unwrap_or_else(|| {
            self.error = true;
            T::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_sets_sticky_error() {
        let mut buffer = Vec::new();
        buffer.u32(7);
        buffer.str("POSITION");

        let mut reader = CacheReader::new(&buffer);
        assert_eq!(reader.u32(), 7);
        assert_eq!(reader.string(), "POSITION");
        assert!(!reader.has_error());

        assert_eq!(reader.u64(), 0);
        assert!(reader.has_error());
        assert_eq!(reader.u8(), 0);
        assert!(reader.has_error());
    }

    #[test]
    fn hash_is_deterministic_and_streamed() {
        let hash = |parts: &[&str]| {
            let mut sink = HashSink::new();
            for part in parts {
                sink.bytes(part.as_bytes());
            }
            sink.finish()
        };

        assert_eq!(hash(&["abc"]), hash(&["a", "bc"]));
        assert_ne!(hash(&["abc"]), hash(&["abd"]));
        assert_eq!(hash(&["abc"]) as u32, crc32fast::hash(b"abc"));
        // 32-bit FNV-1a of "a".
        assert_eq!((hash(&["a"]) >> 32) as u32, 0xe40c_292c);
    }

    #[test]
    fn high_word_is_not_tied_to_low_word() {
        let hash = |bytes: &[u8]| {
            let mut sink = HashSink::new();
            sink.bytes(bytes);
            sink.finish()
        };

        // CRC is affine over GF(2): equal low-word deltas would force equal
        // high-word deltas if both words were CRCs of the same bytes.
        let delta = |a: u64, b: u64| a ^ b;
        let (x, y) = (hash(&[0, 0, 0, 0]), hash(&[1, 0, 0, 0]));
        let (z, w) = (hash(&[0, 0, 0, 2]), hash(&[1, 0, 0, 2]));
        assert_eq!(delta(x, y) as u32, delta(z, w) as u32);
        assert_ne!(delta(x, y) >> 32, delta(z, w) >> 32);
    }
}
