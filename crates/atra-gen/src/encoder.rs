//! Bytecode builder: an append-only byte buffer with the encodings the
//! wasm binary format is made of.
//!
//! LEB128 encodings round-trip: decoding with a standard LEB128 reader
//! yields the original integer. Sections are length-prefixed, and the
//! length is only known after the content is written, so `section`
//! builds the content into a fresh inner buffer first.

/// Append-only byte buffer.
#[derive(Debug, Default, Clone)]
pub struct Encoder {
    bytes: Vec<u8>,
}

impl Encoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes the encoder, returning the bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// The bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Appends a single byte.
    pub fn byte(&mut self, b: u8) {
        self.bytes.push(b);
    }

    /// Appends raw bytes.
    pub fn raw(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    /// Unsigned LEB128.
    pub fn uleb(&mut self, mut value: u64) {
        loop {
            let mut byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.bytes.push(byte);
            if value == 0 {
                return;
            }
        }
    }

    /// Signed LEB128, 32-bit domain.
    pub fn sleb32(&mut self, value: i32) {
        self.sleb64(value as i64);
    }

    /// Signed LEB128, 64-bit domain. Terminates when the remaining
    /// value is 0 with a clear sign bit, or -1 with a set sign bit.
    pub fn sleb64(&mut self, mut value: i64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            let sign = byte & 0x40 != 0;
            if (value == 0 && !sign) || (value == -1 && sign) {
                self.bytes.push(byte);
                return;
            }
            self.bytes.push(byte | 0x80);
        }
    }

    /// IEEE-754 f32, little-endian.
    pub fn f32le(&mut self, value: f32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// IEEE-754 f64, little-endian.
    pub fn f64le(&mut self, value: f64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Length-prefixed UTF-8 string.
    pub fn name(&mut self, s: &str) {
        self.uleb(s.len() as u64);
        self.bytes.extend_from_slice(s.as_bytes());
    }

    /// Writes a length-prefixed section: the content is built into a
    /// fresh inner buffer, then `id`, the content length, and the
    /// content itself are appended.
    pub fn section(&mut self, id: u8, build: impl FnOnce(&mut Encoder)) {
        let mut inner = Encoder::new();
        build(&mut inner);
        self.byte(id);
        self.uleb(inner.len() as u64);
        self.raw(inner.as_slice());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uleb_bytes(value: u64) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.uleb(value);
        enc.into_bytes()
    }

    fn sleb_bytes(value: i64) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.sleb64(value);
        enc.into_bytes()
    }

    #[test]
    fn test_uleb_known_encodings() {
        assert_eq!(uleb_bytes(0), vec![0x00]);
        assert_eq!(uleb_bytes(7), vec![0x07]);
        assert_eq!(uleb_bytes(127), vec![0x7f]);
        assert_eq!(uleb_bytes(128), vec![0x80, 0x01]);
        assert_eq!(uleb_bytes(624485), vec![0xe5, 0x8e, 0x26]);
    }

    #[test]
    fn test_sleb_known_encodings() {
        assert_eq!(sleb_bytes(0), vec![0x00]);
        assert_eq!(sleb_bytes(-1), vec![0x7f]);
        assert_eq!(sleb_bytes(63), vec![0x3f]);
        assert_eq!(sleb_bytes(64), vec![0xc0, 0x00]);
        assert_eq!(sleb_bytes(-64), vec![0x40]);
        assert_eq!(sleb_bytes(-65), vec![0xbf, 0x7f]);
        assert_eq!(sleb_bytes(-123456), vec![0xc0, 0xbb, 0x78]);
    }

    #[test]
    fn test_uleb_round_trip_against_reference_reader() {
        let values = [
            0u64,
            1,
            127,
            128,
            300,
            16384,
            u32::MAX as u64 - 1,
            u32::MAX as u64,
        ];
        for value in values {
            let bytes = uleb_bytes(value);
            let mut cursor = std::io::Cursor::new(bytes);
            let decoded = leb128::read::unsigned(&mut cursor).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_sleb_round_trip_against_reference_reader() {
        let values = [
            0i64,
            1,
            -1,
            63,
            64,
            -64,
            -65,
            i32::MIN as i64,
            i32::MAX as i64,
            i64::MIN,
            i64::MAX,
        ];
        for value in values {
            let bytes = sleb_bytes(value);
            let mut cursor = std::io::Cursor::new(bytes);
            let decoded = leb128::read::signed(&mut cursor).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_floats_are_little_endian() {
        let mut enc = Encoder::new();
        enc.f64le(1.0);
        assert_eq!(
            enc.as_slice(),
            &[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xf0, 0x3f]
        );

        let mut enc = Encoder::new();
        enc.f32le(1.0);
        assert_eq!(enc.as_slice(), &[0x00, 0x00, 0x80, 0x3f]);
    }

    #[test]
    fn test_name_is_length_prefixed() {
        let mut enc = Encoder::new();
        enc.name("memory");
        assert_eq!(enc.as_slice()[0], 6);
        assert_eq!(&enc.as_slice()[1..], b"memory");
    }

    #[test]
    fn test_section_length_prefix() {
        let mut enc = Encoder::new();
        enc.section(1, |body| {
            body.raw(&[0xaa; 200]);
        });
        let bytes = enc.into_bytes();
        assert_eq!(bytes[0], 1);
        // 200 needs two LEB bytes.
        assert_eq!(&bytes[1..3], &[0xc8, 0x01]);
        assert_eq!(bytes.len(), 3 + 200);
    }

    #[test]
    fn test_empty_section() {
        let mut enc = Encoder::new();
        enc.section(5, |_| {});
        assert_eq!(enc.into_bytes(), vec![5, 0]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn uleb_round_trips(value in any::<u32>()) {
                let bytes = uleb_bytes(value as u64);
                let mut cursor = std::io::Cursor::new(bytes);
                prop_assert_eq!(leb128::read::unsigned(&mut cursor).unwrap(), value as u64);
            }

            #[test]
            fn sleb32_round_trips(value in any::<i32>()) {
                let mut enc = Encoder::new();
                enc.sleb32(value);
                let mut cursor = std::io::Cursor::new(enc.into_bytes());
                prop_assert_eq!(leb128::read::signed(&mut cursor).unwrap(), value as i64);
            }

            #[test]
            fn sleb64_round_trips(value in any::<i64>()) {
                let bytes = sleb_bytes(value);
                let mut cursor = std::io::Cursor::new(bytes);
                prop_assert_eq!(leb128::read::signed(&mut cursor).unwrap(), value);
            }
        }
    }
}
