//! Little-endian binary codec used by the program container.
//!
//! # Binary Format
//!
//! - Integers: little-endian, fixed-width
//! - Arrays `[T; N]`: elements back to back, no length prefix (section tags)
//! - `Vec<T>`: `u32` element count followed by the elements (export tables)
//!
//! Structs get their implementations from `#[derive(BinaryCodec)]`.

/// Sink for writing encoded bytes.
pub trait EncodeSink {
    /// Appends the given bytes.
    fn write(&mut self, bytes: &[u8]);
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Counts bytes without storing them.
pub struct SizeCounter {
    len: usize,
}

impl SizeCounter {
    pub fn new() -> Self {
        Self { len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl Default for SizeCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeSink for SizeCounter {
    fn write(&mut self, bytes: &[u8]) {
        self.len += bytes.len();
    }
}

/// Types with a binary representation.
pub trait Encode {
    /// Writes the binary representation to the given sink.
    fn encode<S: EncodeSink>(&self, out: &mut S);

    /// Number of bytes `encode` will produce.
    fn encoded_len(&self) -> usize {
        let mut counter = SizeCounter::new();
        self.encode(&mut counter);
        counter.len()
    }

    /// Serializes into a freshly allocated buffer of exact capacity.
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode(&mut out);
        out
    }
}

/// Errors that can occur during decoding.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended before expected data was read.
    UnexpectedEof,
    /// Bytes do not form a valid value of the target type.
    InvalidValue,
    /// Element count exceeds [`MAX_TABLE_LEN`].
    LengthOverflow,
}

/// Types that can be read back from their binary representation.
pub trait Decode: Sized {
    /// Decodes one value, advancing `input` past the consumed bytes.
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Decodes a value that must span the whole of `data`.
    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut input = data;
        let value = Self::decode(&mut input)?;
        if !input.is_empty() {
            return Err(DecodeError::InvalidValue);
        }
        Ok(value)
    }
}

/// Splits `n` bytes off the front of `input`.
pub fn read_bytes<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if input.len() < n {
        return Err(DecodeError::UnexpectedEof);
    }
    let (bytes, rest) = input.split_at(n);
    *input = rest;
    Ok(bytes)
}

impl Encode for u8 {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[*self]);
    }
}

impl Decode for u8 {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(read_bytes(input, 1)?[0])
    }
}

macro_rules! impl_int {
    ($($t:ty),*) => {
        $(
            impl Encode for $t {
                fn encode<S: EncodeSink>(&self, out: &mut S) {
                    out.write(&self.to_le_bytes());
                }
            }

            impl Decode for $t {
                fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(read_bytes(input, std::mem::size_of::<$t>())?);
                    Ok(<$t>::from_le_bytes(buf))
                }
            }
        )*
    };
}

impl_int!(u16, u32, i16, i32);

impl<T: Encode, const N: usize> Encode for [T; N] {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode, const N: usize> Decode for [T; N] {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let mut items = Vec::with_capacity(N);
        for _ in 0..N {
            items.push(T::decode(input)?);
        }
        items.try_into().map_err(|_| DecodeError::InvalidValue)
    }
}

/// Upper bound on decoded table lengths.
pub const MAX_TABLE_LEN: usize = 65_536;

impl<T: Encode> Encode for Vec<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        (self.len() as u32).encode(out);
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = u32::decode(input)? as usize;
        if len > MAX_TABLE_LEN {
            return Err(DecodeError::LengthOverflow);
        }
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(T::decode(input)?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_is_little_endian() {
        let bytes = 0x1234_5678u32.to_bytes();
        assert_eq!(bytes, vec![0x78, 0x56, 0x34, 0x12]);
        assert_eq!(u32::from_bytes(&bytes).unwrap(), 0x1234_5678);
    }

    #[test]
    fn i32_negative_is_twos_complement() {
        assert_eq!((-1i32).to_bytes(), vec![0xFF; 4]);
        assert_eq!(i32::from_bytes(&[0xFE, 0xFF, 0xFF, 0xFF]).unwrap(), -2);
    }

    #[test]
    fn tag_array_has_no_prefix() {
        assert_eq!(b"TRAX".to_bytes(), b"TRAX".to_vec());
        assert_eq!(<[u8; 4]>::from_bytes(b"HIT!").unwrap(), *b"HIT!");
    }

    #[test]
    fn vec_uses_u32_count() {
        let bytes = vec![7u32, 9].to_bytes();
        assert_eq!(&bytes[..4], &2u32.to_le_bytes());
        assert_eq!(bytes.len(), 4 + 8);
        assert_eq!(Vec::<u32>::from_bytes(&bytes).unwrap(), vec![7, 9]);
    }

    #[test]
    fn vec_rejects_oversized_count() {
        let bytes = ((MAX_TABLE_LEN as u32) + 1).to_bytes();
        assert_eq!(Vec::<u8>::from_bytes(&bytes), Err(DecodeError::LengthOverflow));
    }

    #[test]
    fn short_input_is_eof() {
        let mut input: &[u8] = &[1, 2];
        assert_eq!(u32::decode(&mut input), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn from_bytes_rejects_trailing_bytes() {
        assert_eq!(u8::from_bytes(&[1, 2]), Err(DecodeError::InvalidValue));
    }

    #[test]
    fn size_counter_matches_output() {
        let table = vec![[1u8, 2, 3, 4]; 3];
        assert_eq!(table.encoded_len(), table.to_bytes().len());
    }
}
