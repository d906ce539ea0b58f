//! Binary encoding and decoding traits for the deterministic wire format.
//!
//! All encoded data uses little-endian byte order. Variable-size sequences
//! carry a var-int length prefix so short payloads stay compact while large
//! ones remain representable.
//!
//! # Binary Format
//!
//! - Integers: little-endian, fixed-width
//! - `bool`: single byte (0 = false, 1 = true)
//! - var-int: 1 byte below `0xfd`, then `0xfd`+u16 / `0xfe`+u32 / `0xff`+u64
//! - `Vec<T>` / `String`: var-int element count followed by elements
//! - `Option<T>`: 1-byte tag (0 = None, 1 = Some) followed by the value
//! - Arrays `[T; N]`: elements serialized sequentially without length prefix
//! - `BTreeMap<K, V>`: var-int entry count, entries in ascending key order

use ledger_derive::Error;
use std::collections::BTreeMap;

/// Sink for writing encoded bytes.
///
/// Implemented by byte buffers and hashers so encodable types can be hashed
/// directly without intermediate allocations.
pub trait EncodeSink {
    /// Writes the given bytes to the sink.
    fn write(&mut self, bytes: &[u8]);
}

/// Counter for computing encoded size without allocating memory.
///
/// Used by `Encode::to_bytes` to pre-allocate exact capacity before encoding.
pub struct SizeCounter {
    len: usize,
}

impl SizeCounter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self { len: 0 }
    }

    /// Returns the total number of bytes counted.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing has been counted yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
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

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Trait for types that can be serialized to the wire format.
pub trait Encode {
    /// Writes the binary representation to the given sink.
    fn encode<S: EncodeSink>(&self, out: &mut S);

    /// Serializes to a new byte buffer with exact capacity.
    ///
    /// Performs two passes: first to count bytes, then to encode.
    fn to_bytes(&self) -> Vec<u8> {
        let mut counter = SizeCounter::new();
        self.encode(&mut counter);

        let mut out = Vec::with_capacity(counter.len());
        self.encode(&mut out);
        out
    }

    /// Returns the encoded size in bytes without allocating.
    fn encoded_size(&self) -> usize {
        let mut counter = SizeCounter::new();
        self.encode(&mut counter);
        counter.len()
    }
}

/// Errors that can occur during decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended before expected data was read.
    #[error("unexpected end of input")]
    UnexpectedEof,
    /// Data does not represent a valid value for the target type.
    #[error("invalid value for target type")]
    InvalidValue,
    /// Length prefix exceeds the maximum allowed size.
    #[error("length prefix exceeds maximum allowed size")]
    LengthOverflow,
}

/// Trait for types that can be deserialized from the wire format.
pub trait Decode: Sized {
    /// Reads and decodes a value from the input buffer.
    ///
    /// Advances the input slice past the consumed bytes.
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Decodes a value from a byte slice, requiring all bytes to be consumed.
    ///
    /// Returns `InvalidValue` if trailing bytes remain after decoding.
    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut input = data;
        let value = Self::decode(&mut input)?;

        if !input.is_empty() {
            return Err(DecodeError::InvalidValue);
        }

        Ok(value)
    }
}

/// Reads exactly `n` bytes from the input, advancing the slice.
pub(crate) fn read_bytes<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if input.len() < n {
        return Err(DecodeError::UnexpectedEof);
    }
    let (bytes, rest) = input.split_at(n);
    *input = rest;
    Ok(bytes)
}

/// Maximum element count accepted when decoding sequences.
///
/// Guards against memory exhaustion from hostile length prefixes.
pub const MAX_SEQUENCE_LEN: u64 = 0x0100_0000;

/// Writes `value` as a var-int: 1 byte below 0xfd, otherwise a marker byte
/// followed by the little-endian fixed-width value.
pub fn write_var_int<S: EncodeSink>(out: &mut S, value: u64) {
    if value < 0xfd {
        out.write(&[value as u8]);
    } else if value <= 0xffff {
        out.write(&[0xfd]);
        out.write(&(value as u16).to_le_bytes());
    } else if value <= 0xffff_ffff {
        out.write(&[0xfe]);
        out.write(&(value as u32).to_le_bytes());
    } else {
        out.write(&[0xff]);
        out.write(&value.to_le_bytes());
    }
}

/// Reads a var-int written by [`write_var_int`].
///
/// Rejects non-canonical encodings (a longer form used for a value that fits
/// a shorter one) so every value has exactly one wire representation.
pub fn read_var_int(input: &mut &[u8]) -> Result<u64, DecodeError> {
    let marker = read_bytes(input, 1)?[0];
    let value = match marker {
        0xfd => {
            let v = u16::from_le_bytes(read_bytes(input, 2)?.try_into().unwrap()) as u64;
            if v < 0xfd {
                return Err(DecodeError::InvalidValue);
            }
            v
        }
        0xfe => {
            let v = u32::from_le_bytes(read_bytes(input, 4)?.try_into().unwrap()) as u64;
            if v <= 0xffff {
                return Err(DecodeError::InvalidValue);
            }
            v
        }
        0xff => {
            let v = u64::from_le_bytes(read_bytes(input, 8)?.try_into().unwrap());
            if v <= 0xffff_ffff {
                return Err(DecodeError::InvalidValue);
            }
            v
        }
        b => b as u64,
    };
    Ok(value)
}

/// Reads a var-int length prefix, bounded by [`MAX_SEQUENCE_LEN`].
pub fn read_var_len(input: &mut &[u8]) -> Result<usize, DecodeError> {
    let len = read_var_int(input)?;
    if len > MAX_SEQUENCE_LEN {
        return Err(DecodeError::LengthOverflow);
    }
    Ok(len as usize)
}

/// Writes a var-int length prefix followed by the raw bytes.
pub fn write_var_bytes<S: EncodeSink>(out: &mut S, bytes: &[u8]) {
    write_var_int(out, bytes.len() as u64);
    out.write(bytes);
}

/// Reads bytes written by [`write_var_bytes`].
pub fn read_var_bytes(input: &mut &[u8]) -> Result<Vec<u8>, DecodeError> {
    let len = read_var_len(input)?;
    Ok(read_bytes(input, len)?.to_vec())
}

// u8
impl Encode for u8 {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[*self]);
    }
}

impl Decode for u8 {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let bytes = read_bytes(input, 1)?;
        Ok(bytes[0])
    }
}

// i8
impl Encode for i8 {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[*self as u8]);
    }
}

impl Decode for i8 {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let bytes = read_bytes(input, 1)?;
        Ok(bytes[0] as i8)
    }
}

// Macro for fixed-size integer types
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
                    let bytes = read_bytes(input, std::mem::size_of::<$t>())?;
                    Ok(<$t>::from_le_bytes(bytes.try_into().unwrap()))
                }
            }
        )*
    };
}

impl_int!(u16, u32, u64, u128, i16, i32, i64, i128);

// bool
impl Encode for bool {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[*self as u8]);
    }
}

impl Decode for bool {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let b = u8::decode(input)?;
        match b {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

// Vec<T>
impl<T: Encode> Encode for Vec<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        write_var_int(out, self.len() as u64);
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = read_var_len(input)?;
        let mut vec = Vec::with_capacity(len.min(4096));
        for _ in 0..len {
            vec.push(T::decode(input)?);
        }
        Ok(vec)
    }
}

// String
impl Encode for String {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        write_var_bytes(out, self.as_bytes());
    }
}

impl Decode for String {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let bytes = read_var_bytes(input)?;
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidValue)
    }
}

// &str (encode only)
impl Encode for &str {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        write_var_bytes(out, self.as_bytes());
    }
}

// Option<T>
impl<T: Encode> Encode for Option<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        match self {
            None => 0u8.encode(out),
            Some(v) => {
                1u8.encode(out);
                v.encode(out);
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let tag = u8::decode(input)?;
        match tag {
            0 => Ok(None),
            1 => Ok(Some(T::decode(input)?)),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

// Fixed-size arrays [T; N]
impl<T: Encode, const N: usize> Encode for [T; N] {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode, const N: usize> Decode for [T; N] {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let mut vec = Vec::with_capacity(N);
        for _ in 0..N {
            vec.push(T::decode(input)?);
        }
        vec.try_into().map_err(|_| DecodeError::InvalidValue)
    }
}

// BTreeMap<K, V> - ascending key order makes the encoding canonical
impl<K: Encode + Ord, V: Encode> Encode for BTreeMap<K, V> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        write_var_int(out, self.len() as u64);
        for (key, value) in self {
            key.encode(out);
            value.encode(out);
        }
    }
}

impl<K: Decode + Ord, V: Decode> Decode for BTreeMap<K, V> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = read_var_len(input)?;
        let mut map = BTreeMap::new();
        for _ in 0..len {
            let key = K::decode(input)?;
            let value = V::decode(input)?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

// Tuples
impl<A: Encode, B: Encode> Encode for (A, B) {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.0.encode(out);
        self.1.encode(out);
    }
}

impl<A: Decode, B: Decode> Decode for (A, B) {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok((A::decode(input)?, B::decode(input)?))
    }
}

impl<A: Encode, B: Encode, C: Encode> Encode for (A, B, C) {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.0.encode(out);
        self.1.encode(out);
        self.2.encode(out);
    }
}

impl<A: Decode, B: Decode, C: Decode> Decode for (A, B, C) {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok((A::decode(input)?, B::decode(input)?, C::decode(input)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========== var-int ==========

    #[test]
    fn var_int_single_byte() {
        for val in [0u64, 1, 0x7f, 0xfc] {
            let mut buf = Vec::new();
            write_var_int(&mut buf, val);
            assert_eq!(buf.len(), 1);
            let mut input = buf.as_slice();
            assert_eq!(read_var_int(&mut input).unwrap(), val);
            assert!(input.is_empty());
        }
    }

    #[test]
    fn var_int_boundaries() {
        for (val, len) in [
            (0xfdu64, 3),
            (0xffff, 3),
            (0x1_0000, 5),
            (0xffff_ffff, 5),
            (0x1_0000_0000, 9),
            (u64::MAX, 9),
        ] {
            let mut buf = Vec::new();
            write_var_int(&mut buf, val);
            assert_eq!(buf.len(), len, "length for {val:#x}");
            let mut input = buf.as_slice();
            assert_eq!(read_var_int(&mut input).unwrap(), val);
        }
    }

    #[test]
    fn var_int_rejects_non_canonical() {
        // 0x05 encoded in the 0xfd form
        let buf = [0xfdu8, 0x05, 0x00];
        let mut input = buf.as_slice();
        assert_eq!(read_var_int(&mut input), Err(DecodeError::InvalidValue));

        // 0xffff encoded in the 0xfe form
        let buf = [0xfeu8, 0xff, 0xff, 0x00, 0x00];
        let mut input = buf.as_slice();
        assert_eq!(read_var_int(&mut input), Err(DecodeError::InvalidValue));
    }

    #[test]
    fn var_int_truncated() {
        let buf = [0xfdu8, 0x01];
        let mut input = buf.as_slice();
        assert_eq!(read_var_int(&mut input), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn var_len_rejects_hostile_length() {
        let mut buf = Vec::new();
        write_var_int(&mut buf, MAX_SEQUENCE_LEN + 1);
        let mut input = buf.as_slice();
        assert_eq!(read_var_len(&mut input), Err(DecodeError::LengthOverflow));
    }

    // ========== SizeCounter ==========

    #[test]
    fn size_counter_accumulates() {
        let mut counter = SizeCounter::new();
        assert_eq!(counter.len(), 0);

        counter.write(&[1, 2, 3]);
        assert_eq!(counter.len(), 3);

        counter.write(&[4, 5]);
        assert_eq!(counter.len(), 5);
    }

    #[test]
    fn to_bytes_preallocates_exact_capacity() {
        let data: Vec<u8> = vec![1, 2, 3, 4, 5];
        let bytes = data.to_bytes();
        // var-int length (1 byte for small counts) + elements
        assert_eq!(bytes.len(), 1 + 5);
        assert_eq!(bytes.capacity(), bytes.len());
    }

    // ========== Integers ==========

    #[test]
    fn u8_roundtrip() {
        for val in [0u8, 1, 127, 255] {
            let bytes = val.to_bytes();
            assert_eq!(bytes.len(), 1);
            assert_eq!(u8::from_bytes(&bytes).unwrap(), val);
        }
    }

    #[test]
    fn u32_little_endian() {
        let val: u32 = 0x12345678;
        let bytes = val.to_bytes();
        assert_eq!(bytes.as_slice(), &[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(u32::from_bytes(&bytes).unwrap(), val);
    }

    #[test]
    fn u64_roundtrip() {
        for val in [0u64, 1, u64::MAX / 2, u64::MAX] {
            let bytes = val.to_bytes();
            assert_eq!(bytes.len(), 8);
            assert_eq!(u64::from_bytes(&bytes).unwrap(), val);
        }
    }

    #[test]
    fn i64_negative_values() {
        let val: i64 = -1;
        let bytes = val.to_bytes();
        assert_eq!(bytes.as_slice(), &[0xFF; 8]);
        assert_eq!(i64::from_bytes(&bytes).unwrap(), val);
    }

    // ========== bool ==========

    #[test]
    fn bool_roundtrip() {
        assert!(!bool::from_bytes(&[0]).unwrap());
        assert!(bool::from_bytes(&[1]).unwrap());
    }

    #[test]
    fn bool_invalid_value() {
        for invalid in [2u8, 128, 255] {
            let result = bool::from_bytes(&[invalid]);
            assert!(matches!(result, Err(DecodeError::InvalidValue)));
        }
    }

    // ========== Vec<T> ==========

    #[test]
    fn vec_encoding_format() {
        let vec: Vec<u8> = vec![0xAA, 0xBB, 0xCC];
        let bytes = vec.to_bytes();

        // 1-byte var-int length + elements
        assert_eq!(bytes[0], 3);
        assert_eq!(&bytes[1..], &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn vec_roundtrip() {
        let original: Vec<u32> = vec![1, 2, 3, 4, 5];
        let bytes = original.to_bytes();
        let decoded = Vec::<u32>::from_bytes(&bytes).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn vec_empty() {
        let empty: Vec<u8> = vec![];
        let bytes = empty.to_bytes();
        assert_eq!(bytes.len(), 1);
        assert_eq!(Vec::<u8>::from_bytes(&bytes).unwrap(), empty);
    }

    #[test]
    fn vec_large_length_prefix() {
        let original: Vec<u8> = vec![7; 300];
        let bytes = original.to_bytes();
        // 300 does not fit a single-byte var-int
        assert_eq!(bytes[0], 0xfd);
        assert_eq!(Vec::<u8>::from_bytes(&bytes).unwrap(), original);
    }

    // ========== String ==========

    #[test]
    fn string_roundtrip() {
        let original = "hello world".to_string();
        let bytes = original.to_bytes();
        let decoded = String::from_bytes(&bytes).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn string_invalid_utf8() {
        let mut bytes = Vec::new();
        write_var_bytes(&mut bytes, &[0xFF, 0xFE, 0x00]);

        let result = String::from_bytes(&bytes);
        assert!(matches!(result, Err(DecodeError::InvalidValue)));
    }

    // ========== Option<T> ==========

    #[test]
    fn option_roundtrip() {
        let none: Option<u64> = None;
        assert_eq!(Option::<u64>::from_bytes(&none.to_bytes()).unwrap(), none);

        let some: Option<u64> = Some(42);
        assert_eq!(Option::<u64>::from_bytes(&some.to_bytes()).unwrap(), some);
    }

    #[test]
    fn option_invalid_tag() {
        let invalid = &[2u8, 0, 0, 0, 0];
        let result = Option::<u32>::from_bytes(invalid);
        assert!(matches!(result, Err(DecodeError::InvalidValue)));
    }

    // ========== Fixed-size arrays ==========

    #[test]
    fn array_no_length_prefix() {
        let arr: [u8; 4] = [1, 2, 3, 4];
        let bytes = arr.to_bytes();
        assert_eq!(bytes.len(), 4);
        assert_eq!(bytes.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn array_roundtrip() {
        let original: [u32; 3] = [0xAABBCCDD, 0x11223344, 0x55667788];
        let bytes = original.to_bytes();
        let decoded = <[u32; 3]>::from_bytes(&bytes).unwrap();
        assert_eq!(original, decoded);
    }

    // ========== BTreeMap ==========

    #[test]
    fn btree_map_roundtrip_sorted() {
        let mut map = BTreeMap::new();
        map.insert(3u32, "c".to_string());
        map.insert(1u32, "a".to_string());
        map.insert(2u32, "b".to_string());

        let bytes = map.to_bytes();
        // First key on the wire is the smallest
        assert_eq!(bytes[1..5], 1u32.to_le_bytes());

        let decoded = BTreeMap::<u32, String>::from_bytes(&bytes).unwrap();
        assert_eq!(map, decoded);
    }

    // ========== Error handling ==========

    #[test]
    fn unexpected_eof_empty_input() {
        let result = u32::from_bytes(&[]);
        assert!(matches!(result, Err(DecodeError::UnexpectedEof)));
    }

    #[test]
    fn unexpected_eof_partial_input() {
        let result = u32::from_bytes(&[0x12, 0x34]);
        assert!(matches!(result, Err(DecodeError::UnexpectedEof)));
    }

    #[test]
    fn trailing_bytes_error() {
        let bytes = &[42u8, 0xFF, 0xFF];
        let result = u8::from_bytes(bytes);
        assert!(matches!(result, Err(DecodeError::InvalidValue)));
    }

    #[test]
    fn decode_advances_input() {
        let mut input: &[u8] = &[0x01, 0x02, 0x03, 0x04, 0x05];

        let first = u8::decode(&mut input).unwrap();
        assert_eq!(first, 0x01);
        assert_eq!(input.len(), 4);

        let second = u16::decode(&mut input).unwrap();
        assert_eq!(second, 0x0302);
        assert_eq!(input.len(), 2);
    }

    // ========== Nested types ==========

    #[test]
    fn nested_vec_option() {
        let original: Vec<Option<u32>> = vec![Some(1), None, Some(3)];
        let bytes = original.to_bytes();
        let decoded = Vec::<Option<u32>>::from_bytes(&bytes).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn encoded_size_matches_to_bytes() {
        let value: (u32, Vec<u8>, String) = (7, vec![1, 2, 3], "abc".to_string());
        assert_eq!(value.encoded_size(), value.to_bytes().len());
    }
}
