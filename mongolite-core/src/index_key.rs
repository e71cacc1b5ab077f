//! Index key encoding for persistent secondary indexes.
//!
//! Field values are encoded into bytes whose lexicographic order matches the
//! cross-type value order, so the store's plain byte-ordered trees double as
//! sorted indexes. A composite key is the concatenation of its field
//! segments; every segment is self-delimiting (fixed width or terminated), so
//! no composite key is a proper prefix of a different one and equality probes
//! can use prefix matching.
//!
//! Layout per segment: `[type tag][payload]`. The tag order puts the missing
//! marker below every real value, then null, numbers, strings, objectids,
//! booleans, datetimes. Descending fields store the bitwise complement of the
//! whole segment.

use crate::value_utils::as_f64;
use bson::Bson;

/// Canonical marker for a field absent from the document. Sorts before all
/// real values.
pub const TAG_MISSING: u8 = 0x00;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_NUMBER: u8 = 0x10;
pub const TAG_STRING: u8 = 0x20;
pub const TAG_OBJECT_ID: u8 = 0x30;
pub const TAG_BOOL: u8 = 0x40;
pub const TAG_DATETIME: u8 = 0x50;
pub const TAG_BINARY: u8 = 0x60;
/// Everything else: stable but arbitrary order within the tag.
pub const TAG_OTHER: u8 = 0x70;

/// Escape byte inside terminated payloads. Must sort above every tag so a
/// shorter string orders below its extensions.
const ESCAPE: u8 = 0xFF;
const TERMINATOR: u8 = 0x00;

/// Encode f64 into bytes that sort naturally (negative < positive).
///
/// IEEE 754 bits don't sort: positives get the sign bit flipped, negatives
/// get all bits flipped, then big-endian makes lexicographic = numeric.
fn f64_sort_bytes(f: f64) -> [u8; 8] {
    let bits = f.to_bits();
    let transformed = if bits & 0x8000_0000_0000_0000 == 0 {
        bits | 0x8000_0000_0000_0000
    } else {
        !bits
    };
    transformed.to_be_bytes()
}

/// Same transform for signed 64-bit timestamps.
fn i64_sort_bytes(v: i64) -> [u8; 8] {
    ((v as u64) ^ 0x8000_0000_0000_0000).to_be_bytes()
}

/// Append `bytes` with NUL escaping and a NUL terminator, so the encoding is
/// self-delimiting and "a" still sorts below "a\0b" and below "ab".
fn push_terminated(buf: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        if b == TERMINATOR {
            buf.push(TERMINATOR);
            buf.push(ESCAPE);
        } else {
            buf.push(b);
        }
    }
    buf.push(TERMINATOR);
}

/// Append one field segment. `None` writes the missing marker.
pub fn encode_field(buf: &mut Vec<u8>, value: Option<&Bson>, descending: bool) {
    let start = buf.len();
    match value {
        None => buf.push(TAG_MISSING),
        Some(Bson::Null) | Some(Bson::Undefined) => buf.push(TAG_NULL),
        Some(v) if as_f64(v).is_some() => {
            buf.push(TAG_NUMBER);
            buf.extend_from_slice(&f64_sort_bytes(as_f64(v).unwrap_or(0.0)));
        }
        Some(Bson::String(s)) => {
            buf.push(TAG_STRING);
            push_terminated(buf, s.as_bytes());
        }
        Some(Bson::Symbol(s)) => {
            buf.push(TAG_STRING);
            push_terminated(buf, s.as_bytes());
        }
        Some(Bson::ObjectId(oid)) => {
            buf.push(TAG_OBJECT_ID);
            buf.extend_from_slice(&oid.bytes());
        }
        Some(Bson::Boolean(b)) => {
            buf.push(TAG_BOOL);
            buf.push(u8::from(*b));
        }
        Some(Bson::DateTime(dt)) => {
            buf.push(TAG_DATETIME);
            buf.extend_from_slice(&i64_sort_bytes(dt.timestamp_millis()));
        }
        Some(Bson::Binary(bin)) => {
            buf.push(TAG_BINARY);
            push_terminated(buf, &bin.bytes);
        }
        Some(other) => {
            buf.push(TAG_OTHER);
            let bytes = bson::to_vec(&bson::doc! {"v": other.clone()}).unwrap_or_default();
            push_terminated(buf, &bytes);
        }
    }
    if descending {
        for b in &mut buf[start..] {
            *b = !*b;
        }
    }
}

/// Encode one field value as a standalone segment.
pub fn encode_single(value: Option<&Bson>, descending: bool) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_field(&mut buf, value, descending);
    buf
}
