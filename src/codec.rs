// SPDX-License-Identifier: Apache-2.0, MIT

//! C3 — Record Codec: serializes a [`DevState`] into a length-delimited,
//! protobuf-wire-compatible payload, prefixes it with a 4-byte big-endian
//! CRC-32, and decodes + verifies the reverse direction (spec.md §4.3,
//! §6). Field numbers follow the `message DevState` schema of spec.md §6
//! exactly, so the on-disk bytes are readable by any protobuf decoder
//! given that schema, even though this crate hand-rolls the codec rather
//! than generating it from a `.proto` file.

use byteorder::{BigEndian, ByteOrder};
use integer_encoding::{VarIntReader, VarIntWriter};
use std::io::Cursor;

use crate::error::StoreError;
use crate::model::{DevState, Metric};

const WIRETYPE_VARINT: u64 = 0;
const WIRETYPE_LEN: u64 = 2;

fn tag(field: u32, wiretype: u64) -> u64 {
    ((field as u64) << 3) | wiretype
}

fn write_varint_field(buf: &mut Vec<u8>, field: u32, value: u64) {
    buf.write_varint(tag(field, WIRETYPE_VARINT)).unwrap();
    buf.write_varint(value).unwrap();
}

/// Writes a protobuf `int32`-style field: sign-extended to 64 bits and
/// varint-encoded as the raw two's-complement bit pattern (not zigzag —
/// that's `sint32`, which spec.md §6's schema does not use).
fn write_int32_field(buf: &mut Vec<u8>, field: u32, value: i32) {
    buf.write_varint(tag(field, WIRETYPE_VARINT)).unwrap();
    buf.write_varint(value as i64 as u64).unwrap();
}

fn write_len_field(buf: &mut Vec<u8>, field: u32, payload: &[u8]) {
    buf.write_varint(tag(field, WIRETYPE_LEN)).unwrap();
    buf.write_varint(payload.len() as u64).unwrap();
    buf.extend_from_slice(payload);
}

fn encode_metric(m: &Metric) -> Vec<u8> {
    let mut buf = Vec::new();
    write_varint_field(&mut buf, 1, m.id as u64);
    write_int32_field(&mut buf, 2, m.status);
    write_int32_field(&mut buf, 3, m.value);
    write_int32_field(&mut buf, 4, m.scale);
    if let Some(ts) = m.timestamp {
        write_varint_field(&mut buf, 5, ts as u64);
    }
    buf
}

/// Encode a [`DevState`] into its length-delimited payload (no CRC
/// prefix; see [`encode_record`] for the on-disk form).
pub fn encode_payload(state: &DevState) -> Vec<u8> {
    let mut buf = Vec::new();
    write_varint_field(&mut buf, 1, state.devid as u64);
    write_varint_field(&mut buf, 2, state.timestamp as u64);
    for m in &state.metrics {
        let encoded = encode_metric(m);
        write_len_field(&mut buf, 3, &encoded);
    }
    buf
}

/// Encode a [`DevState`] into the on-disk record: `[4-byte BE
/// CRC32(payload)][payload]` (spec.md §4.3).
pub fn encode_record(state: &DevState) -> Vec<u8> {
    let payload = encode_payload(state);
    let crc = crc32fast::hash(&payload);
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&crc.to_be_bytes());
    out.extend_from_slice(&payload);
    out
}

fn read_varint_u64(cur: &mut Cursor<&[u8]>) -> Result<u64, StoreError> {
    cur.read_varint()
        .map_err(|e| StoreError::Codec(format!("truncated varint: {e}")))
}

/// Reads a protobuf `int32`-style field (sign-extended two's-complement
/// bit pattern, as written by [`write_int32_field`]).
fn read_int32(cur: &mut Cursor<&[u8]>) -> Result<i32, StoreError> {
    let bits = read_varint_u64(cur)?;
    Ok(bits as i64 as i32)
}

fn decode_metric(bytes: &[u8]) -> Result<Metric, StoreError> {
    let mut cur = Cursor::new(bytes);
    let mut id = None;
    let mut status = 0i32;
    let mut value = 0i32;
    let mut scale = 0i32;
    let mut timestamp = None;

    while (cur.position() as usize) < bytes.len() {
        let t = read_varint_u64(&mut cur)?;
        let field = (t >> 3) as u32;
        let wiretype = t & 0x7;
        match (field, wiretype) {
            (1, WIRETYPE_VARINT) => id = Some(read_varint_u64(&mut cur)? as u32),
            (2, WIRETYPE_VARINT) => status = read_int32(&mut cur)?,
            (3, WIRETYPE_VARINT) => value = read_int32(&mut cur)?,
            (4, WIRETYPE_VARINT) => scale = read_int32(&mut cur)?,
            (5, WIRETYPE_VARINT) => timestamp = Some(read_varint_u64(&mut cur)? as u32),
            _ => return Err(StoreError::Codec(format!("unknown metric field {field}"))),
        }
    }

    Ok(Metric {
        id: id.ok_or_else(|| StoreError::Codec("metric missing id".into()))?,
        status,
        value,
        scale,
        timestamp,
    })
}

/// Decode a length-delimited payload (no CRC) into a [`DevState`].
pub fn decode_payload(bytes: &[u8]) -> Result<DevState, StoreError> {
    let mut cur = Cursor::new(bytes);
    let mut devid = None;
    let mut timestamp = None;
    let mut metrics = Vec::new();

    while (cur.position() as usize) < bytes.len() {
        let t = read_varint_u64(&mut cur)?;
        let field = (t >> 3) as u32;
        let wiretype = t & 0x7;
        match (field, wiretype) {
            (1, WIRETYPE_VARINT) => devid = Some(read_varint_u64(&mut cur)? as u32),
            (2, WIRETYPE_VARINT) => timestamp = Some(read_varint_u64(&mut cur)? as u32),
            (3, WIRETYPE_LEN) => {
                let len = read_varint_u64(&mut cur)? as usize;
                let start = cur.position() as usize;
                let end = start
                    .checked_add(len)
                    .filter(|&e| e <= bytes.len())
                    .ok_or_else(|| StoreError::Codec("metric length out of bounds".into()))?;
                metrics.push(decode_metric(&bytes[start..end])?);
                cur.set_position(end as u64);
            }
            _ => return Err(StoreError::Codec(format!("unknown devstate field {field}"))),
        }
    }

    Ok(DevState {
        devid: devid.ok_or_else(|| StoreError::Codec("devstate missing devid".into()))?,
        timestamp: timestamp.ok_or_else(|| StoreError::Codec("devstate missing timestamp".into()))?,
        metrics,
    })
}

/// Decode an on-disk record, verifying the CRC-32 prefix. A mismatched
/// checksum is a [`StoreError::Codec`] (spec.md §3 invariant 4): the
/// caller (projection) is expected to log and skip, not propagate.
pub fn decode_record(bytes: &[u8]) -> Result<DevState, StoreError> {
    if bytes.len() < 4 {
        return Err(StoreError::Codec("record shorter than CRC prefix".into()));
    }
    let stored_crc = BigEndian::read_u32(&bytes[..4]);
    let payload = &bytes[4..];
    let actual_crc = crc32fast::hash(payload);
    if stored_crc != actual_crc {
        return Err(StoreError::Codec(format!(
            "crc mismatch: stored {stored_crc:#x}, computed {actual_crc:#x}"
        )));
    }
    decode_payload(payload)
}
