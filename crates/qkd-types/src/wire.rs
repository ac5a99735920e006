// Path: crates/qkd-types/src/wire.rs
//! Minimal big-endian primitive (de)serialization shared by key records and
//! messages. Every multi-byte integer on the wire is network byte order.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// A decode-time failure: either the buffer ran out of bytes mid-decode, or
/// a tag byte named a variant the reader doesn't recognize.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum WireError {
    #[error("wire buffer underrun: needed {needed} bytes, had {had}")]
    Underrun { needed: usize, had: usize },
    /// A tag byte did not match any known variant of the field it encodes.
    #[error("unrecognized wire tag {tag} for {field}")]
    UnknownTag { field: &'static str, tag: u8 },
}

fn need(buf: &impl Buf, n: usize) -> Result<(), WireError> {
    if buf.remaining() < n {
        Err(WireError::Underrun { needed: n, had: buf.remaining() })
    } else {
        Ok(())
    }
}

pub fn put_u8(out: &mut BytesMut, v: u8) {
    out.put_u8(v);
}

pub fn put_u32(out: &mut BytesMut, v: u32) {
    out.put_u32(v);
}

pub fn put_u64(out: &mut BytesMut, v: u64) {
    out.put_u64(v);
}

pub fn put_f64(out: &mut BytesMut, v: f64) {
    out.put_f64(v);
}

/// Writes a length-prefixed (`u32` length) byte blob.
pub fn put_blob(out: &mut BytesMut, blob: &[u8]) {
    out.put_u32(blob.len() as u32);
    out.put_slice(blob);
}

/// Writes a length-prefixed UTF-8 string using the same framing as a blob.
pub fn put_str(out: &mut BytesMut, s: &str) {
    put_blob(out, s.as_bytes());
}

pub fn get_u8(buf: &mut impl Buf) -> Result<u8, WireError> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn get_u32(buf: &mut impl Buf) -> Result<u32, WireError> {
    need(buf, 4)?;
    Ok(buf.get_u32())
}

pub fn get_u64(buf: &mut impl Buf) -> Result<u64, WireError> {
    need(buf, 8)?;
    Ok(buf.get_u64())
}

pub fn get_f64(buf: &mut impl Buf) -> Result<f64, WireError> {
    need(buf, 8)?;
    Ok(buf.get_f64())
}

pub fn get_blob(buf: &mut impl Buf) -> Result<Vec<u8>, WireError> {
    let len = get_u32(buf)? as usize;
    need(buf, len)?;
    let mut v = vec![0u8; len];
    buf.copy_to_slice(&mut v);
    Ok(v)
}

pub fn get_str(buf: &mut impl Buf) -> Result<String, WireError> {
    let blob = get_blob(buf)?;
    String::from_utf8(blob)
        .map_err(|e| WireError::Underrun { needed: e.utf8_error().valid_up_to(), had: 0 })
}
