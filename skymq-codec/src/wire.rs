//! Field-level readers and writers shared by the packet codecs: 2-byte
//! big-endian length prefixes for strings and binary data, and the base-128
//! variable-length integer used by the fixed header and v5 property
//! sections.

use std::num::NonZeroU16;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytestring::ByteString;

use crate::error::{DecodeError, EncodeError};

pub(crate) fn read_u8(src: &mut Bytes) -> Result<u8, DecodeError> {
    if !src.has_remaining() {
        return Err(DecodeError::InvalidLength);
    }
    Ok(src.get_u8())
}

pub(crate) fn read_u16(src: &mut Bytes) -> Result<u16, DecodeError> {
    if src.remaining() < 2 {
        return Err(DecodeError::InvalidLength);
    }
    Ok(src.get_u16())
}

pub(crate) fn read_u32(src: &mut Bytes) -> Result<u32, DecodeError> {
    if src.remaining() < 4 {
        return Err(DecodeError::InvalidLength);
    }
    Ok(src.get_u32())
}

/// Single-byte boolean; anything past 1 is malformed.
pub(crate) fn read_bool(src: &mut Bytes) -> Result<bool, DecodeError> {
    match read_u8(src)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(DecodeError::MalformedPacket),
    }
}

/// A packet id field; the zero value is reserved and never valid on the wire.
pub(crate) fn read_packet_id(src: &mut Bytes) -> Result<NonZeroU16, DecodeError> {
    NonZeroU16::new(read_u16(src)?).ok_or(DecodeError::MalformedPacket)
}

/// Binary field: 2-byte length prefix followed by that many bytes.
pub(crate) fn read_bytes(src: &mut Bytes) -> Result<Bytes, DecodeError> {
    let len = usize::from(read_u16(src)?);
    if src.remaining() < len {
        return Err(DecodeError::InvalidLength);
    }
    Ok(src.split_to(len))
}

/// UTF-8 string field.
pub(crate) fn read_string(src: &mut Bytes) -> Result<ByteString, DecodeError> {
    ByteString::try_from(read_bytes(src)?).map_err(|_| DecodeError::Utf8)
}

pub(crate) fn write_bytes(data: &[u8], dst: &mut BytesMut) -> Result<(), EncodeError> {
    let len = u16::try_from(data.len()).map_err(|_| EncodeError::InvalidLength)?;
    dst.put_u16(len);
    dst.put_slice(data);
    Ok(())
}

pub(crate) fn write_string(s: &str, dst: &mut BytesMut) -> Result<(), EncodeError> {
    write_bytes(s.as_bytes(), dst)
}

/// Var-int at the front of `buf`, 7 bits per byte with the continuation bit
/// in the high bit. `Ok(None)` means the buffer ends inside the integer; a
/// fifth byte can never be valid.
pub(crate) fn read_remaining_length(buf: &[u8]) -> Result<Option<(u32, usize)>, DecodeError> {
    let mut value: u32 = 0;
    for (i, &byte) in buf.iter().take(4).enumerate() {
        value |= u32::from(byte & 0x7f) << (7 * i as u32);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if buf.len() >= 4 {
        return Err(DecodeError::InvalidLength);
    }
    Ok(None)
}

/// Var-int inside an already-framed section, e.g. a property list.
pub(crate) fn read_var_int(src: &mut Bytes) -> Result<u32, DecodeError> {
    let mut value: u32 = 0;
    for i in 0..4u32 {
        let byte = read_u8(src)?;
        value |= u32::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(DecodeError::InvalidLength)
}

pub(crate) fn write_var_int(mut value: u32, dst: &mut BytesMut) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            dst.put_u8(byte);
            return;
        }
        dst.put_u8(byte | 0x80);
    }
}

/// Bytes the var-int encoding of `value` occupies.
pub(crate) fn var_int_len(value: usize) -> usize {
    match value {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        0x4000..=0x1f_ffff => 3,
        _ => 4,
    }
}
