//! # MQTT Serialization Utilities
//!
//! Helper functions for reading and writing MQTT-specific data types from and
//! to byte buffers: variable-byte integers, big-endian `u16`s and
//! length-prefixed strings. All of them work on an explicit cursor.

use crate::error::{MqttError, NoTransport, ProtocolError};

/// The largest value a variable-byte integer can carry (`0xFF 0xFF 0xFF 0x7F`).
pub const MAX_VARIABLE_BYTE_INTEGER: usize = 268_435_455;

/// Result type of the encoding helpers, which never fail in the transport.
pub type CodecResult<T> = Result<T, MqttError<NoTransport>>;

/// Reads a variable-byte integer from the buffer, advancing the cursor.
///
/// Returns `Ok(None)` when the buffer ends before the last byte of the
/// integer, so that callers can wait for more data. A fourth byte with the
/// continuation bit set makes the encoding invalid.
pub fn read_variable_byte_integer(
    cursor: &mut usize,
    buf: &[u8],
) -> Result<Option<usize>, ProtocolError> {
    let mut multiplier = 1;
    let mut value = 0;
    let mut i = 0;
    loop {
        let Some(&encoded_byte) = buf.get(*cursor + i) else {
            return Ok(None);
        };
        value += (encoded_byte & 127) as usize * multiplier;
        if (encoded_byte & 128) == 0 {
            break;
        }
        multiplier *= 128;
        i += 1;
        if i >= 4 {
            return Err(ProtocolError::MalformedFrame);
        }
    }
    *cursor += i + 1;
    Ok(Some(value))
}

/// Writes a variable-byte integer to the buffer, advancing the cursor.
pub fn write_variable_byte_integer(
    cursor: &mut usize,
    buf: &mut [u8],
    mut val: usize,
) -> CodecResult<()> {
    if val > MAX_VARIABLE_BYTE_INTEGER {
        return Err(MqttError::Protocol(ProtocolError::PayloadTooLarge));
    }
    loop {
        let mut encoded_byte = (val % 128) as u8;
        val /= 128;
        if val > 0 {
            encoded_byte |= 128;
        }
        *buf.get_mut(*cursor).ok_or(MqttError::BufferTooSmall)? = encoded_byte;
        *cursor += 1;
        if val == 0 {
            break;
        }
    }
    Ok(())
}

/// Number of bytes `val` occupies once encoded as a variable-byte integer.
pub fn variable_byte_integer_len(val: usize) -> usize {
    match val {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

/// Reads a big-endian `u16`, advancing the cursor.
pub fn read_u16(cursor: &mut usize, buf: &[u8]) -> Result<u16, ProtocolError> {
    let bytes = buf
        .get(*cursor..*cursor + 2)
        .ok_or(ProtocolError::MalformedFrame)?;
    *cursor += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Writes a big-endian `u16`, advancing the cursor.
pub fn write_u16(cursor: &mut usize, buf: &mut [u8], val: u16) -> CodecResult<()> {
    write_bytes(cursor, buf, &val.to_be_bytes())
}

/// Reads a single byte, advancing the cursor.
pub fn read_u8(cursor: &mut usize, buf: &[u8]) -> Result<u8, ProtocolError> {
    let byte = *buf.get(*cursor).ok_or(ProtocolError::MalformedFrame)?;
    *cursor += 1;
    Ok(byte)
}

/// Copies raw bytes into the buffer, advancing the cursor.
pub fn write_bytes(cursor: &mut usize, buf: &mut [u8], bytes: &[u8]) -> CodecResult<()> {
    let slice = buf
        .get_mut(*cursor..*cursor + bytes.len())
        .ok_or(MqttError::BufferTooSmall)?;
    slice.copy_from_slice(bytes);
    *cursor += bytes.len();
    Ok(())
}

/// Reads binary data prefixed with a 2-byte length.
pub fn read_binary<'a>(cursor: &mut usize, buf: &'a [u8]) -> Result<&'a [u8], ProtocolError> {
    let len = read_u16(cursor, buf)? as usize;
    let data = buf
        .get(*cursor..*cursor + len)
        .ok_or(ProtocolError::MalformedFrame)?;
    *cursor += len;
    Ok(data)
}

/// Writes binary data prefixed with a 2-byte length.
pub fn write_binary(cursor: &mut usize, buf: &mut [u8], data: &[u8]) -> CodecResult<()> {
    if data.len() > u16::MAX as usize {
        return Err(MqttError::Protocol(ProtocolError::PayloadTooLarge));
    }
    write_u16(cursor, buf, data.len() as u16)?;
    write_bytes(cursor, buf, data)
}

/// Reads a UTF-8 encoded string (prefixed with a 2-byte length) from the buffer.
pub fn read_utf8_string<'a>(cursor: &mut usize, buf: &'a [u8]) -> Result<&'a str, ProtocolError> {
    let bytes = read_binary(cursor, buf)?;
    core::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8String)
}

/// Writes a UTF-8 encoded string (prefixed with a 2-byte length) to the buffer.
pub fn write_utf8_string(cursor: &mut usize, buf: &mut [u8], s: &str) -> CodecResult<()> {
    write_binary(cursor, buf, s.as_bytes())
}

/// Length of a length-prefixed string or binary field on the wire.
pub fn prefixed_len(data: &[u8]) -> usize {
    2 + data.len()
}
