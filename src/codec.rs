//! Binary vector wire format.
//!
//! Used by segment persistence and by WAL records. All integers and floats
//! are big-endian.
//!
//! ```text
//! Offset  Size      Type     Description
//! ──────────────────────────────────────────────────
//! 0       2         u16 BE   id byte length L
//! 2       L         [u8]     id (UTF-8)
//! 2+L     4         i32 BE   dimension count D
//! 6+L     D*8       [f64 BE] vector values
//! ...     rest      [u8]     metadata document (JSON)
//! ```
//!
//! An empty metadata tail decodes to the empty document.

use std::io::{self, Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::data::{Metadata, Vector};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("vector id of {0} bytes exceeds the wire limit of 65535")]
    IdTooLong(usize),

    #[error("vector id is not valid utf-8")]
    InvalidId(#[from] std::string::FromUtf8Error),

    #[error("invalid dimension count {0}")]
    InvalidDimension(i64),

    #[error("metadata document: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("record is truncated")]
    Truncated,

    #[error("unknown operation tag {0}")]
    UnknownTag(u8),
}

/// Encode a vector into its wire representation.
pub fn encode_vector(vector: &Vector) -> Result<Vec<u8>, CodecError> {
    let id_bytes = vector.id.as_bytes();
    if id_bytes.len() > u16::MAX as usize {
        return Err(CodecError::IdTooLong(id_bytes.len()));
    }

    let mut buf = Vec::with_capacity(2 + id_bytes.len() + 4 + vector.values.len() * 8 + 2);
    buf.write_u16::<BigEndian>(id_bytes.len() as u16)?;
    buf.extend_from_slice(id_bytes);
    buf.write_i32::<BigEndian>(vector.values.len() as i32)?;
    for value in &vector.values {
        buf.write_f64::<BigEndian>(*value)?;
    }
    buf.extend_from_slice(&serde_json::to_vec(&vector.metadata)?);
    Ok(buf)
}

/// Decode a wire record back into a vector.
pub fn decode_vector(bytes: &[u8]) -> Result<Vector, CodecError> {
    let mut cursor = Cursor::new(bytes);

    let id_len = cursor.read_u16::<BigEndian>()? as usize;
    let mut id_buf = vec![0u8; id_len];
    cursor.read_exact(&mut id_buf)?;
    let id = String::from_utf8(id_buf)?;

    let dim = cursor.read_i32::<BigEndian>()?;
    if dim < 0 {
        return Err(CodecError::InvalidDimension(dim as i64));
    }
    let dim = dim as usize;
    let remaining = bytes.len().saturating_sub(cursor.position() as usize);
    if dim * 8 > remaining {
        // Corrupt length field; refuse before allocating.
        return Err(CodecError::InvalidDimension(dim as i64));
    }

    let mut values = Vec::with_capacity(dim);
    for _ in 0..dim {
        values.push(cursor.read_f64::<BigEndian>()?);
    }

    let tail = &bytes[cursor.position() as usize..];
    let metadata: Metadata = if tail.is_empty() {
        Metadata::new()
    } else {
        serde_json::from_slice(tail)?
    };

    Ok(Vector {
        id,
        values,
        metadata,
    })
}
