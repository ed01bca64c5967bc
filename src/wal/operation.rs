//! WAL operation records.
//!
//! Each record carries an explicit one-byte tag followed by its payload:
//!
//! ```text
//! 0x01  CreateSegment     u64 BE segment id
//! 0x02  Insert            codec-encoded vector
//! 0x03  InsertInSegment   u64 BE segment id + codec-encoded vector
//! 0x04  Delete            u16 BE id length + id bytes
//! ```
//!
//! `InsertInSegment` never appears in the log itself; it is synthesized
//! during replay so a recovered vector lands back in the segment it
//! originally belonged to.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::codec::{self, CodecError};
use crate::data::Vector;

const TAG_CREATE_SEGMENT: u8 = 0x01;
const TAG_INSERT: u8 = 0x02;
const TAG_INSERT_IN_SEGMENT: u8 = 0x03;
const TAG_DELETE: u8 = 0x04;

/// The unit of durability and replay.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    CreateSegment { segment_id: u64 },
    Insert { vector: Vector },
    InsertInSegment { vector: Vector, segment_id: u64 },
    Delete { id: String },
}

impl Operation {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        match self {
            Operation::CreateSegment { segment_id } => {
                buf.push(TAG_CREATE_SEGMENT);
                buf.write_u64::<BigEndian>(*segment_id)?;
            }
            Operation::Insert { vector } => {
                buf.push(TAG_INSERT);
                buf.extend_from_slice(&codec::encode_vector(vector)?);
            }
            Operation::InsertInSegment { vector, segment_id } => {
                buf.push(TAG_INSERT_IN_SEGMENT);
                buf.write_u64::<BigEndian>(*segment_id)?;
                buf.extend_from_slice(&codec::encode_vector(vector)?);
            }
            Operation::Delete { id } => {
                let id_bytes = id.as_bytes();
                if id_bytes.len() > u16::MAX as usize {
                    return Err(CodecError::IdTooLong(id_bytes.len()));
                }
                buf.push(TAG_DELETE);
                buf.write_u16::<BigEndian>(id_bytes.len() as u16)?;
                buf.extend_from_slice(id_bytes);
            }
        }
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Operation, CodecError> {
        let (&tag, payload) = bytes.split_first().ok_or(CodecError::Truncated)?;
        match tag {
            TAG_CREATE_SEGMENT => {
                let mut cursor = Cursor::new(payload);
                Ok(Operation::CreateSegment {
                    segment_id: cursor.read_u64::<BigEndian>()?,
                })
            }
            TAG_INSERT => Ok(Operation::Insert {
                vector: codec::decode_vector(payload)?,
            }),
            TAG_INSERT_IN_SEGMENT => {
                let mut cursor = Cursor::new(payload);
                let segment_id = cursor.read_u64::<BigEndian>()?;
                Ok(Operation::InsertInSegment {
                    vector: codec::decode_vector(&payload[cursor.position() as usize..])?,
                    segment_id,
                })
            }
            TAG_DELETE => {
                let mut cursor = Cursor::new(payload);
                let id_len = cursor.read_u16::<BigEndian>()? as usize;
                let mut id_buf = vec![0u8; id_len];
                cursor.read_exact(&mut id_buf)?;
                Ok(Operation::Delete {
                    id: String::from_utf8(id_buf)?,
                })
            }
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}
