//! Keybag tag/length/value records
//!
//! A keybag is a flat run of records:
//!
//! ```ascii
//!     [Bytes(4):tag]      /* ASCII, e.g. "SALT" */
//!     [UInt32:size]       /* big endian */
//!     [Bytes(size):data]  /* when size == 4, data is a big endian UInt32 */
//! ```
//!
//! There is no record count or terminator; records run to the end of the
//! buffer.

use std::fmt;
use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

const INTEGER_WIDTH: u32 = 4;

pub type Tag = [u8; 4];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlvValue {
    Integer(u32),
    Bytes(Vec<u8>),
}

impl TlvValue {
    pub fn as_integer(&self) -> Option<u32> {
        match *self {
            TlvValue::Integer(i) => Some(i),
            TlvValue::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match *self {
            TlvValue::Bytes(ref b) => Some(b),
            TlvValue::Integer(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvRecord {
    pub tag: Tag,
    pub value: TlvValue,
}

impl TlvRecord {
    pub fn integer(tag: &Tag, value: u32) -> Self {
        TlvRecord {
            tag: *tag,
            value: TlvValue::Integer(value),
        }
    }

    pub fn bytes(tag: &Tag, value: &[u8]) -> Self {
        TlvRecord {
            tag: *tag,
            value: TlvValue::Bytes(value.to_vec()),
        }
    }

    pub fn tag_str(&self) -> String {
        String::from_utf8_lossy(&self.tag).into_owned()
    }
}

impl fmt::Display for TlvRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.value {
            TlvValue::Integer(i) => write!(f, "{}={}", self.tag_str(), i),
            TlvValue::Bytes(ref b) => write!(f, "{}=<{} bytes>", self.tag_str(), b.len()),
        }
    }
}

/// Parse a whole buffer into records.
pub fn parse(data: &[u8]) -> Result<Vec<TlvRecord>> {
    let mut reader = Cursor::new(data);
    let total = data.len() as u64;
    let mut records = Vec::new();

    while reader.position() < total {
        let offset = reader.position();
        let remaining = total - offset;
        if remaining < 8 {
            return Err(Error::KeybagFormat(format!(
                "truncated record header at offset {offset}"
            )));
        }

        let mut tag = [0u8; 4];
        reader.read_exact(&mut tag)?;
        let size = reader.read_u32::<BigEndian>()?;

        if u64::from(size) > total - reader.position() {
            return Err(Error::KeybagFormat(format!(
                "record {} at offset {} declares {} bytes but only {} remain",
                String::from_utf8_lossy(&tag),
                offset,
                size,
                total - reader.position()
            )));
        }

        let value = if size == INTEGER_WIDTH {
            TlvValue::Integer(reader.read_u32::<BigEndian>()?)
        } else {
            let mut buffer = vec![0u8; size as usize];
            reader.read_exact(&mut buffer)?;
            TlvValue::Bytes(buffer)
        };

        records.push(TlvRecord { tag, value });
    }

    Ok(records)
}

/// Serialize records back into the on-disk layout.
///
/// A four byte `Bytes` value would be read back as an integer, so it is
/// rejected here rather than silently changing meaning.
pub fn serialize(records: &[TlvRecord]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for record in records {
        out.extend_from_slice(&record.tag);
        match record.value {
            TlvValue::Integer(i) => {
                out.write_u32::<BigEndian>(INTEGER_WIDTH)?;
                out.write_u32::<BigEndian>(i)?;
            }
            TlvValue::Bytes(ref b) => {
                if b.len() == INTEGER_WIDTH as usize {
                    return Err(Error::KeybagFormat(format!(
                        "{} holds 4 raw bytes which would decode as an integer",
                        record.tag_str()
                    )));
                }
                let size = u32::try_from(b.len())
                    .map_err(|_| Error::KeybagFormat(format!("{} too long", record.tag_str())))?;
                out.write_u32::<BigEndian>(size)?;
                out.extend_from_slice(b);
            }
        }
    }
    Ok(out)
}
