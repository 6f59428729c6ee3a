//! Side-car metadata record for blobs.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! u8   format version (1)
//! u8   content type present (0 or 1)
//! str  content type, only when present
//! u32  entry count
//! str  key, str value   (repeated entry-count times)
//! ```
//!
//! where `str` is a `u32` byte length followed by UTF-8 bytes. An empty file
//! decodes to the default record.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const FORMAT_VERSION: u8 = 1;

/// Content type plus user metadata, as persisted next to a blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataRecord {
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl MetadataRecord {
    pub fn new(content_type: Option<String>, metadata: HashMap<String, String>) -> Self {
        Self {
            content_type,
            metadata,
        }
    }

    /// Serializes the record. Entries are written in key order so equal
    /// records produce equal bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(FORMAT_VERSION);
        match &self.content_type {
            Some(content_type) => {
                buf.put_u8(1);
                put_str(&mut buf, content_type);
            }
            None => buf.put_u8(0),
        }

        let mut entries: Vec<_> = self.metadata.iter().collect();
        entries.sort();
        buf.put_u32_le(entries.len() as u32);
        for (key, value) in entries {
            put_str(&mut buf, key);
            put_str(&mut buf, value);
        }
        buf.freeze()
    }

    /// Parses a record produced by [`encode`](Self::encode).
    pub fn decode(data: &[u8]) -> io::Result<Self> {
        if data.is_empty() {
            return Ok(Self::default());
        }

        let mut buf = data;
        let version = buf.get_u8();
        if version != FORMAT_VERSION {
            return Err(invalid(format!("unsupported metadata format version {}", version)));
        }

        let content_type = match take_u8(&mut buf)? {
            0 => None,
            1 => Some(take_str(&mut buf)?),
            flag => return Err(invalid(format!("bad content type flag {}", flag))),
        };

        let count = take_u32(&mut buf)?;
        let mut metadata = HashMap::new();
        for _ in 0..count {
            let key = take_str(&mut buf)?;
            let value = take_str(&mut buf)?;
            metadata.insert(key, value);
        }

        if buf.has_remaining() {
            return Err(invalid(format!(
                "{} trailing bytes after metadata record",
                buf.remaining()
            )));
        }

        Ok(Self {
            content_type,
            metadata,
        })
    }

    /// Reads a whole record from a blocking reader.
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::decode(&data)
    }

    /// Writes the record to a blocking writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.encode())?;
        writer.flush()
    }

    /// Reads a whole record from an async reader.
    pub async fn read_from_async<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        Self::decode(&data)
    }

    /// Writes the record to an async writer.
    pub async fn write_to_async<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.encode()).await?;
        writer.flush().await
    }
}

fn put_str(buf: &mut BytesMut, value: &str) {
    buf.put_u32_le(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

fn take_u8(buf: &mut &[u8]) -> io::Result<u8> {
    if buf.remaining() < 1 {
        return Err(truncated());
    }
    Ok(buf.get_u8())
}

fn take_u32(buf: &mut &[u8]) -> io::Result<u32> {
    if buf.remaining() < 4 {
        return Err(truncated());
    }
    Ok(buf.get_u32_le())
}

fn take_str(buf: &mut &[u8]) -> io::Result<String> {
    let len = take_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(truncated());
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|e| invalid(e.to_string()))
}

fn truncated() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "truncated metadata record")
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
