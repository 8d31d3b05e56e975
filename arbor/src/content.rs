//! The content object envelope: a framed header carrying stat-level metadata
//! and extended attributes, followed by the raw file bytes. The envelope's
//! canonical byte stream is what a content object's digest is computed over.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checksum::Digest;

/// Stat-level metadata of a content object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub size: u64,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("content object truncated")]
    Truncated,
    #[error("malformed content header: {0}")]
    Header(#[source] serde_json::Error),
    #[error("content size mismatch: header says {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

#[derive(Serialize, Deserialize)]
struct Header {
    info: FileInfo,
    xattrs: Vec<(String, Vec<u8>)>,
}

/// A content object split into its parts: file info, extended attributes and
/// the raw data stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEnvelope {
    pub info: FileInfo,
    pub xattrs: Vec<(String, Vec<u8>)>,
    pub data: Vec<u8>,
}

impl FileEnvelope {
    pub fn new(mut info: FileInfo, xattrs: Vec<(String, Vec<u8>)>, data: Vec<u8>) -> Self {
        info.size = data.len() as u64;
        Self { info, xattrs, data }
    }

    /// Split a fetched blob into header and data.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < 4 {
            return Err(ParseError::Truncated);
        }
        let header_len = BigEndian::read_u32(&bytes[..4]) as usize;
        let rest = &bytes[4..];
        if rest.len() < header_len {
            return Err(ParseError::Truncated);
        }
        let header: Header =
            serde_json::from_slice(&rest[..header_len]).map_err(ParseError::Header)?;
        let data = &rest[header_len..];
        if header.info.size != data.len() as u64 {
            return Err(ParseError::SizeMismatch {
                expected: header.info.size,
                actual: data.len() as u64,
            });
        }
        Ok(Self {
            info: header.info,
            xattrs: header.xattrs,
            data: data.to_vec(),
        })
    }

    /// The canonical byte stream of this content object.
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = Header {
            info: self.info.clone(),
            xattrs: self.xattrs.clone(),
        };
        let header = serde_json::to_vec(&header).expect("content headers always serialize");
        let mut len = [0u8; 4];
        BigEndian::write_u32(&mut len, header.len() as u32);

        let mut out = Vec::with_capacity(4 + header.len() + self.data.len());
        out.extend_from_slice(&len);
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.data);
        out
    }

    pub fn digest(&self) -> Digest {
        Digest::digest(&self.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> FileEnvelope {
        FileEnvelope::new(
            FileInfo {
                uid: 0,
                gid: 0,
                mode: 0o100644,
                size: 0,
            },
            vec![("security.selinux".to_owned(), b"etc_t".to_vec())],
            b"hello world\n".to_vec(),
        )
    }

    #[test]
    fn test_roundtrip() {
        let envelope = envelope();
        assert_eq!(envelope.info.size, 12);

        let bytes = envelope.to_bytes();
        let parsed = FileEnvelope::parse(&bytes).unwrap();
        assert_eq!(parsed, envelope);
        assert_eq!(parsed.to_bytes(), bytes);
        assert_eq!(parsed.digest(), envelope.digest());
    }

    #[test]
    fn test_truncated() {
        let bytes = envelope().to_bytes();
        assert!(matches!(
            FileEnvelope::parse(&bytes[..2]),
            Err(ParseError::Truncated)
        ));
        assert!(matches!(
            FileEnvelope::parse(&bytes[..bytes.len() / 2]),
            Err(ParseError::Header(_)) | Err(ParseError::Truncated)
        ));
    }

    #[test]
    fn test_size_mismatch() {
        let mut bytes = envelope().to_bytes();
        bytes.pop();
        assert!(matches!(
            FileEnvelope::parse(&bytes),
            Err(ParseError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_data_changes_digest() {
        let a = envelope();
        let mut b = a.clone();
        b.data[0] ^= 1;
        assert_ne!(a.digest(), b.digest());
    }
}
